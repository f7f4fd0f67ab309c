use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::AudioUploadResult;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use std::sync::Arc;

/// POST /api/v1/audio
///
/// Raw audio bytes in the body, MIME type in `Content-Type`. The returned
/// `url` is what the respondent page submits as `audio_url`.
#[utoipa::path(post, path = "/api/v1/audio", tag = "Audio",
    request_body(content = Vec<u8>, content_type = "audio/webm", description = "Recorded audio"),
    responses(
        (status = 200, description = "Audio stored", body = AudioUploadResult),
        (status = 400, description = "Empty, oversized or non-audio upload"),
        (status = 502, description = "Object store rejected the upload"),
    ))]
pub async fn upload_audio(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AudioUploadResult>, AppError> {
    let store = state
        .audio_store
        .as_ref()
        .ok_or_else(|| AppError::InternalError("Audio storage is not configured".into()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let stored = store.put(body.to_vec(), content_type).await?;

    Ok(Json(AudioUploadResult {
        success: true,
        url: stored.public_url,
        filename: stored.name,
    }))
}
