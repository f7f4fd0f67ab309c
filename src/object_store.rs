use crate::errors::AppError;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

/// Largest audio object accepted for upload (the transcription limit).
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// A stored audio object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    pub public_url: String,
}

/// File-object store for recorded audio.
#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Stores the bytes under a fresh name and returns where to fetch them.
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject, AppError>;
}

/// Checks an upload before any network call.
pub fn validate_audio(bytes: &[u8], content_type: &str) -> Result<(), AppError> {
    if bytes.is_empty() {
        return Err(AppError::Validation("Audio file is empty".into()));
    }
    if bytes.len() > MAX_AUDIO_BYTES {
        return Err(AppError::Validation("Audio file too large (max 25MB)".into()));
    }
    if !base_mime(content_type).starts_with("audio/") {
        return Err(AppError::Validation(format!(
            "Unsupported content type '{}', expected audio/*",
            content_type
        )));
    }
    Ok(())
}

/// `audio_{uuid}_{unix_ms}.{ext}`
pub fn object_name(content_type: &str) -> String {
    format!(
        "audio_{}_{}.{}",
        Uuid::new_v4().simple(),
        Utc::now().timestamp_millis(),
        audio_extension(content_type)
    )
}

/// File extension for an audio MIME type; unknown types are treated as webm.
pub fn audio_extension(content_type: &str) -> &'static str {
    match base_mime(content_type) {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        _ => "webm",
    }
}

fn base_mime(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

/// Client for a Supabase-style storage HTTP API.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl HttpObjectStore {
    /// Creates a new `HttpObjectStore`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root of the storage API, without trailing slash.
    /// * `service_key` - Bearer key allowed to write to `bucket`.
    /// * `bucket` - Public bucket holding the audio objects.
    pub fn new(base_url: String, service_key: String, bucket: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create storage client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
        })
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, name
        )
    }
}

#[async_trait]
impl AudioStore for HttpObjectStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<StoredObject, AppError> {
        validate_audio(&bytes, content_type)?;

        let name = object_name(content_type);
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, name
        );
        tracing::info!("📤 Uploading audio object {} ({} bytes)", name, bytes.len());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Storage upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Storage returned {}: {}",
                status, error_text
            )));
        }

        let public_url = self.public_url(&name);
        tracing::info!("✓ Audio uploaded: {}", public_url);
        Ok(StoredObject { name, public_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_oversized_and_non_audio_uploads() {
        assert!(validate_audio(&[], "audio/webm").is_err());
        assert!(validate_audio(&vec![0u8; MAX_AUDIO_BYTES + 1], "audio/webm").is_err());
        assert!(validate_audio(b"RIFF", "image/png").is_err());
        assert!(validate_audio(b"RIFF", "audio/webm;codecs=opus").is_ok());
    }

    #[test]
    fn object_names_follow_the_audio_pattern() {
        let name = object_name("audio/mpeg");
        assert!(name.starts_with("audio_"));
        assert!(name.ends_with(".mp3"));
        assert_eq!(name.split('_').count(), 3);
        assert_ne!(object_name("audio/webm"), object_name("audio/webm"));
    }

    #[test]
    fn audio_extension_follows_content_type() {
        assert_eq!(audio_extension("audio/mpeg"), "mp3");
        assert_eq!(audio_extension("audio/webm;codecs=opus"), "webm");
    }
}
