//! Ingestion Service: validate, persist, then hand audio responses to the runner.

use crate::enrichment::EnrichmentJob;
use crate::errors::AppError;
use crate::models::{EnrichmentStatus, Response, SubmitResponseRequest};
use crate::store::{NewResponse, ResponseStore};
use crate::worker::EnrichmentRunner;
use axum::http::HeaderMap;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Recorded when the client address cannot be determined.
pub const UNKNOWN_IP: &str = "0.0.0.0";

/// Best-effort submitter context captured from the inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub ip_address: String,
    pub user_agent: String,
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self {
            ip_address: UNKNOWN_IP.to_string(),
            user_agent: String::new(),
        }
    }
}

impl RequestMetadata {
    /// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer,
    /// then [`UNKNOWN_IP`].
    pub fn from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip_address = header("x-forwarded-for")
            .and_then(|list| list.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or_else(|| header("x-real-ip"))
            .map(str::to_string)
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_IP.to_string());

        Self {
            ip_address,
            user_agent: header("user-agent").unwrap_or_default().to_string(),
        }
    }
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSubmission {
    pub survey_id: Uuid,
    pub business_id: Uuid,
    pub rating: i16,
    pub text: Option<String>,
    pub audio_url: Option<String>,
    pub language: Option<String>,
}

impl TryFrom<SubmitResponseRequest> for ValidSubmission {
    type Error = AppError;

    fn try_from(req: SubmitResponseRequest) -> Result<Self, AppError> {
        let survey_id = non_blank(req.survey_id);
        let business_id = non_blank(req.business_id);
        let (Some(survey_id), Some(business_id), Some(rating)) =
            (survey_id, business_id, req.rating.filter(|r| !r.is_null()))
        else {
            return Err(AppError::Validation(
                "survey_id, business_id, rating are required".to_string(),
            ));
        };

        Ok(Self {
            survey_id: parse_id("survey_id", &survey_id)?,
            business_id: parse_id("business_id", &business_id)?,
            rating: parse_rating(&rating)?,
            text: non_blank(req.text),
            audio_url: non_blank(req.audio_url),
            language: non_blank(req.language),
        })
    }
}

/// Accepts integral JSON numbers 1 through 5 (`4` or `4.0`); rejects
/// fractions, strings and anything out of range.
pub fn parse_rating(value: &Value) -> Result<i16, AppError> {
    let out_of_range = || AppError::Validation("rating must be an integer between 1 and 5".into());

    let number = value.as_f64().ok_or_else(out_of_range)?;
    if number.fract() != 0.0 || !(1.0..=5.0).contains(&number) {
        return Err(out_of_range());
    }
    Ok(number as i16)
}

fn parse_id(field: &str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("{} must be a valid UUID", field)))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub struct IngestionService {
    store: Arc<dyn ResponseStore>,
    runner: EnrichmentRunner,
}

impl IngestionService {
    pub fn new(store: Arc<dyn ResponseStore>, runner: EnrichmentRunner) -> Self {
        Self { store, runner }
    }

    /// Persists the base row and, for audio responses, schedules enrichment.
    ///
    /// Returns as soon as the insert succeeds; enrichment outcome never
    /// affects the result.
    pub async fn submit(
        &self,
        request: SubmitResponseRequest,
        metadata: RequestMetadata,
    ) -> Result<Response, AppError> {
        let submission = ValidSubmission::try_from(request)?;

        let enrichment_status = if submission.audio_url.is_some() {
            EnrichmentStatus::Pending
        } else {
            EnrichmentStatus::NotRequired
        };

        let response = self
            .store
            .insert_response(NewResponse {
                survey_id: submission.survey_id,
                business_id: submission.business_id,
                rating: submission.rating,
                transcription: submission.text.clone(),
                audio_url: submission.audio_url.clone(),
                language: submission.language.clone(),
                ip_address: metadata.ip_address,
                user_agent: metadata.user_agent,
                enrichment_status,
            })
            .await?;

        tracing::info!(
            "✓ Stored response {} (survey {}, rating {})",
            response.id,
            response.survey_id,
            response.rating
        );

        if let Some(audio_url) = submission.audio_url {
            self.runner.schedule(EnrichmentJob {
                response_id: response.id,
                audio_url,
                fallback_text: submission.text,
                language: submission.language,
            });
        }

        Ok(response)
    }
}
