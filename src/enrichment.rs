//! Enrichment Orchestrator
//!
//! Drives one response through transcribe, then analyze, then a single commit:
//! 1. Transcribe the audio (fallback: the text typed at submission)
//! 2. Analyze the working transcription (fallback: neutral / 0.5 / no keywords)
//! 3. Commit every enriched field plus `processed_at` in one update
//!
//! Provider failures never escape this module; only a failed commit does.
use crate::errors::AppError;
use crate::models::Sentiment;
use crate::services::{EnrichmentClient, RawAnalysis};
use crate::store::{EnrichedFields, ResponseStore};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_SENTIMENT: Sentiment = Sentiment::Neutral;
pub const DEFAULT_SENTIMENT_SCORE: f64 = 0.5;
pub const MAX_KEYWORDS: usize = 8;

/// Work item for one response submitted with audio.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentJob {
    pub response_id: Uuid,
    pub audio_url: String,
    /// Text typed at submission, used when transcription fails.
    pub fallback_text: Option<String>,
    pub language: Option<String>,
}

/// Which steps produced provider data rather than defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub transcribed: bool,
    pub analyzed: bool,
}

impl EnrichmentReport {
    pub fn is_degraded(&self) -> bool {
        !self.transcribed || !self.analyzed
    }
}

/// Sentiment fields after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub sentiment: Sentiment,
    pub sentiment_score: f64,
    pub keywords: Vec<String>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            sentiment: DEFAULT_SENTIMENT,
            sentiment_score: DEFAULT_SENTIMENT_SCORE,
            keywords: Vec::new(),
        }
    }
}

impl From<RawAnalysis> for Analysis {
    /// Unknown labels become neutral, scores are clamped to [0, 1] (0.5 when
    /// missing or NaN), keywords are trimmed and capped at eight.
    fn from(raw: RawAnalysis) -> Self {
        let sentiment = raw
            .sentiment
            .and_then(|label| label.trim().to_lowercase().parse::<Sentiment>().ok())
            .unwrap_or(DEFAULT_SENTIMENT);

        let sentiment_score = raw
            .sentiment_score
            .filter(|s| !s.is_nan())
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_SENTIMENT_SCORE);

        let keywords = raw
            .keywords
            .unwrap_or_default()
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .take(MAX_KEYWORDS)
            .collect();

        Self {
            sentiment,
            sentiment_score,
            keywords,
        }
    }
}

pub struct EnrichmentOrchestrator {
    store: Arc<dyn ResponseStore>,
    client: Arc<dyn EnrichmentClient>,
    call_timeout: Duration,
}

impl EnrichmentOrchestrator {
    pub fn new(
        store: Arc<dyn ResponseStore>,
        client: Arc<dyn EnrichmentClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            call_timeout,
        }
    }

    /// Runs all three steps for one response.
    ///
    /// Returns `Err` only when the final commit fails; the row then stays
    /// pending with no `processed_at`.
    pub async fn enrich(&self, job: &EnrichmentJob) -> Result<EnrichmentReport, AppError> {
        let id = job.response_id;
        let language = job.language.as_deref();
        tracing::info!("🎙️ Enriching response {}", id);

        // Step 1: transcribe
        let transcription = self
            .bounded("transcription", self.client.transcribe(&job.audio_url, language))
            .await;
        let (working_text, transcribed) = match transcription {
            Ok(text) => (text, true),
            Err(e) => {
                tracing::warn!(
                    "✗ Transcription failed for response {}, using submitted text: {}",
                    id,
                    e
                );
                (job.fallback_text.clone().unwrap_or_default(), false)
            }
        };

        // Step 2: analyze
        let (analysis, analyzed) = if working_text.trim().is_empty() {
            tracing::warn!(
                "✗ Response {} has no text to analyze, applying default sentiment",
                id
            );
            (Analysis::default(), false)
        } else {
            match self
                .bounded("analysis", self.client.analyze(&working_text, language))
                .await
            {
                Ok(raw) => (Analysis::from(raw), true),
                Err(e) => {
                    tracing::warn!(
                        "✗ Analysis failed for response {}, applying default sentiment: {}",
                        id,
                        e
                    );
                    (Analysis::default(), false)
                }
            }
        };

        // Step 3: commit
        let fields = EnrichedFields {
            transcription: Some(working_text).filter(|t| !t.trim().is_empty()),
            sentiment: analysis.sentiment,
            sentiment_score: analysis.sentiment_score,
            keywords: analysis.keywords,
            processed_at: Utc::now(),
        };

        if let Err(e) = self.store.commit_enrichment(id, fields).await {
            tracing::error!(
                "✗ Enrichment commit failed for response {}, row stays pending: {}",
                id,
                e
            );
            return Err(e);
        }

        let report = EnrichmentReport {
            transcribed,
            analyzed,
        };
        if report.is_degraded() {
            tracing::info!("✓ Response {} enriched with defaults ({:?})", id, report);
        } else {
            tracing::info!("✓ Response {} enriched", id);
        }
        Ok(report)
    }

    /// Applies the per-call timeout; an elapsed timeout counts as a failure.
    async fn bounded<T>(
        &self,
        step: &str,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::ExternalApiError(format!(
                "{} timed out after {}s",
                step,
                self.call_timeout.as_secs_f64()
            ))),
        }
    }
}
