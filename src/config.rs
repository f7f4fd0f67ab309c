use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub analysis_model: String,
    pub transcription_model: String,
    /// Upper bound for each outbound enrichment call.
    pub enrichment_timeout_secs: u64,
    pub storage_url: Option<String>,
    pub storage_service_key: Option<String>,
    pub storage_bucket: String,
    pub survey_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("OPENAI_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            openai_base_url: http_url_or_default(
                "OPENAI_BASE_URL",
                "https://api.openai.com/v1",
            )?,
            analysis_model: std::env::var("OPENAI_ANALYSIS_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "gpt-4".to_string()),
            transcription_model: std::env::var("OPENAI_TRANSCRIPTION_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "whisper-1".to_string()),
            enrichment_timeout_secs: positive_secs("ENRICHMENT_TIMEOUT_SECS", 60)?,
            storage_url: optional_http_url("STORAGE_URL")?,
            storage_service_key: std::env::var("STORAGE_SERVICE_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            storage_bucket: std::env::var("STORAGE_BUCKET")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "audio-files".to_string()),
            survey_cache_ttl_secs: positive_secs("SURVEY_CACHE_TTL_SECS", 300)?,
        };

        if config.storage_url.is_some() != config.storage_service_key.is_some() {
            anyhow::bail!("STORAGE_URL and STORAGE_SERVICE_KEY must be set together");
        }

        // Never log keys; the database URL is truncated before it can reach credentials.
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("OpenAI Base URL: {}", config.openai_base_url);
        tracing::debug!(
            "Models: analysis={}, transcription={}",
            config.analysis_model,
            config.transcription_model
        );
        match config.storage_url {
            Some(ref url) => tracing::info!("Audio object store configured: {}", url),
            None => tracing::warn!("STORAGE_URL not set, audio uploads are disabled"),
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment_timeout_secs)
    }

    pub fn survey_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.survey_cache_ttl_secs)
    }
}

fn http_url_or_default(var: &str, default: &str) -> anyhow::Result<String> {
    Ok(optional_http_url(var)?.unwrap_or_else(|| default.to_string()))
}

fn optional_http_url(var: &str) -> anyhow::Result<Option<String>> {
    let Some(raw) = std::env::var(var).ok().filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", var, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", var);
    }
    Ok(Some(raw.trim().trim_end_matches('/').to_string()))
}

fn positive_secs(var: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds", var))?;
            if secs == 0 {
                anyhow::bail!("{} must be greater than zero", var);
            }
            Ok(secs)
        }
        _ => Ok(default),
    }
}
