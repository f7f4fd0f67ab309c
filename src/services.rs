use crate::circuit_breaker::{create_provider_circuit_breaker, ProviderBreaker};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Question, QuestionType, SurveyBrief, SurveyLanguage};
use crate::object_store::{audio_extension, MAX_AUDIO_BYTES};
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

/// Analysis output as returned by the provider, before normalization.
///
/// Any field may be missing or out of range; the orchestrator applies the
/// documented defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAnalysis {
    pub sentiment: Option<String>,
    pub sentiment_score: Option<f64>,
    pub keywords: Option<Vec<String>>,
}

/// Enrichment Client: transcription and analysis against an AI provider.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Downloads the audio object and returns its transcription.
    /// `language` is a hint; `None` lets the provider auto-detect.
    async fn transcribe(&self, audio_url: &str, language: Option<&str>)
        -> Result<String, AppError>;

    async fn analyze(&self, text: &str, language: Option<&str>) -> Result<RawAnalysis, AppError>;
}

/// AI-assisted survey question generation.
#[async_trait]
pub trait SurveyGenerator: Send + Sync {
    async fn generate_questions(&self, brief: &SurveyBrief) -> Result<Vec<Question>, AppError>;
}

const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert sentiment analysis and keyword extraction system for restaurant feedback. Analyze customer feedback and provide accurate sentiment classification and relevant keywords.";

const SURVEY_SYSTEM_PROMPT: &str = "You are an expert survey designer specializing in restaurant feedback collection. Generate exactly 3 relevant questions for restaurant feedback surveys.";

fn too_large() -> AppError {
    AppError::ExternalApiError(format!(
        "Audio object exceeds {} bytes",
        MAX_AUDIO_BYTES
    ))
}

/// Client for an OpenAI-compatible API (chat completions + audio transcriptions).
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    analysis_model: String,
    transcription_model: String,
    fence: Regex,
    breaker: ProviderBreaker,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Self::with_base_url(
            &config.openai_base_url,
            &config.openai_api_key,
            &config.analysis_model,
            &config.transcription_model,
            config.enrichment_timeout(),
        )
    }

    /// `timeout` bounds every request made by this client, so a hung
    /// provider surfaces as an error the circuit breaker can count.
    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        analysis_model: &str,
        transcription_model: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("feedback-api/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            analysis_model: analysis_model.to_string(),
            transcription_model: transcription_model.to_string(),
            fence: fence_pattern()?,
            breaker: create_provider_circuit_breaker(),
        })
    }

    /// Runs a provider call through the circuit breaker.
    async fn guarded<T, F>(&self, call: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.breaker.call(call).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::ExternalApiError(
                "AI provider circuit is open, call rejected".to_string(),
            )),
        }
    }

    async fn download_audio(&self, audio_url: &str) -> Result<(Vec<u8>, String), AppError> {
        let mut response = self.client.get(audio_url).send().await.map_err(|e| {
            AppError::ExternalApiError(format!("Audio download failed: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApiError(format!(
                "Audio download returned status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| ct.starts_with("audio/"))
            .unwrap_or("audio/webm")
            .to_string();

        if let Some(len) = response.content_length() {
            if len > MAX_AUDIO_BYTES as u64 {
                return Err(too_large());
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            AppError::ExternalApiError(format!("Audio download failed: {}", e))
        })? {
            if bytes.len() + chunk.len() > MAX_AUDIO_BYTES {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!("Downloaded {} bytes of {}", bytes.len(), content_type);
        Ok((bytes, content_type))
    }

    async fn request_transcription(
        &self,
        audio_url: &str,
        language: Option<&str>,
    ) -> Result<String, AppError> {
        let (bytes, content_type) = self.download_audio(audio_url).await?;

        let file_name = format!("audio.{}", audio_extension(&content_type));
        let file = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&content_type)
            .map_err(|e| AppError::ExternalApiError(format!("Invalid audio type: {}", e)))?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", self.transcription_model.clone())
            .text("response_format", "text")
            .text("temperature", "0");
        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Transcription request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Transcription returned status {}: {}",
                status, error_text
            )));
        }

        let text = response.text().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to read transcription: {}", e))
        })?;
        let text = text.trim();

        if text.is_empty() {
            return Err(AppError::ExternalApiError(
                "No transcription generated, audio may be too short or unclear".to_string(),
            ));
        }

        Ok(text.to_string())
    }

    /// Sends one chat completion and returns the first choice's content.
    async fn chat(&self, system: &str, user: String, temperature: f64) -> Result<String, AppError> {
        let body = json!({
            "model": self.analysis_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": temperature,
            "max_tokens": 500,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Completion returned status {}: {}",
                status, error_text
            )));
        }

        let payload: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse completion response: {}", e))
        })?;

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::ExternalApiError("No response from AI provider".to_string()))
    }

    fn strip_fences<'a>(&self, content: &'a str) -> std::borrow::Cow<'a, str> {
        self.fence.replace_all(content.trim(), "")
    }
}

#[async_trait]
impl EnrichmentClient for OpenAiClient {
    async fn transcribe(
        &self,
        audio_url: &str,
        language: Option<&str>,
    ) -> Result<String, AppError> {
        self.guarded(self.request_transcription(audio_url, language))
            .await
    }

    async fn analyze(&self, text: &str, language: Option<&str>) -> Result<RawAnalysis, AppError> {
        let prompt = analysis_prompt(text, language.unwrap_or("auto"));
        let content = self
            .guarded(self.chat(ANALYSIS_SYSTEM_PROMPT, prompt, 0.1))
            .await?;
        parse_analysis(&self.strip_fences(&content))
    }
}

#[async_trait]
impl SurveyGenerator for OpenAiClient {
    async fn generate_questions(&self, brief: &SurveyBrief) -> Result<Vec<Question>, AppError> {
        let content = self
            .guarded(self.chat(SURVEY_SYSTEM_PROMPT, survey_prompt(brief), 0.7))
            .await?;
        parse_questions(&self.strip_fences(&content))
    }
}

/// Matches markdown code fence markers (```json or ```) with an optional newline.
pub fn fence_pattern() -> Result<Regex, AppError> {
    Regex::new(r"```(?:json)?\n?")
        .map_err(|e| AppError::InternalError(format!("Invalid fence pattern: {}", e)))
}

fn analysis_prompt(text: &str, language: &str) -> String {
    format!(
        r#"
Analyze this restaurant feedback and provide:

1. Sentiment: positive, neutral, or negative
2. Sentiment score: 0.0 to 1.0 (0.0 = very negative, 1.0 = very positive)
3. Keywords: Extract 3-8 relevant keywords/topics

Text: "{text}"

Language: {language}

Categories for keywords:
- Food Quality (taste, freshness, temperature, presentation)
- Service (speed, friendliness, attentiveness, professionalism)
- Cleanliness (hygiene, presentation, environment)
- Ambiance (noise, decor, comfort, atmosphere)
- Value (pricing, portion size, worth)
- Specific items (menu dishes, drinks mentioned)

Return ONLY a JSON object with this exact format:
{{
  "sentiment": "positive",
  "sentimentScore": 0.85,
  "keywords": ["food quality", "service", "atmosphere"]
}}

Guidelines:
- Be accurate and objective
- Consider context and tone
- Handle mixed language (Arabic/French/English)
- Understand cultural expressions
- Focus on actionable insights
"#
    )
}

fn survey_prompt(brief: &SurveyBrief) -> String {
    let language_instruction = match brief.language {
        SurveyLanguage::Ar => "Generate questions in Arabic (العربية). Use simple, clear language.",
        SurveyLanguage::Fr => "Generate questions in French. Use simple, clear language.",
        SurveyLanguage::En => "Generate questions in English. Use simple, clear language.",
    };

    format!(
        r#"
Create exactly 3 survey questions for this restaurant:

Business: {name}
Category: {category}
Description: {description}

Requirements:
- {language_instruction}
- Questions should be simple and easy to understand
- First question should be a rating (1-5 stars)
- Second and third questions should be open-ended text questions
- All text questions support both typing and voice recording
- Questions should be relevant to restaurant experience
- Keep questions short (max 10 words each)

Return ONLY a JSON array with this exact format:
[
  {{"type": "rating", "text": "How was your overall experience?", "required": true}},
  {{"type": "text", "text": "What did you like most?", "required": false}},
  {{"type": "text", "text": "What can we improve?", "required": false}}
]
"#,
        name = brief.business_name,
        category = brief.category,
        description = brief.description,
    )
}

/// Reads the analysis JSON object. Fields of the wrong type are treated as absent.
pub fn parse_analysis(content: &str) -> Result<RawAnalysis, AppError> {
    let value: Value = serde_json::from_str(content.trim()).map_err(|e| {
        AppError::ExternalApiError(format!("Failed to parse analysis response: {}", e))
    })?;

    Ok(RawAnalysis {
        sentiment: value
            .get("sentiment")
            .and_then(Value::as_str)
            .map(str::to_string),
        sentiment_score: value.get("sentimentScore").and_then(Value::as_f64),
        keywords: value.get("keywords").and_then(Value::as_array).map(|words| {
            words
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        }),
    })
}

/// Reads the generated question array; anything but exactly three entries is rejected.
pub fn parse_questions(content: &str) -> Result<Vec<Question>, AppError> {
    let value: Value = serde_json::from_str(content.trim()).map_err(|e| {
        AppError::ExternalApiError(format!("Failed to parse survey questions: {}", e))
    })?;

    let entries = value
        .as_array()
        .filter(|items| items.len() == 3)
        .ok_or_else(|| {
            AppError::ExternalApiError("Survey generation returned an invalid format".to_string())
        })?;

    Ok(entries
        .iter()
        .map(|q| Question {
            kind: match q.get("type").and_then(Value::as_str) {
                Some("rating") => QuestionType::Rating,
                Some("voice") => QuestionType::Voice,
                _ => QuestionType::Text,
            },
            text: q
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            required: q.get("required").and_then(Value::as_bool).unwrap_or(false),
            options: None,
        })
        .collect())
}

/// Questions served when generation fails.
pub fn default_questions(language: SurveyLanguage) -> Vec<Question> {
    let [overall, liked, improve] = match language {
        SurveyLanguage::Ar => [
            "كيف كانت تجربتك الإجمالية؟",
            "ما الذي أعجبك أكثر؟",
            "ما الذي يمكننا تحسينه؟",
        ],
        SurveyLanguage::Fr => [
            "Comment était votre expérience globale ?",
            "Qu'est-ce qui vous a le plus plu ?",
            "Que pouvons-nous améliorer ?",
        ],
        SurveyLanguage::En => [
            "How was your overall experience?",
            "What did you like most?",
            "What can we improve?",
        ],
    };

    vec![
        Question {
            kind: QuestionType::Rating,
            text: overall.to_string(),
            required: true,
            options: None,
        },
        Question {
            kind: QuestionType::Text,
            text: liked.to_string(),
            required: false,
            options: None,
        },
        Question {
            kind: QuestionType::Text,
            text: improve.to_string(),
            required: false,
            options: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped_before_parsing() {
        let fence = fence_pattern().unwrap();
        let content = "```json\n{\"sentiment\": \"negative\", \"sentimentScore\": 0.1, \"keywords\": [\"food\", \"cold\"]}\n```";
        let cleaned = fence.replace_all(content, "");
        let analysis = parse_analysis(&cleaned).unwrap();

        assert_eq!(analysis.sentiment.as_deref(), Some("negative"));
        assert_eq!(analysis.sentiment_score, Some(0.1));
        assert_eq!(
            analysis.keywords,
            Some(vec!["food".to_string(), "cold".to_string()])
        );
    }

    #[test]
    fn wrongly_typed_analysis_fields_are_absent() {
        let analysis =
            parse_analysis(r#"{"sentiment": 3, "sentimentScore": "high", "keywords": "food"}"#)
                .unwrap();
        assert_eq!(analysis, RawAnalysis::default());
    }

    #[test]
    fn non_json_analysis_is_an_error() {
        assert!(parse_analysis("The customer seems happy.").is_err());
    }

    #[test]
    fn question_parsing_requires_exactly_three() {
        let two = r#"[{"type":"rating","text":"a"},{"type":"text","text":"b"}]"#;
        assert!(parse_questions(two).is_err());

        let three = r#"[{"type":"rating","text":"a","required":true},{"text":"b"},{"type":"text","text":"c"}]"#;
        let questions = parse_questions(three).unwrap();
        assert_eq!(questions[0].kind, QuestionType::Rating);
        assert!(questions[0].required);
        assert_eq!(questions[1].kind, QuestionType::Text);
        assert!(!questions[1].required);
    }

    #[test]
    fn defaults_exist_for_every_language() {
        for language in SurveyLanguage::ALL {
            let questions = default_questions(*language);
            assert_eq!(questions.len(), 3);
            assert_eq!(questions[0].kind, QuestionType::Rating);
            assert!(questions[1..].iter().all(|q| q.kind == QuestionType::Text));
        }
        assert_eq!(
            default_questions(SurveyLanguage::Fr)[2].text,
            "Que pouvons-nous améliorer ?"
        );
    }
}
