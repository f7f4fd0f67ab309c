use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Implements string conversions and text-column storage for a closed set of labels.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                Ok(text.parse::<$name>()?)
            }
        }
    };
}

// ============ Enumerations ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

text_enum!(Sentiment {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Trial,
    Basic,
    Premium,
}

text_enum!(SubscriptionTier {
    Trial => "trial",
    Basic => "basic",
    Premium => "premium",
});

/// Where a response sits in the enrichment lifecycle.
///
/// Text-only responses never enter enrichment and stay `NotRequired`.
/// Responses with audio start `Pending` and move to `Enriched` exactly once,
/// together with `processed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    NotRequired,
    Pending,
    Enriched,
}

text_enum!(EnrichmentStatus {
    NotRequired => "not_required",
    Pending => "pending",
    Enriched => "enriched",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Rating,
    Text,
    Voice,
}

// ============ Database Models ============

/// Optional postal/geographic location of a business.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BusinessLocation {
    pub address: Option<String>,
    pub city: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Tenant account representing one restaurant.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Business {
    pub id: Uuid,
    /// Contact phone in E.164 form, unique across businesses.
    pub phone: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<BusinessLocation>)]
    pub location: Option<Json<BusinessLocation>>,
    pub website_url: Option<String>,
    pub is_active: bool,
    pub subscription_tier: SubscriptionTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Question {
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub text: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// A question set bound to one business and one QR token.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Survey {
    pub id: Uuid,
    pub business_id: Uuid,
    /// Globally unique public lookup key for anonymous respondents.
    pub qr_code: String,
    #[schema(value_type = Vec<Question>)]
    pub questions: Json<Vec<Question>>,
    pub languages: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One respondent's submission against one survey.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Response {
    pub id: Uuid,
    pub survey_id: Uuid,
    /// Denormalized from the survey so filter queries avoid a join.
    pub business_id: Uuid,
    pub rating: i16,
    pub transcription: Option<String>,
    pub audio_url: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_score: Option<f64>,
    pub keywords: Option<Vec<String>>,
    pub language: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub is_spam: bool,
    pub spam_at: Option<DateTime<Utc>>,
    pub is_flagged: Option<bool>,
    pub flagged_at: Option<DateTime<Utc>>,
    pub is_addressed: Option<bool>,
    pub addressed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl Response {
    pub fn has_audio(&self) -> bool {
        self.audio_url.is_some()
    }

    /// Audio was submitted but enrichment has not committed yet.
    pub fn is_pending_enrichment(&self) -> bool {
        self.enrichment_status == EnrichmentStatus::Pending
    }
}

// ============ Request / Response payloads ============

/// Body of `POST /api/v1/responses`.
///
/// Required fields are optional here so that missing values surface as a
/// validation error instead of a deserialization rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponseRequest {
    pub survey_id: Option<String>,
    pub business_id: Option<String>,
    /// Integer 1-5.
    #[schema(value_type = Option<i64>)]
    pub rating: Option<Value>,
    pub text: Option<String>,
    pub audio_url: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponseResult {
    pub success: bool,
    pub response: Response,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResponsePage {
    pub success: bool,
    pub responses: Vec<Response>,
    /// Exact count of all rows matching the filters, not the page length.
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewBusinessRequest {
    pub phone: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub location: Option<BusinessLocation>,
    pub website_url: Option<String>,
    pub subscription_tier: Option<SubscriptionTier>,
}

/// Partial update: absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateBusinessRequest {
    pub phone: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub location: Option<BusinessLocation>,
    pub website_url: Option<String>,
    pub is_active: Option<bool>,
    pub subscription_tier: Option<SubscriptionTier>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewSurveyRequest {
    pub business_id: Option<Uuid>,
    pub qr_code: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSurveyRequest {
    pub business_name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// One of `ar`, `fr`, `en`.
    pub language: Option<String>,
}

/// Validated input for question generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyBrief {
    pub business_name: String,
    pub category: String,
    pub description: String,
    pub language: SurveyLanguage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SurveyLanguage {
    Ar,
    Fr,
    En,
}

text_enum!(SurveyLanguage {
    Ar => "ar",
    Fr => "fr",
    En => "en",
});

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateSurveyResult {
    pub success: bool,
    pub questions: Vec<Question>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AudioUploadResult {
    pub success: bool,
    pub url: String,
    pub filename: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_labels_round_trip_through_strings() {
        for sentiment in Sentiment::ALL {
            assert_eq!(sentiment.as_str().parse::<Sentiment>().unwrap(), *sentiment);
        }
        assert!("Positive".parse::<Sentiment>().is_err());
    }

    #[test]
    fn question_type_uses_the_type_key() {
        let raw = serde_json::json!({"type": "rating", "text": "How was it?", "required": true});
        let question: Question = serde_json::from_value(raw).unwrap();
        assert_eq!(question.kind, QuestionType::Rating);
        assert!(question.required);

        let back = serde_json::to_value(&question).unwrap();
        assert_eq!(back["type"], "rating");
        assert!(back.get("options").is_none());
    }

    #[test]
    fn enrichment_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(EnrichmentStatus::NotRequired).unwrap(),
            "not_required"
        );
        assert_eq!(EnrichmentStatus::NotRequired.as_str(), "not_required");
    }
}
