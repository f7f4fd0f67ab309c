//! Persistence Gateway.
//!
//! [`ResponseStore`] is the only way the service reaches its tables. `PgStore`
//! (in `db_storage`) is the production implementation, `MemoryStore` the
//! in-process one used by tests and local runs.

use crate::errors::AppError;
use crate::filters::{Page, ResponseQuery};
use crate::models::{
    Business, BusinessLocation, EnrichmentStatus, Question, Response, Sentiment, Survey,
    SubscriptionTier,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Validated base row written at submission time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResponse {
    pub survey_id: Uuid,
    pub business_id: Uuid,
    pub rating: i16,
    pub transcription: Option<String>,
    pub audio_url: Option<String>,
    pub language: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub enrichment_status: EnrichmentStatus,
}

/// The single enrichment write-back. Committing it moves the row to `Enriched`.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedFields {
    pub transcription: Option<String>,
    pub sentiment: Sentiment,
    pub sentiment_score: f64,
    pub keywords: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// Operator moderation actions on one response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseAction {
    MarkAddressed,
    UnmarkAddressed,
    Flag,
    Unflag,
    MarkSpam,
    UnmarkSpam,
    UpdateNotes(Option<String>),
}

impl ResponseAction {
    /// Parses the `{action, data}` body of a PATCH request.
    pub fn parse(action: &str, data: Option<&Value>) -> Result<Self, AppError> {
        Ok(match action {
            "mark_addressed" => ResponseAction::MarkAddressed,
            "unmark_addressed" => ResponseAction::UnmarkAddressed,
            "flag" => ResponseAction::Flag,
            "unflag" => ResponseAction::Unflag,
            "mark_spam" => ResponseAction::MarkSpam,
            "unmark_spam" => ResponseAction::UnmarkSpam,
            "update_notes" => {
                let notes = match data.and_then(|d| d.get("notes")) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(_) => {
                        return Err(AppError::Validation("data.notes must be a string".into()))
                    }
                };
                ResponseAction::UpdateNotes(notes)
            }
            _ => return Err(AppError::Validation("Invalid action".into())),
        })
    }

    /// Applies the field changes (and their timestamp side effects) to a row.
    pub fn apply_to(&self, r: &mut Response, at: DateTime<Utc>) {
        match self {
            ResponseAction::MarkAddressed => {
                r.is_addressed = Some(true);
                r.addressed_at = Some(at);
            }
            ResponseAction::UnmarkAddressed => {
                r.is_addressed = Some(false);
                r.addressed_at = None;
            }
            ResponseAction::Flag => {
                r.is_flagged = Some(true);
                r.flagged_at = Some(at);
            }
            ResponseAction::Unflag => {
                r.is_flagged = Some(false);
                r.flagged_at = None;
            }
            ResponseAction::MarkSpam => {
                r.is_spam = true;
                r.spam_at = Some(at);
            }
            ResponseAction::UnmarkSpam => {
                r.is_spam = false;
                r.spam_at = None;
            }
            ResponseAction::UpdateNotes(notes) => {
                r.notes = notes.clone();
            }
        }
    }
}

/// Normalized business profile, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBusiness {
    pub phone: String,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub location: Option<BusinessLocation>,
    pub website_url: Option<String>,
    pub subscription_tier: SubscriptionTier,
}

/// Normalized partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusinessChanges {
    pub phone: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub location: Option<BusinessLocation>,
    pub website_url: Option<String>,
    pub is_active: Option<bool>,
    pub subscription_tier: Option<SubscriptionTier>,
}

impl BusinessChanges {
    pub fn apply_to(self, b: &mut Business, at: DateTime<Utc>) {
        if let Some(phone) = self.phone {
            b.phone = phone;
        }
        if let Some(name) = self.name {
            b.name = name;
        }
        if self.category.is_some() {
            b.category = self.category;
        }
        if self.description.is_some() {
            b.description = self.description;
        }
        if let Some(location) = self.location {
            b.location = Some(sqlx::types::Json(location));
        }
        if self.website_url.is_some() {
            b.website_url = self.website_url;
        }
        if let Some(active) = self.is_active {
            b.is_active = active;
        }
        if let Some(tier) = self.subscription_tier {
            b.subscription_tier = tier;
        }
        b.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSurvey {
    pub business_id: Uuid,
    pub qr_code: String,
    pub questions: Vec<Question>,
    pub languages: Vec<String>,
}

#[async_trait]
pub trait ResponseStore: Send + Sync {
    // ---- responses ----

    async fn insert_response(&self, new: NewResponse) -> Result<Response, AppError>;

    /// Writes every enriched field and `processed_at` in one update.
    async fn commit_enrichment(&self, id: Uuid, fields: EnrichedFields) -> Result<(), AppError>;

    async fn get_response(&self, id: Uuid) -> Result<Option<Response>, AppError>;

    /// Returns `false` when no row had that id.
    async fn delete_response(&self, id: Uuid) -> Result<bool, AppError>;

    /// Last write wins; `None` when no row had that id.
    async fn apply_action(
        &self,
        id: Uuid,
        action: &ResponseAction,
        at: DateTime<Utc>,
    ) -> Result<Option<Response>, AppError>;

    /// One page ordered newest first.
    async fn list_responses(
        &self,
        query: &ResponseQuery,
        page: Page,
    ) -> Result<Vec<Response>, AppError>;

    /// Exact count of every row the query matches.
    async fn count_responses(&self, query: &ResponseQuery) -> Result<i64, AppError>;

    /// Every matching row, newest first, no pagination cap.
    async fn fetch_responses(&self, query: &ResponseQuery) -> Result<Vec<Response>, AppError>;

    /// Responses still pending enrichment that were created before `created_before`.
    async fn stale_pending(&self, created_before: DateTime<Utc>)
        -> Result<Vec<Response>, AppError>;

    // ---- surveys ----

    /// Ids of the business's surveys whose QR token is in `qr_codes`.
    async fn resolve_survey_ids(
        &self,
        business_id: Uuid,
        qr_codes: &[String],
    ) -> Result<Vec<Uuid>, AppError>;

    async fn create_survey(&self, new: NewSurvey) -> Result<Survey, AppError>;

    /// Newest first.
    async fn list_surveys(&self, business_id: Uuid) -> Result<Vec<Survey>, AppError>;

    async fn survey_by_qr(&self, qr_code: &str) -> Result<Option<Survey>, AppError>;

    // ---- businesses ----

    async fn create_business(&self, new: NewBusiness) -> Result<Business, AppError>;

    async fn get_business(&self, id: Uuid) -> Result<Option<Business>, AppError>;

    async fn business_by_phone(&self, phone: &str) -> Result<Option<Business>, AppError>;

    async fn update_business(
        &self,
        id: Uuid,
        changes: BusinessChanges,
    ) -> Result<Option<Business>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_named_action() {
        let names = [
            ("mark_addressed", ResponseAction::MarkAddressed),
            ("unmark_addressed", ResponseAction::UnmarkAddressed),
            ("flag", ResponseAction::Flag),
            ("unflag", ResponseAction::Unflag),
            ("mark_spam", ResponseAction::MarkSpam),
            ("unmark_spam", ResponseAction::UnmarkSpam),
        ];
        for (name, expected) in names {
            assert_eq!(ResponseAction::parse(name, None).unwrap(), expected);
        }

        let data = json!({"notes": "called the customer back"});
        assert_eq!(
            ResponseAction::parse("update_notes", Some(&data)).unwrap(),
            ResponseAction::UpdateNotes(Some("called the customer back".into()))
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(matches!(
            ResponseAction::parse("delete", None),
            Err(AppError::Validation(msg)) if msg == "Invalid action"
        ));
    }

    #[test]
    fn update_notes_requires_text_or_null() {
        let data = json!({"notes": 42});
        assert!(ResponseAction::parse("update_notes", Some(&data)).is_err());
        assert_eq!(
            ResponseAction::parse("update_notes", None).unwrap(),
            ResponseAction::UpdateNotes(None)
        );
    }
}
