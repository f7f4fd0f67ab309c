use crate::errors::AppError;
use crate::filters::{Page, ResponseQuery};
use crate::models::{Business, EnrichmentStatus, Response, Survey};
use crate::store::{
    BusinessChanges, EnrichedFields, NewBusiness, NewResponse, NewSurvey, ResponseAction,
    ResponseStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    businesses: HashMap<Uuid, Business>,
    surveys: HashMap<Uuid, Survey>,
    responses: HashMap<Uuid, Response>,
}

/// In-process store evaluating [`ResponseQuery`] as a predicate.
///
/// Fault switches let tests exercise the commit-failure and
/// filter-resolution-failure paths.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_commits: AtomicBool,
    fail_survey_lookups: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `commit_enrichment` fail until switched off.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Makes every `resolve_survey_ids` fail until switched off.
    pub fn fail_survey_lookups(&self, fail: bool) {
        self.fail_survey_lookups.store(fail, Ordering::SeqCst);
    }

    /// Inserts a fully formed row, bypassing ingestion. Used to seed fixtures
    /// with explicit timestamps and moderation flags.
    pub fn seed_response(&self, response: Response) -> Result<(), AppError> {
        self.write()?.responses.insert(response.id, response);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, AppError> {
        self.tables
            .read()
            .map_err(|_| AppError::InternalError("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, AppError> {
        self.tables
            .write()
            .map_err(|_| AppError::InternalError("memory store lock poisoned".into()))
    }

    fn matching(&self, query: &ResponseQuery) -> Result<Vec<Response>, AppError> {
        if *query == ResponseQuery::Nothing {
            return Ok(Vec::new());
        }
        let tables = self.read()?;
        let mut rows: Vec<Response> = tables
            .responses
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn insert_response(&self, new: NewResponse) -> Result<Response, AppError> {
        let response = Response {
            id: Uuid::new_v4(),
            survey_id: new.survey_id,
            business_id: new.business_id,
            rating: new.rating,
            transcription: new.transcription,
            audio_url: new.audio_url,
            sentiment: None,
            sentiment_score: None,
            keywords: None,
            language: new.language,
            ip_address: Some(new.ip_address),
            user_agent: Some(new.user_agent),
            enrichment_status: new.enrichment_status,
            created_at: Utc::now(),
            processed_at: None,
            is_spam: false,
            spam_at: None,
            is_flagged: None,
            flagged_at: None,
            is_addressed: None,
            addressed_at: None,
            notes: None,
        };
        self.write()?
            .responses
            .insert(response.id, response.clone());
        Ok(response)
    }

    async fn commit_enrichment(&self, id: Uuid, fields: EnrichedFields) -> Result<(), AppError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        let mut tables = self.write()?;
        let row = tables
            .responses
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Response {} not found", id)))?;
        row.transcription = fields.transcription;
        row.sentiment = Some(fields.sentiment);
        row.sentiment_score = Some(fields.sentiment_score);
        row.keywords = Some(fields.keywords);
        row.processed_at = Some(fields.processed_at);
        row.enrichment_status = EnrichmentStatus::Enriched;
        Ok(())
    }

    async fn get_response(&self, id: Uuid) -> Result<Option<Response>, AppError> {
        Ok(self.read()?.responses.get(&id).cloned())
    }

    async fn delete_response(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.write()?.responses.remove(&id).is_some())
    }

    async fn apply_action(
        &self,
        id: Uuid,
        action: &ResponseAction,
        at: DateTime<Utc>,
    ) -> Result<Option<Response>, AppError> {
        let mut tables = self.write()?;
        Ok(tables.responses.get_mut(&id).map(|row| {
            action.apply_to(row, at);
            row.clone()
        }))
    }

    async fn list_responses(
        &self,
        query: &ResponseQuery,
        page: Page,
    ) -> Result<Vec<Response>, AppError> {
        // Page offsets are bounded by u32 * u32 and fit in usize on 64-bit targets.
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        Ok(self
            .matching(query)?
            .into_iter()
            .skip(offset)
            .take(page.size as usize)
            .collect())
    }

    async fn count_responses(&self, query: &ResponseQuery) -> Result<i64, AppError> {
        Ok(self.matching(query)?.len() as i64)
    }

    async fn fetch_responses(&self, query: &ResponseQuery) -> Result<Vec<Response>, AppError> {
        self.matching(query)
    }

    async fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Response>, AppError> {
        let tables = self.read()?;
        let mut rows: Vec<Response> = tables
            .responses
            .values()
            .filter(|r| r.is_pending_enrichment() && r.created_at < created_before)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn resolve_survey_ids(
        &self,
        business_id: Uuid,
        qr_codes: &[String],
    ) -> Result<Vec<Uuid>, AppError> {
        if self.fail_survey_lookups.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .read()?
            .surveys
            .values()
            .filter(|s| s.business_id == business_id && qr_codes.contains(&s.qr_code))
            .map(|s| s.id)
            .collect())
    }

    async fn create_survey(&self, new: NewSurvey) -> Result<Survey, AppError> {
        let mut tables = self.write()?;
        if tables.surveys.values().any(|s| s.qr_code == new.qr_code) {
            return Err(AppError::Conflict(format!(
                "QR code '{}' is already in use",
                new.qr_code
            )));
        }
        let now = Utc::now();
        let survey = Survey {
            id: Uuid::new_v4(),
            business_id: new.business_id,
            qr_code: new.qr_code,
            questions: Json(new.questions),
            languages: new.languages,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.surveys.insert(survey.id, survey.clone());
        Ok(survey)
    }

    async fn list_surveys(&self, business_id: Uuid) -> Result<Vec<Survey>, AppError> {
        let mut surveys: Vec<Survey> = self
            .read()?
            .surveys
            .values()
            .filter(|s| s.business_id == business_id)
            .cloned()
            .collect();
        surveys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(surveys)
    }

    async fn survey_by_qr(&self, qr_code: &str) -> Result<Option<Survey>, AppError> {
        Ok(self
            .read()?
            .surveys
            .values()
            .find(|s| s.qr_code == qr_code)
            .cloned())
    }

    async fn create_business(&self, new: NewBusiness) -> Result<Business, AppError> {
        let mut tables = self.write()?;
        if tables.businesses.values().any(|b| b.phone == new.phone) {
            return Err(AppError::Conflict(format!(
                "A business with phone {} already exists",
                new.phone
            )));
        }
        let now = Utc::now();
        let business = Business {
            id: Uuid::new_v4(),
            phone: new.phone,
            name: new.name,
            category: new.category,
            description: new.description,
            location: new.location.map(Json),
            website_url: new.website_url,
            is_active: true,
            subscription_tier: new.subscription_tier,
            created_at: now,
            updated_at: now,
        };
        tables.businesses.insert(business.id, business.clone());
        Ok(business)
    }

    async fn get_business(&self, id: Uuid) -> Result<Option<Business>, AppError> {
        Ok(self.read()?.businesses.get(&id).cloned())
    }

    async fn business_by_phone(&self, phone: &str) -> Result<Option<Business>, AppError> {
        Ok(self
            .read()?
            .businesses
            .values()
            .find(|b| b.phone == phone)
            .cloned())
    }

    async fn update_business(
        &self,
        id: Uuid,
        changes: BusinessChanges,
    ) -> Result<Option<Business>, AppError> {
        let mut tables = self.write()?;
        if let Some(ref phone) = changes.phone {
            if tables
                .businesses
                .values()
                .any(|b| b.id != id && &b.phone == phone)
            {
                return Err(AppError::Conflict(format!(
                    "A business with phone {} already exists",
                    phone
                )));
            }
        }
        Ok(tables.businesses.get_mut(&id).map(|b| {
            changes.apply_to(b, Utc::now());
            b.clone()
        }))
    }
}
