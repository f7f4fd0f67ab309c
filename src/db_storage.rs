use crate::errors::{AppError, ResultExt};
use crate::filters::{Page, ResponseQuery};
use crate::models::{Business, EnrichmentStatus, Response, Survey};
use crate::store::{
    BusinessChanges, EnrichedFields, NewBusiness, NewResponse, NewSurvey, ResponseAction,
    ResponseStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Response columns, qualified for queries over `responses r`.
const RESPONSE_COLUMNS: &str = "r.id, r.survey_id, r.business_id, r.rating, r.transcription, \
     r.audio_url, r.sentiment, r.sentiment_score, r.keywords, r.language, r.ip_address, \
     r.user_agent, r.enrichment_status, r.created_at, r.processed_at, r.is_spam, r.spam_at, \
     r.is_flagged, r.flagged_at, r.is_addressed, r.addressed_at, r.notes";

const BUSINESS_COLUMNS: &str = "id, phone, name, category, description, location, website_url, \
     is_active, subscription_tier, created_at, updated_at";

const SURVEY_COLUMNS: &str =
    "id, business_id, qr_code, questions, languages, is_active, created_at, updated_at";

/// Postgres-backed Persistence Gateway.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `SELECT <columns> FROM responses r WHERE <predicate>`; `None` for a query
    /// that matches nothing.
    fn select(query: &ResponseQuery) -> Option<QueryBuilder<'static, Postgres>> {
        let ResponseQuery::Matching(predicate) = query else {
            return None;
        };
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM responses r", RESPONSE_COLUMNS));
        predicate.push_where(&mut qb);
        Some(qb)
    }
}

#[async_trait]
impl ResponseStore for PgStore {
    async fn insert_response(&self, new: NewResponse) -> Result<Response, AppError> {
        let sql = format!(
            r#"
            INSERT INTO responses AS r (
                id, survey_id, business_id, rating, transcription, audio_url,
                language, ip_address, user_agent, enrichment_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            RESPONSE_COLUMNS
        );

        sqlx::query_as::<_, Response>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.survey_id)
            .bind(new.business_id)
            .bind(new.rating)
            .bind(&new.transcription)
            .bind(&new.audio_url)
            .bind(&new.language)
            .bind(&new.ip_address)
            .bind(&new.user_agent)
            .bind(new.enrichment_status)
            .fetch_one(&self.pool)
            .await
            .context("inserting response")
    }

    async fn commit_enrichment(&self, id: Uuid, fields: EnrichedFields) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE responses
            SET transcription = $2,
                sentiment = $3,
                sentiment_score = $4,
                keywords = $5,
                processed_at = $6,
                enrichment_status = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&fields.transcription)
        .bind(fields.sentiment)
        .bind(fields.sentiment_score)
        .bind(&fields.keywords)
        .bind(fields.processed_at)
        .bind(EnrichmentStatus::Enriched)
        .execute(&self.pool)
        .await
        .with_context(|| format!("committing enrichment for response {}", id))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Response {} not found", id)));
        }
        Ok(())
    }

    async fn get_response(&self, id: Uuid) -> Result<Option<Response>, AppError> {
        let sql = format!("SELECT {} FROM responses r WHERE r.id = $1", RESPONSE_COLUMNS);
        sqlx::query_as::<_, Response>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn delete_response(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM responses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn apply_action(
        &self,
        id: Uuid,
        action: &ResponseAction,
        at: DateTime<Utc>,
    ) -> Result<Option<Response>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE responses AS r SET ");
        match action {
            ResponseAction::MarkAddressed => {
                qb.push("is_addressed = true, addressed_at = ").push_bind(at);
            }
            ResponseAction::UnmarkAddressed => {
                qb.push("is_addressed = false, addressed_at = NULL");
            }
            ResponseAction::Flag => {
                qb.push("is_flagged = true, flagged_at = ").push_bind(at);
            }
            ResponseAction::Unflag => {
                qb.push("is_flagged = false, flagged_at = NULL");
            }
            ResponseAction::MarkSpam => {
                qb.push("is_spam = true, spam_at = ").push_bind(at);
            }
            ResponseAction::UnmarkSpam => {
                qb.push("is_spam = false, spam_at = NULL");
            }
            ResponseAction::UpdateNotes(notes) => {
                qb.push("notes = ").push_bind(notes.clone());
            }
        }
        qb.push(" WHERE r.id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(RESPONSE_COLUMNS);

        qb.build_query_as::<Response>()
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("updating response {}", id))
    }

    async fn list_responses(
        &self,
        query: &ResponseQuery,
        page: Page,
    ) -> Result<Vec<Response>, AppError> {
        let Some(mut qb) = Self::select(query) else {
            return Ok(Vec::new());
        };
        qb.push(" ORDER BY r.created_at DESC, r.id DESC LIMIT ")
            .push_bind(i64::from(page.size))
            .push(" OFFSET ")
            .push_bind(page.offset());

        qb.build_query_as::<Response>()
            .fetch_all(&self.pool)
            .await
            .context("listing responses")
    }

    async fn count_responses(&self, query: &ResponseQuery) -> Result<i64, AppError> {
        let ResponseQuery::Matching(predicate) = query else {
            return Ok(0);
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM responses r");
        predicate.push_where(&mut qb);

        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .context("counting responses")
    }

    async fn fetch_responses(&self, query: &ResponseQuery) -> Result<Vec<Response>, AppError> {
        let Some(mut qb) = Self::select(query) else {
            return Ok(Vec::new());
        };
        qb.push(" ORDER BY r.created_at DESC, r.id DESC");

        qb.build_query_as::<Response>()
            .fetch_all(&self.pool)
            .await
            .context("fetching responses")
    }

    async fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Response>, AppError> {
        let sql = format!(
            "SELECT {} FROM responses r \
             WHERE r.enrichment_status = $1 AND r.created_at < $2 \
             ORDER BY r.created_at",
            RESPONSE_COLUMNS
        );
        sqlx::query_as::<_, Response>(&sql)
            .bind(EnrichmentStatus::Pending)
            .bind(created_before)
            .fetch_all(&self.pool)
            .await
            .context("listing pending responses")
    }

    async fn resolve_survey_ids(
        &self,
        business_id: Uuid,
        qr_codes: &[String],
    ) -> Result<Vec<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM surveys WHERE business_id = $1 AND qr_code = ANY($2)",
        )
        .bind(business_id)
        .bind(qr_codes)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn create_survey(&self, new: NewSurvey) -> Result<Survey, AppError> {
        let sql = format!(
            "INSERT INTO surveys (id, business_id, qr_code, questions, languages) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SURVEY_COLUMNS
        );
        sqlx::query_as::<_, Survey>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.business_id)
            .bind(&new.qr_code)
            .bind(Json(&new.questions))
            .bind(&new.languages)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn list_surveys(&self, business_id: Uuid) -> Result<Vec<Survey>, AppError> {
        let sql = format!(
            "SELECT {} FROM surveys WHERE business_id = $1 ORDER BY created_at DESC",
            SURVEY_COLUMNS
        );
        sqlx::query_as::<_, Survey>(&sql)
            .bind(business_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn survey_by_qr(&self, qr_code: &str) -> Result<Option<Survey>, AppError> {
        let sql = format!("SELECT {} FROM surveys WHERE qr_code = $1", SURVEY_COLUMNS);
        sqlx::query_as::<_, Survey>(&sql)
            .bind(qr_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn create_business(&self, new: NewBusiness) -> Result<Business, AppError> {
        let sql = format!(
            r#"
            INSERT INTO businesses (
                id, phone, name, category, description, location, website_url, subscription_tier
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            BUSINESS_COLUMNS
        );
        let business = sqlx::query_as::<_, Business>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.phone)
            .bind(&new.name)
            .bind(&new.category)
            .bind(&new.description)
            .bind(new.location.map(Json))
            .bind(&new.website_url)
            .bind(new.subscription_tier)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!("✓ Created business {} ({})", business.id, business.name);
        Ok(business)
    }

    async fn get_business(&self, id: Uuid) -> Result<Option<Business>, AppError> {
        let sql = format!("SELECT {} FROM businesses WHERE id = $1", BUSINESS_COLUMNS);
        sqlx::query_as::<_, Business>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn business_by_phone(&self, phone: &str) -> Result<Option<Business>, AppError> {
        let sql = format!("SELECT {} FROM businesses WHERE phone = $1", BUSINESS_COLUMNS);
        sqlx::query_as::<_, Business>(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn update_business(
        &self,
        id: Uuid,
        changes: BusinessChanges,
    ) -> Result<Option<Business>, AppError> {
        let sql = format!(
            r#"
            UPDATE businesses
            SET phone = COALESCE($2, phone),
                name = COALESCE($3, name),
                category = COALESCE($4, category),
                description = COALESCE($5, description),
                location = COALESCE($6, location),
                website_url = COALESCE($7, website_url),
                is_active = COALESCE($8, is_active),
                subscription_tier = COALESCE($9, subscription_tier),
                updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            BUSINESS_COLUMNS
        );
        sqlx::query_as::<_, Business>(&sql)
            .bind(id)
            .bind(&changes.phone)
            .bind(&changes.name)
            .bind(&changes.category)
            .bind(&changes.description)
            .bind(changes.location.map(Json))
            .bind(&changes.website_url)
            .bind(changes.is_active)
            .bind(changes.subscription_tier)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)
    }
}
