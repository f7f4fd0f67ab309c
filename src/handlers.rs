use crate::analytics::{self, AnalyticsSnapshot};
use crate::enrichment::EnrichmentOrchestrator;
use crate::errors::AppError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::export;
use crate::filters::{self, FilterParams, Page, PageParams, ResponseFilters, ResponseQuery};
use crate::ingestion::{IngestionService, RequestMetadata};
use crate::models::*;
use crate::object_store::AudioStore;
use crate::services::{EnrichmentClient, SurveyGenerator};
use crate::store::{ResponseAction, ResponseStore};
use crate::worker::{EnrichmentRunner, RunnerStats};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistence Gateway.
    pub store: Arc<dyn ResponseStore>,
    pub ingestion: Arc<IngestionService>,
    /// Supervisor for background enrichment jobs.
    pub runner: EnrichmentRunner,
    pub generator: Arc<dyn SurveyGenerator>,
    /// Object store for audio uploads (optional; uploads are refused without it).
    pub audio_store: Option<Arc<dyn AudioStore>>,
    /// Public QR lookups, keyed by QR token.
    pub survey_cache: Cache<String, Survey>,
}

impl AppState {
    /// Wires the services together and starts the enrichment runner.
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn ResponseStore>,
        enrichment_client: Arc<dyn EnrichmentClient>,
        generator: Arc<dyn SurveyGenerator>,
        audio_store: Option<Arc<dyn AudioStore>>,
        enrichment_timeout: Duration,
        survey_cache_ttl: Duration,
    ) -> Self {
        let orchestrator = Arc::new(EnrichmentOrchestrator::new(
            store.clone(),
            enrichment_client,
            enrichment_timeout,
        ));
        let runner = EnrichmentRunner::start(orchestrator);
        let ingestion = Arc::new(IngestionService::new(store.clone(), runner.clone()));

        let survey_cache = Cache::builder()
            .time_to_live(survey_cache_ttl)
            .max_capacity(10_000)
            .build();

        Self {
            store,
            ingestion,
            runner,
            generator,
            audio_store,
            survey_cache,
        }
    }

    /// Parses filters and plans the shared query for one business.
    pub async fn plan_query(
        &self,
        business_id: Uuid,
        params: FilterParams,
    ) -> Result<(ResponseFilters, ResponseQuery), AppError> {
        let filters = params.into_filters(Utc::now())?;
        let query = filters::build_query(self.store.as_ref(), business_id, &filters).await?;
        Ok((filters, query))
    }
}

/// `business_id` query parameter required by the dashboard routes.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BusinessScope {
    pub business_id: Option<String>,
}

impl BusinessScope {
    pub fn require(&self) -> Result<Uuid, AppError> {
        let raw = self
            .business_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("business_id is required".to_string()))?;
        Uuid::parse_str(raw)
            .map_err(|_| AppError::Validation("business_id must be a valid UUID".to_string()))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub enrichment: RunnerStats,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResult {
    pub success: bool,
    pub analytics: AnalyticsSnapshot,
    pub filters: ResponseFilters,
    pub generated_at: DateTime<Utc>,
}

/// Body of `PATCH /api/v1/responses/{id}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActionRequest {
    /// One of mark_addressed, unmark_addressed, flag, unflag, mark_spam, unmark_spam, update_notes.
    pub action: Option<String>,
    /// `{"notes": "..."}` for update_notes.
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
}

/// Health check endpoint.
///
/// Returns the service status plus the enrichment runner counters.
#[utoipa::path(get, path = "/health", tag = "System",
    responses((status = 200, description = "Service is up", body = HealthStatus)))]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthStatus>) {
    (
        StatusCode::OK,
        Json(HealthStatus {
            status: "healthy".to_string(),
            service: "feedback-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            enrichment: state.runner.stats(),
        }),
    )
}

/// POST /api/v1/responses
///
/// Anonymous respondents submit a rating with optional text or audio. Audio
/// responses are enriched in the background; the call returns once the row
/// is stored.
#[utoipa::path(post, path = "/api/v1/responses", tag = "Responses",
    request_body = SubmitResponseRequest,
    responses(
        (status = 200, description = "Response stored", body = SubmitResponseResult),
        (status = 400, description = "Missing field or rating outside 1-5"),
    ))]
pub async fn submit_response(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<SubmitResponseRequest>,
) -> Result<Json<SubmitResponseResult>, AppError> {
    let metadata = RequestMetadata::from_request(&headers, peer.map(|ConnectInfo(addr)| addr));
    let response = state.ingestion.submit(payload, metadata).await?;
    Ok(Json(SubmitResponseResult {
        success: true,
        response,
    }))
}

/// GET /api/v1/responses
///
/// One page of filtered responses, newest first, plus the exact total.
#[utoipa::path(get, path = "/api/v1/responses", tag = "Responses",
    params(BusinessScope, FilterParams, PageParams),
    responses((status = 200, description = "Page of responses", body = ResponsePage)))]
pub async fn list_responses(
    State(state): State<Arc<AppState>>,
    ApiQuery(scope): ApiQuery<BusinessScope>,
    ApiQuery(filter_params): ApiQuery<FilterParams>,
    ApiQuery(page_params): ApiQuery<PageParams>,
) -> Result<Json<ResponsePage>, AppError> {
    let business_id = scope.require()?;
    let page = Page::from(page_params);
    let (_, query) = state.plan_query(business_id, filter_params).await?;

    let responses = state.store.list_responses(&query, page).await?;
    let total = state.store.count_responses(&query).await?;

    tracing::debug!(
        "Listed {} of {} responses for business {}",
        responses.len(),
        total,
        business_id
    );

    Ok(Json(ResponsePage {
        success: true,
        responses,
        total,
        page: page.number,
        limit: page.size,
    }))
}

#[utoipa::path(get, path = "/api/v1/responses/{id}", tag = "Responses",
    params(("id" = Uuid, Path, description = "Response ID")),
    responses(
        (status = 200, description = "Response", body = Response),
        (status = 404, description = "Not found"),
    ))]
pub async fn get_response(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Response>, AppError> {
    state
        .store
        .get_response(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Response {} not found", id)))
}

/// PATCH /api/v1/responses/{id}
///
/// Applies one moderation action and returns the updated row.
#[utoipa::path(patch, path = "/api/v1/responses/{id}", tag = "Responses",
    params(("id" = Uuid, Path, description = "Response ID")),
    request_body = ActionRequest,
    responses(
        (status = 200, description = "Updated response", body = Response),
        (status = 400, description = "Invalid action"),
        (status = 404, description = "Not found"),
    ))]
pub async fn update_response(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<ActionRequest>,
) -> Result<Json<Response>, AppError> {
    let action = ResponseAction::parse(body.action.as_deref().unwrap_or(""), body.data.as_ref())?;

    let updated = state
        .store
        .apply_action(id, &action, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Response {} not found", id)))?;

    tracing::info!("Applied {:?} to response {}", action, id);
    Ok(Json(updated))
}

#[utoipa::path(delete, path = "/api/v1/responses/{id}", tag = "Responses",
    params(("id" = Uuid, Path, description = "Response ID")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 404, description = "Not found"),
    ))]
pub async fn delete_response(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !state.store.delete_response(id).await? {
        return Err(AppError::NotFound(format!("Response {} not found", id)));
    }
    tracing::info!("Deleted response {}", id);
    Ok(Json(json!({ "message": "Response deleted successfully" })))
}

/// GET /api/v1/responses/export
///
/// Every matching response as CSV, with no pagination cap.
#[utoipa::path(get, path = "/api/v1/responses/export", tag = "Responses",
    params(BusinessScope, FilterParams),
    responses((status = 200, description = "CSV download", content_type = "text/csv", body = String)))]
pub async fn export_responses(
    State(state): State<Arc<AppState>>,
    ApiQuery(scope): ApiQuery<BusinessScope>,
    ApiQuery(filter_params): ApiQuery<FilterParams>,
) -> Result<impl IntoResponse, AppError> {
    let business_id = scope.require()?;
    let (_, query) = state.plan_query(business_id, filter_params).await?;

    let responses = state.store.fetch_responses(&query).await?;
    let qr_codes: HashMap<Uuid, String> = state
        .store
        .list_surveys(business_id)
        .await?
        .into_iter()
        .map(|s| (s.id, s.qr_code))
        .collect();

    tracing::info!(
        "Exporting {} responses for business {}",
        responses.len(),
        business_id
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        export::export_filename(Utc::now().date_naive())
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export::to_csv(&responses, &qr_codes),
    ))
}

/// GET /api/v1/analytics
///
/// Aggregates every matching response; `totalResponses` is the exact count.
#[utoipa::path(get, path = "/api/v1/analytics", tag = "Analytics",
    params(BusinessScope, FilterParams),
    responses((status = 200, description = "Analytics snapshot", body = AnalyticsResult)))]
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    ApiQuery(scope): ApiQuery<BusinessScope>,
    ApiQuery(filter_params): ApiQuery<FilterParams>,
) -> Result<Json<AnalyticsResult>, AppError> {
    let business_id = scope.require()?;
    let (filters, query) = state.plan_query(business_id, filter_params).await?;

    let responses = state.store.fetch_responses(&query).await?;
    let mut snapshot = analytics::aggregate(&responses);
    snapshot.total_responses = state.store.count_responses(&query).await?;

    tracing::info!(
        "Analytics for business {}: {} responses, average {}",
        business_id,
        snapshot.total_responses,
        snapshot.average_rating
    );

    Ok(Json(AnalyticsResult {
        success: true,
        analytics: snapshot,
        filters,
        generated_at: Utc::now(),
    }))
}
