//! Router assembly shared by the server binary and the HTTP tests.

use crate::errors::AppError;
use crate::handlers::{self, AppState};
use crate::object_store::MAX_AUDIO_BYTES;
use crate::openapi::ApiDoc;
use crate::{audio_handler, business_handler, survey_handler};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Largest JSON body accepted on any route.
pub const MAX_JSON_BYTES: usize = 1024 * 1024;

/// Builds the full application router.
///
/// Respondent-facing routes (QR lookup, audio upload, submission) are rate
/// limited per client IP; `/health` and the docs bypass every limit.
pub fn build_router(state: Arc<AppState>) -> Result<Router, AppError> {
    // 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| AppError::InternalError("Invalid rate limiter settings".into()))?,
    );
    let rate_limit = GovernorLayer {
        config: governor_conf,
    };

    let public_routes = Router::new()
        .route(
            "/api/v1/surveys/qr/:qr_code",
            get(survey_handler::get_survey_by_qr),
        )
        .route("/api/v1/responses", post(handlers::submit_response))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(MAX_JSON_BYTES))
                .layer(rate_limit.clone()),
        );

    let upload_routes = Router::new()
        .route("/api/v1/audio", post(audio_handler::upload_audio))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_AUDIO_BYTES))
                .layer(rate_limit),
        );

    let operator_routes = Router::new()
        .route("/api/v1/responses", get(handlers::list_responses))
        .route("/api/v1/responses/export", get(handlers::export_responses))
        .route(
            "/api/v1/responses/:id",
            get(handlers::get_response)
                .patch(handlers::update_response)
                .delete(handlers::delete_response),
        )
        .route("/api/v1/analytics", get(handlers::get_analytics))
        .route(
            "/api/v1/businesses",
            post(business_handler::create_business).get(business_handler::find_business),
        )
        .route(
            "/api/v1/businesses/:id",
            get(business_handler::get_business).put(business_handler::update_business),
        )
        .route(
            "/api/v1/surveys",
            post(survey_handler::create_survey).get(survey_handler::list_surveys),
        )
        .route(
            "/api/v1/surveys/generate",
            post(survey_handler::generate_survey),
        )
        .layer(RequestBodyLimitLayer::new(MAX_JSON_BYTES));

    Ok(Router::new()
        .route("/health", get(handlers::health))
        .merge(public_routes)
        .merge(upload_routes)
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}
