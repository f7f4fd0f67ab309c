use crate::analytics::{AnalyticsSnapshot, SentimentBreakdown, TrendPoint};
use crate::filters::{DateRange, ResponseFilters};
use crate::handlers::{ActionRequest, AnalyticsResult, HealthStatus};
use crate::models::*;
use crate::worker::{DeliveryPolicy, RunnerStats};
use crate::{audio_handler, business_handler, handlers, survey_handler};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Feedback API",
        version = "0.1.0",
        description = "Restaurant feedback collection, enrichment and analytics"
    ),
    paths(
        handlers::health,
        handlers::submit_response,
        handlers::list_responses,
        handlers::get_response,
        handlers::update_response,
        handlers::delete_response,
        handlers::export_responses,
        handlers::get_analytics,
        business_handler::create_business,
        business_handler::find_business,
        business_handler::get_business,
        business_handler::update_business,
        survey_handler::create_survey,
        survey_handler::list_surveys,
        survey_handler::get_survey_by_qr,
        survey_handler::generate_survey,
        audio_handler::upload_audio,
    ),
    components(schemas(
        Response,
        Sentiment,
        EnrichmentStatus,
        SubmitResponseRequest,
        SubmitResponseResult,
        ResponsePage,
        ActionRequest,
        AnalyticsResult,
        AnalyticsSnapshot,
        SentimentBreakdown,
        TrendPoint,
        ResponseFilters,
        DateRange,
        HealthStatus,
        RunnerStats,
        DeliveryPolicy,
        Business,
        BusinessLocation,
        Coordinates,
        SubscriptionTier,
        NewBusinessRequest,
        UpdateBusinessRequest,
        Survey,
        Question,
        QuestionType,
        SurveyLanguage,
        NewSurveyRequest,
        GenerateSurveyRequest,
        GenerateSurveyResult,
        AudioUploadResult,
    )),
    tags(
        (name = "System", description = "Health and runner status"),
        (name = "Responses", description = "Submission, moderation and export"),
        (name = "Analytics", description = "Dashboard aggregates"),
        (name = "Businesses", description = "Restaurant profiles"),
        (name = "Surveys", description = "Question sets and QR lookup"),
        (name = "Audio", description = "Voice note uploads"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/responses",
            "/api/v1/responses/{id}",
            "/api/v1/responses/export",
            "/api/v1/analytics",
            "/api/v1/businesses",
            "/api/v1/surveys/qr/{qr_code}",
            "/api/v1/audio",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
