use chrono::Utc;
use std::env;
use uuid::Uuid;

use feedback_api::db::Database;
use feedback_api::db_storage::PgStore;
use feedback_api::filters::{build_query, FilterParams, Page, PageParams};
use feedback_api::models::{EnrichmentStatus, Question, QuestionType, Sentiment, SubscriptionTier};
use feedback_api::store::{EnrichedFields, NewBusiness, NewResponse, NewSurvey, ResponseAction, ResponseStore};

/// Integration smoke test for the Postgres store: business, survey, response,
/// enrichment commit, filters and moderation against a real database.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pg_store_round_trip_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let store = PgStore::new(db.pool.clone());

    // Unique phone and QR token so repeated runs do not conflict.
    let suffix = Uuid::new_v4().as_u128() % 1_000_000;
    let business = store
        .create_business(NewBusiness {
            phone: format!("+21355{:07}", suffix),
            name: "Smoke Test Bistro".to_string(),
            category: Some("restaurant".to_string()),
            description: None,
            location: None,
            website_url: None,
            subscription_tier: SubscriptionTier::Trial,
        })
        .await?;

    let qr_code = format!("smoke-{}", suffix);
    let survey = store
        .create_survey(NewSurvey {
            business_id: business.id,
            qr_code: qr_code.clone(),
            questions: vec![Question {
                kind: QuestionType::Rating,
                text: "How was it?".to_string(),
                required: true,
                options: None,
            }],
            languages: vec!["en".to_string()],
        })
        .await?;
    assert_eq!(
        store.survey_by_qr(&qr_code).await?.map(|s| s.id),
        Some(survey.id)
    );

    let response = store
        .insert_response(NewResponse {
            survey_id: survey.id,
            business_id: business.id,
            rating: 2,
            transcription: None,
            audio_url: Some("https://cdn.example/smoke.webm".to_string()),
            language: Some("en".to_string()),
            ip_address: "203.0.113.1".to_string(),
            user_agent: "smoke".to_string(),
            enrichment_status: EnrichmentStatus::Pending,
        })
        .await?;
    assert!(response.is_pending_enrichment());

    store
        .commit_enrichment(
            response.id,
            EnrichedFields {
                transcription: Some("Food was cold".to_string()),
                sentiment: Sentiment::Negative,
                sentiment_score: 0.15,
                keywords: vec!["food".to_string(), "temperature".to_string()],
                processed_at: Utc::now(),
            },
        )
        .await?;

    let filters = FilterParams {
        sentiments: Some("negative".to_string()),
        search: Some("TEMPERATURE".to_string()),
        qrs: Some(qr_code.clone()),
        is_flagged: Some("false".to_string()),
        ..Default::default()
    }
    .into_filters(Utc::now())?;
    let query = build_query(&store, business.id, &filters).await?;

    assert_eq!(store.count_responses(&query).await?, 1);
    let page = store.list_responses(&query, Page::from(PageParams::default())).await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].enrichment_status, EnrichmentStatus::Enriched);

    let flagged = store
        .apply_action(response.id, &ResponseAction::Flag, Utc::now())
        .await?
        .ok_or_else(|| anyhow::anyhow!("response vanished"))?;
    assert_eq!(flagged.is_flagged, Some(true));
    assert_eq!(store.count_responses(&query).await?, 0);

    assert!(store.delete_response(response.id).await?);
    assert!(store.get_response(response.id).await?.is_none());

    Ok(())
}
