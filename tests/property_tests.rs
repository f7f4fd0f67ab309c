/// Property-based tests using proptest
/// Rating validation, aggregate purity and distribution invariants
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use feedback_api::analytics::{aggregate_as_of, TREND_DAYS};
use feedback_api::ingestion::parse_rating;
use feedback_api::models::{EnrichmentStatus, Response, Sentiment};
use proptest::prelude::*;
use uuid::Uuid;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn build_response(rating: i16, sentiment: Option<Sentiment>, days_ago: i64, keywords: Vec<String>) -> Response {
    let noon = Utc
        .from_utc_datetime(&today().and_hms_opt(12, 0, 0).unwrap())
        - Duration::days(days_ago);
    Response {
        id: Uuid::new_v4(),
        survey_id: Uuid::nil(),
        business_id: Uuid::nil(),
        rating,
        transcription: None,
        audio_url: None,
        sentiment,
        sentiment_score: None,
        keywords: Some(keywords),
        language: None,
        ip_address: None,
        user_agent: None,
        enrichment_status: EnrichmentStatus::NotRequired,
        created_at: noon,
        processed_at: None,
        is_spam: false,
        spam_at: None,
        is_flagged: None,
        flagged_at: None,
        is_addressed: None,
        addressed_at: None,
        notes: None,
    }
}

fn sentiment_strategy() -> impl Strategy<Value = Option<Sentiment>> {
    prop_oneof![
        Just(None),
        Just(Some(Sentiment::Positive)),
        Just(Some(Sentiment::Neutral)),
        Just(Some(Sentiment::Negative)),
    ]
}

fn response_strategy() -> impl Strategy<Value = Response> {
    (
        1i16..=5,
        sentiment_strategy(),
        0i64..60,
        prop::collection::vec("[a-zA-Z]{1,8}", 0..4),
    )
        .prop_map(|(rating, sentiment, days_ago, keywords)| {
            build_response(rating, sentiment, days_ago, keywords)
        })
}

// Property: a rating is accepted exactly when it is an integer 1..=5
proptest! {
    #[test]
    fn integer_ratings_valid_iff_in_range(rating in -100i64..100) {
        let result = parse_rating(&serde_json::json!(rating));
        prop_assert_eq!(result.is_ok(), (1..=5).contains(&rating));
        if let Ok(value) = result {
            prop_assert_eq!(i64::from(value), rating);
        }
    }

    #[test]
    fn fractional_ratings_are_rejected(whole in 0i64..6, frac in 0.01f64..0.99) {
        let value = whole as f64 + frac;
        prop_assert!(parse_rating(&serde_json::json!(value)).is_err());
    }

    #[test]
    fn string_ratings_are_rejected(raw in "\\PC*") {
        prop_assert!(parse_rating(&serde_json::Value::String(raw)).is_err());
    }
}

// Property: aggregation is a pure function of its input
proptest! {
    #[test]
    fn aggregate_is_deterministic(responses in prop::collection::vec(response_strategy(), 0..40)) {
        let first = aggregate_as_of(&responses, today());
        let second = aggregate_as_of(&responses, today());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn rating_distribution_sums_to_total(responses in prop::collection::vec(response_strategy(), 0..40)) {
        let snapshot = aggregate_as_of(&responses, today());
        let distributed: u64 = snapshot.rating_distribution.values().sum();
        prop_assert_eq!(distributed, responses.len() as u64);
        prop_assert_eq!(snapshot.total_responses, responses.len() as i64);
        prop_assert_eq!(snapshot.rating_distribution.len(), 5);
    }

    #[test]
    fn sentiment_breakdown_counts_only_analyzed_rows(responses in prop::collection::vec(response_strategy(), 0..40)) {
        let snapshot = aggregate_as_of(&responses, today());
        let analyzed = responses.iter().filter(|r| r.sentiment.is_some()).count() as u64;
        prop_assert_eq!(snapshot.sentiment_breakdown.total(), analyzed);
    }

    #[test]
    fn average_rating_stays_in_range(responses in prop::collection::vec(response_strategy(), 1..40)) {
        let snapshot = aggregate_as_of(&responses, today());
        prop_assert!(snapshot.average_rating >= 1.0 && snapshot.average_rating <= 5.0);
    }

    #[test]
    fn trend_window_is_fixed_length(responses in prop::collection::vec(response_strategy(), 0..40)) {
        let snapshot = aggregate_as_of(&responses, today());
        prop_assert_eq!(snapshot.trends.len() as i64, TREND_DAYS);
        let in_trend: u64 = snapshot.trends.iter().map(|t| t.responses).sum();
        prop_assert!(in_trend <= responses.len() as u64);
    }
}
