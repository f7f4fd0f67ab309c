//! Analytics Aggregator: a pure reduction over already-filtered responses.

use crate::models::{Response, Sentiment};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use utoipa::ToSchema;

/// Length of the daily trend series.
pub const TREND_DAYS: i64 = 30;
pub const TOP_KEYWORDS: usize = 10;
pub const RECENT_RESPONSES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SentimentBreakdown {
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
}

impl SentimentBreakdown {
    pub fn total(&self) -> u64 {
        self.positive + self.neutral + self.negative
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub responses: u64,
    pub average_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_responses: i64,
    pub average_rating: f64,
    pub sentiment_breakdown: SentimentBreakdown,
    pub trends: Vec<TrendPoint>,
    pub recent_responses: Vec<Response>,
    /// Always 0: scan-to-completion telemetry is not recorded.
    pub response_rate: f64,
    pub top_keywords: Vec<String>,
    /// Keys 1 through 5, zero-filled.
    pub rating_distribution: BTreeMap<i16, u64>,
    pub keyword_counts: HashMap<String, u64>,
}

/// Aggregates relative to today's UTC date.
pub fn aggregate(responses: &[Response]) -> AnalyticsSnapshot {
    aggregate_as_of(responses, Utc::now().date_naive())
}

/// Aggregates with the trend window ending on `today`.
pub fn aggregate_as_of(responses: &[Response], today: NaiveDate) -> AnalyticsSnapshot {
    let total = responses.len();
    let rating_sum: i64 = responses.iter().map(|r| i64::from(r.rating)).sum();
    let average_rating = if total == 0 {
        0.0
    } else {
        round2(rating_sum as f64 / total as f64)
    };

    let mut sentiment_breakdown = SentimentBreakdown::default();
    for sentiment in responses.iter().filter_map(|r| r.sentiment) {
        match sentiment {
            Sentiment::Positive => sentiment_breakdown.positive += 1,
            Sentiment::Neutral => sentiment_breakdown.neutral += 1,
            Sentiment::Negative => sentiment_breakdown.negative += 1,
        }
    }

    let mut rating_distribution: BTreeMap<i16, u64> = (1..=5).map(|r| (r, 0)).collect();
    for r in responses {
        if let Some(count) = rating_distribution.get_mut(&r.rating) {
            *count += 1;
        }
    }

    let (keyword_counts, top_keywords) = keyword_frequencies(responses);

    let mut recent_responses = responses.to_vec();
    recent_responses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent_responses.truncate(RECENT_RESPONSES);

    AnalyticsSnapshot {
        total_responses: total as i64,
        average_rating,
        sentiment_breakdown,
        trends: daily_trends(responses, today),
        recent_responses,
        response_rate: 0.0,
        top_keywords,
        rating_distribution,
        keyword_counts,
    }
}

fn daily_trends(responses: &[Response], today: NaiveDate) -> Vec<TrendPoint> {
    let first_day = today - Duration::days(TREND_DAYS - 1);
    let mut buckets: BTreeMap<NaiveDate, (u64, i64)> = (0..TREND_DAYS)
        .map(|offset| (first_day + Duration::days(offset), (0, 0)))
        .collect();

    for r in responses {
        if let Some((count, sum)) = buckets.get_mut(&r.created_at.date_naive()) {
            *count += 1;
            *sum += i64::from(r.rating);
        }
    }

    buckets
        .into_iter()
        .map(|(day, (count, sum))| TrendPoint {
            date: day.format("%Y-%m-%d").to_string(),
            responses: count,
            average_rating: if count == 0 {
                0.0
            } else {
                round2(sum as f64 / count as f64)
            },
        })
        .collect()
}

/// Lowercased, trimmed keyword counts plus the most frequent ten.
/// Ties keep first-seen order.
fn keyword_frequencies(responses: &[Response]) -> (HashMap<String, u64>, Vec<String>) {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();

    let keywords = responses
        .iter()
        .filter_map(|r| r.keywords.as_deref())
        .flatten()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty());

    for keyword in keywords {
        let count = counts.entry(keyword.clone()).or_insert(0);
        if *count == 0 {
            order.push(keyword);
        }
        *count += 1;
    }

    // sort_by is stable, so equal counts stay in first-seen order.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(TOP_KEYWORDS);
    (counts, order)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichmentStatus;
    use chrono::{DateTime, TimeZone};
    use uuid::Uuid;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn response(rating: i16, sentiment: Option<Sentiment>, keywords: &[&str]) -> Response {
        Response {
            id: Uuid::new_v4(),
            survey_id: Uuid::nil(),
            business_id: Uuid::nil(),
            rating,
            transcription: None,
            audio_url: None,
            sentiment,
            sentiment_score: None,
            keywords: Some(keywords.iter().map(|k| k.to_string()).collect()),
            language: None,
            ip_address: None,
            user_agent: None,
            enrichment_status: EnrichmentStatus::NotRequired,
            created_at: at(30, 9),
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

    #[test]
    fn empty_input_gives_zeroes_and_a_full_trend_window() {
        let snapshot = aggregate_as_of(&[], today());
        assert_eq!(snapshot.total_responses, 0);
        assert_eq!(snapshot.average_rating, 0.0);
        assert_eq!(snapshot.sentiment_breakdown.total(), 0);
        assert_eq!(snapshot.rating_distribution.len(), 5);
        assert!(snapshot.rating_distribution.values().all(|c| *c == 0));
        assert_eq!(snapshot.trends.len(), 30);
        assert_eq!(snapshot.trends[0].date, "2024-06-01");
        assert_eq!(snapshot.trends[29].date, "2024-06-30");
        assert_eq!(snapshot.response_rate, 0.0);
    }

    #[test]
    fn average_rating_is_rounded_to_two_decimals() {
        let responses = [
            response(5, None, &[]),
            response(4, None, &[]),
            response(4, None, &[]),
        ];
        assert_eq!(aggregate_as_of(&responses, today()).average_rating, 4.33);
    }

    #[test]
    fn keywords_are_normalized_case_insensitively() {
        let responses = [
            response(4, None, &["Food", "food"]),
            response(3, None, &[" SERVICE ", ""]),
        ];
        let snapshot = aggregate_as_of(&responses, today());
        assert_eq!(snapshot.keyword_counts.len(), 2);
        assert_eq!(snapshot.keyword_counts["food"], 2);
        assert_eq!(snapshot.keyword_counts["service"], 1);
        assert_eq!(snapshot.top_keywords, vec!["food", "service"]);
    }

    #[test]
    fn top_keyword_ties_keep_first_seen_order() {
        let responses = [
            response(4, None, &["tajine", "couscous", "music"]),
            response(4, None, &["music"]),
        ];
        let snapshot = aggregate_as_of(&responses, today());
        assert_eq!(snapshot.top_keywords, vec!["music", "tajine", "couscous"]);
    }

    #[test]
    fn unanalyzed_rows_are_not_counted_in_any_sentiment_bucket() {
        let responses = [
            response(1, Some(Sentiment::Negative), &[]),
            response(5, Some(Sentiment::Positive), &[]),
            response(3, None, &[]),
        ];
        let snapshot = aggregate_as_of(&responses, today());
        assert_eq!(
            snapshot.sentiment_breakdown,
            SentimentBreakdown {
                positive: 1,
                neutral: 0,
                negative: 1
            }
        );
        assert_eq!(snapshot.rating_distribution.values().sum::<u64>(), 3);
    }

    #[test]
    fn trends_bucket_by_utc_day() {
        let mut early = response(2, None, &[]);
        early.created_at = at(29, 0);
        let mut late = response(5, None, &[]);
        late.created_at = at(29, 23);
        let mut outside = response(1, None, &[]);
        outside.created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let snapshot = aggregate_as_of(&[early, late, outside], today());
        let day = snapshot
            .trends
            .iter()
            .find(|t| t.date == "2024-06-29")
            .unwrap();
        assert_eq!(day.responses, 2);
        assert_eq!(day.average_rating, 3.5);
        assert_eq!(snapshot.trends.iter().map(|t| t.responses).sum::<u64>(), 2);
        // Rows outside the trend window still count everywhere else.
        assert_eq!(snapshot.total_responses, 3);
    }

    #[test]
    fn recent_responses_are_the_ten_newest() {
        let responses: Vec<Response> = (0..15)
            .map(|i| {
                let mut r = response(3, None, &[]);
                r.created_at = at(1 + i, 12);
                r
            })
            .collect();
        let snapshot = aggregate_as_of(&responses, today());
        assert_eq!(snapshot.recent_responses.len(), 10);
        assert_eq!(snapshot.recent_responses[0].created_at, at(15, 12));
        assert_eq!(snapshot.recent_responses[9].created_at, at(6, 12));
    }

    #[test]
    fn serializes_with_dashboard_field_names() {
        let value = serde_json::to_value(aggregate_as_of(&[response(4, None, &[])], today())).unwrap();
        assert_eq!(value["totalResponses"], 1);
        assert_eq!(value["ratingDistribution"]["4"], 1);
        assert!(value["trends"][0].get("averageRating").is_some());
        assert!(value.get("keywordCounts").is_some());
    }
}
