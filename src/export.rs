//! CSV rendering for the response export route.

use crate::models::Response;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Body sent instead of a table when nothing matches.
pub const EMPTY_EXPORT: &str = "No data available";

pub const HEADERS: [&str; 20] = [
    "ID",
    "QR Code",
    "Rating",
    "Sentiment",
    "Sentiment Score",
    "Transcription",
    "Has Audio",
    "Audio URL",
    "Keywords",
    "Language",
    "IP Address",
    "User Agent",
    "Created At",
    "Processed At",
    "Is Spam",
    "Is Addressed",
    "Is Flagged",
    "Addressed At",
    "Flagged At",
    "Notes",
];

pub fn export_filename(today: NaiveDate) -> String {
    format!("responses-{}.csv", today.format("%Y-%m-%d"))
}

/// Renders one row per response. `qr_codes` maps survey ids to QR tokens.
pub fn to_csv(responses: &[Response], qr_codes: &HashMap<Uuid, String>) -> String {
    if responses.is_empty() {
        return EMPTY_EXPORT.to_string();
    }

    let mut lines = Vec::with_capacity(responses.len() + 1);
    lines.push(HEADERS.join(","));

    for r in responses {
        let keywords = r.keywords.as_deref().unwrap_or_default().join(", ");
        let fields = [
            r.id.to_string(),
            plain(qr_codes.get(&r.survey_id).map(String::as_str).unwrap_or("")),
            r.rating.to_string(),
            r.sentiment.map(|s| s.to_string()).unwrap_or_default(),
            r.sentiment_score.map(|s| s.to_string()).unwrap_or_default(),
            quoted(r.transcription.as_deref().unwrap_or("")),
            yes_no(r.has_audio()),
            plain(r.audio_url.as_deref().unwrap_or("")),
            quoted(&keywords),
            plain(r.language.as_deref().unwrap_or("")),
            plain(r.ip_address.as_deref().unwrap_or("")),
            quoted(r.user_agent.as_deref().unwrap_or("")),
            timestamp(Some(r.created_at)),
            timestamp(r.processed_at),
            yes_no(r.is_spam),
            yes_no(r.is_addressed == Some(true)),
            yes_no(r.is_flagged == Some(true)),
            timestamp(r.addressed_at),
            timestamp(r.flagged_at),
            quoted(r.notes.as_deref().unwrap_or("")),
        ];
        lines.push(fields.join(","));
    }

    lines.join("\n")
}

/// Free-text columns are always quoted, with embedded quotes doubled.
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Short columns are quoted only when they would break the row.
fn plain(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quoted(value)
    } else {
        value.to_string()
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "Yes" } else { "No" }.to_string()
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichmentStatus, Sentiment};
    use chrono::TimeZone;

    fn response() -> Response {
        Response {
            id: Uuid::new_v4(),
            survey_id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            rating: 2,
            transcription: Some("He said \"cold\", twice".into()),
            audio_url: Some("https://cdn.example/audio_1.webm".into()),
            sentiment: Some(Sentiment::Negative),
            sentiment_score: Some(0.1),
            keywords: Some(vec!["food".into(), "cold".into()]),
            language: Some("en".into()),
            ip_address: Some("10.0.0.1".into()),
            user_agent: Some("Mozilla/5.0".into()),
            enrichment_status: EnrichmentStatus::Enriched,
            created_at: Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap(),
            processed_at: None,
            is_spam: false,
            spam_at: None,
            is_flagged: Some(true),
            flagged_at: None,
            is_addressed: None,
            addressed_at: None,
            notes: None,
        }
    }

    #[test]
    fn empty_export_is_a_literal_message() {
        assert_eq!(to_csv(&[], &HashMap::new()), "No data available");
    }

    #[test]
    fn renders_header_and_escapes_quotes() {
        let r = response();
        let qr = HashMap::from([(r.survey_id, "a1b2c3d4e5f6".to_string())]);
        let csv = to_csv(std::slice::from_ref(&r), &qr);
        let mut lines = csv.lines();

        assert_eq!(lines.next().unwrap(), HEADERS.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with(&format!("{},a1b2c3d4e5f6,2,negative,0.1,", r.id)));
        assert!(row.contains("\"He said \"\"cold\"\", twice\""));
        assert!(row.contains(",Yes,https://cdn.example/audio_1.webm,\"food, cold\",en,"));
        assert!(row.contains("2024-05-02T08:30:00.000Z"));
        // spam, addressed, flagged
        assert!(row.contains(",No,No,Yes,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn filename_carries_the_export_date() {
        let day = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        assert_eq!(export_filename(day), "responses-2024-07-04.csv");
    }
}
