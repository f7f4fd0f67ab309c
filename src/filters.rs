//! Query/Filter Engine.
//!
//! Query-string parameters are parsed once into a typed [`ResponseFilters`]
//! value. [`build_query`] turns that value into a [`ResponseQuery`], which is
//! the single rule set shared by the listing, analytics and export routes. A
//! query is either provably empty or a [`ResponsePredicate`]; stores render the
//! predicate as SQL ([`ResponsePredicate::push_where`]) or evaluate it in
//! memory ([`ResponsePredicate::matches`]).

use crate::errors::AppError;
use crate::models::{Response, Sentiment};
use crate::store::ResponseStore;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Days covered by the default date window.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Whole calendar days from `today - days` through the end of `today`.
    pub fn last_days(today: NaiveDate, days: i64) -> Self {
        Self {
            start: start_of_day(today - Duration::days(days)),
            end: end_of_day(today),
        }
    }
}

/// Fully typed dashboard filters, built once at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFilters {
    pub date_range: DateRange,
    /// Empty means every rating.
    pub ratings: Vec<i16>,
    /// Empty means every sentiment, including not-yet-analyzed rows.
    pub sentiments: Vec<Sentiment>,
    pub search_query: Option<String>,
    /// QR tokens; resolved to survey ids scoped to the business.
    pub survey_filter: Vec<String>,
    pub include_audio: bool,
    pub include_text: bool,
    pub is_flagged: Option<bool>,
    pub is_addressed: Option<bool>,
}

impl ResponseFilters {
    /// Default dashboard view: last 30 days, every other dimension open.
    pub fn for_window(date_range: DateRange) -> Self {
        Self {
            date_range,
            ratings: Vec::new(),
            sentiments: Vec::new(),
            search_query: None,
            survey_filter: Vec::new(),
            include_audio: true,
            include_text: true,
            is_flagged: None,
            is_addressed: None,
        }
    }
}

impl Default for ResponseFilters {
    fn default() -> Self {
        Self::for_window(DateRange::last_days(
            Utc::now().date_naive(),
            DEFAULT_WINDOW_DAYS,
        ))
    }
}

/// Raw filter query parameters as sent by the dashboard.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FilterParams {
    /// `YYYY-MM-DD` or RFC 3339.
    pub start_date: Option<String>,
    /// `YYYY-MM-DD` (whole day included) or RFC 3339.
    pub end_date: Option<String>,
    /// Comma-separated ratings, e.g. `1,2`.
    pub ratings: Option<String>,
    /// Comma-separated sentiment labels.
    pub sentiments: Option<String>,
    pub search: Option<String>,
    /// Comma-separated QR tokens.
    pub qrs: Option<String>,
    #[serde(rename = "includeAudio")]
    pub include_audio: Option<String>,
    #[serde(rename = "includeText")]
    pub include_text: Option<String>,
    #[serde(rename = "isFlagged")]
    pub is_flagged: Option<String>,
    #[serde(rename = "isAddressed")]
    pub is_addressed: Option<String>,
}

impl FilterParams {
    /// Parses the raw parameters relative to `now`.
    ///
    /// Unknown ratings and sentiment labels are dropped rather than rejected;
    /// only unreadable dates are a validation error.
    pub fn into_filters(self, now: DateTime<Utc>) -> Result<ResponseFilters, AppError> {
        let default_range = DateRange::last_days(now.date_naive(), DEFAULT_WINDOW_DAYS);

        let start = match non_blank(self.start_date) {
            Some(raw) => parse_bound(&raw, Bound::Start)
                .ok_or_else(|| invalid_date("start_date", &raw))?,
            None => default_range.start,
        };
        let end = match non_blank(self.end_date) {
            Some(raw) => {
                parse_bound(&raw, Bound::End).ok_or_else(|| invalid_date("end_date", &raw))?
            }
            None => default_range.end,
        };

        let ratings = comma_list(self.ratings.as_deref())
            .filter_map(|s| s.parse::<i16>().ok())
            .filter(|r| (1..=5).contains(r))
            .fold(Vec::new(), push_unique);

        let sentiments = comma_list(self.sentiments.as_deref())
            .filter_map(|s| s.parse::<Sentiment>().ok())
            .fold(Vec::new(), push_unique);

        let survey_filter = comma_list(self.qrs.as_deref())
            .map(str::to_string)
            .fold(Vec::new(), push_unique);

        Ok(ResponseFilters {
            date_range: DateRange { start, end },
            ratings,
            sentiments,
            search_query: non_blank(self.search).map(|s| s.trim().to_string()),
            survey_filter,
            include_audio: self.include_audio.as_deref() != Some("false"),
            include_text: self.include_text.as_deref() != Some("false"),
            is_flagged: tri_state(self.is_flagged.as_deref()),
            is_addressed: tri_state(self.is_addressed.as_deref()),
        })
    }
}

/// Pagination parameters for the listing route.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-based page number, default 1.
    pub page: Option<u32>,
    /// Page size, default 20, at most 100.
    pub limit: Option<u32>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn offset(&self) -> i64 {
        i64::from(self.number - 1) * i64::from(self.size)
    }
}

impl From<PageParams> for Page {
    fn from(params: PageParams) -> Self {
        Self {
            number: params.page.unwrap_or(1).max(1),
            size: params
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }
}

// ============ Resolved query ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFilter {
    Any,
    AudioOnly,
    TextOnly,
}

/// Conjunction of every filter dimension for one business.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePredicate {
    pub business_id: Uuid,
    pub created_from: DateTime<Utc>,
    pub created_to: DateTime<Utc>,
    pub ratings: Vec<i16>,
    pub sentiments: Vec<Sentiment>,
    pub search: Option<String>,
    pub survey_ids: Option<Vec<Uuid>>,
    pub media: MediaFilter,
    pub flagged: Option<bool>,
    pub addressed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseQuery {
    /// The filters match no row; stores answer without touching storage.
    Nothing,
    Matching(ResponsePredicate),
}

impl ResponseQuery {
    /// Builds the query from filters whose QR tokens are already resolved.
    ///
    /// `survey_ids` is `None` when the filters carry no QR tokens.
    pub fn plan(
        business_id: Uuid,
        filters: &ResponseFilters,
        survey_ids: Option<Vec<Uuid>>,
    ) -> Self {
        let media = match (filters.include_audio, filters.include_text) {
            (false, false) => return ResponseQuery::Nothing,
            (true, false) => MediaFilter::AudioOnly,
            (false, true) => MediaFilter::TextOnly,
            (true, true) => MediaFilter::Any,
        };

        if matches!(survey_ids, Some(ref ids) if ids.is_empty()) {
            return ResponseQuery::Nothing;
        }

        ResponseQuery::Matching(ResponsePredicate {
            business_id,
            created_from: filters.date_range.start,
            created_to: filters.date_range.end,
            ratings: filters.ratings.clone(),
            sentiments: filters.sentiments.clone(),
            search: filters
                .search_query
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            survey_ids,
            media,
            flagged: filters.is_flagged,
            addressed: filters.is_addressed,
        })
    }

    pub fn matches(&self, response: &Response) -> bool {
        match self {
            ResponseQuery::Nothing => false,
            ResponseQuery::Matching(predicate) => predicate.matches(response),
        }
    }
}

/// Resolves QR tokens through the store and plans the query.
///
/// A failed token lookup is a `FilterResolution` error, never an empty result.
pub async fn build_query(
    store: &dyn ResponseStore,
    business_id: Uuid,
    filters: &ResponseFilters,
) -> Result<ResponseQuery, AppError> {
    if !filters.include_audio && !filters.include_text {
        return Ok(ResponseQuery::Nothing);
    }

    let survey_ids = if filters.survey_filter.is_empty() {
        None
    } else {
        let ids = store
            .resolve_survey_ids(business_id, &filters.survey_filter)
            .await
            .map_err(|e| AppError::FilterResolution(format!("QR token lookup failed: {}", e)))?;
        if ids.is_empty() {
            tracing::debug!(
                "No surveys of business {} match QR filter {:?}",
                business_id,
                filters.survey_filter
            );
        }
        Some(ids)
    };

    Ok(ResponseQuery::plan(business_id, filters, survey_ids))
}

impl ResponsePredicate {
    /// In-memory evaluation; mirrors [`Self::push_where`] clause for clause.
    pub fn matches(&self, r: &Response) -> bool {
        if r.business_id != self.business_id || r.is_spam {
            return false;
        }
        if r.created_at < self.created_from || r.created_at > self.created_to {
            return false;
        }
        if !self.ratings.is_empty() && !self.ratings.contains(&r.rating) {
            return false;
        }
        if !self.sentiments.is_empty()
            && !r.sentiment.is_some_and(|s| self.sentiments.contains(&s))
        {
            return false;
        }
        if let Some(ref term) = self.search {
            let needle = term.to_lowercase();
            let in_text = r
                .transcription
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains(&needle));
            let in_keywords = r
                .keywords
                .as_deref()
                .is_some_and(|ks| ks.iter().any(|k| k.to_lowercase() == needle));
            if !in_text && !in_keywords {
                return false;
            }
        }
        if let Some(ref ids) = self.survey_ids {
            if !ids.contains(&r.survey_id) {
                return false;
            }
        }
        match self.media {
            MediaFilter::Any => {}
            MediaFilter::AudioOnly if !r.has_audio() => return false,
            MediaFilter::TextOnly if r.has_audio() => return false,
            _ => {}
        }
        flag_matches(self.flagged, r.is_flagged) && flag_matches(self.addressed, r.is_addressed)
    }

    /// Appends ` WHERE ...` for a query over `responses r`.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE r.business_id = ")
            .push_bind(self.business_id)
            .push(" AND r.is_spam = false AND r.created_at >= ")
            .push_bind(self.created_from)
            .push(" AND r.created_at <= ")
            .push_bind(self.created_to);

        if !self.ratings.is_empty() {
            qb.push(" AND r.rating = ANY(")
                .push_bind(self.ratings.clone())
                .push(")");
        }

        if !self.sentiments.is_empty() {
            let labels: Vec<String> = self
                .sentiments
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();
            qb.push(" AND r.sentiment = ANY(").push_bind(labels).push(")");
        }

        if let Some(ref term) = self.search {
            qb.push(" AND (r.transcription ILIKE ")
                .push_bind(format!("%{}%", escape_like(term)))
                .push(" OR EXISTS (SELECT 1 FROM unnest(r.keywords) AS k(word) WHERE lower(k.word) = lower(")
                .push_bind(term.clone())
                .push(")))");
        }

        if let Some(ref ids) = self.survey_ids {
            qb.push(" AND r.survey_id = ANY(")
                .push_bind(ids.clone())
                .push(")");
        }

        match self.media {
            MediaFilter::Any => {}
            MediaFilter::AudioOnly => {
                qb.push(" AND r.audio_url IS NOT NULL");
            }
            MediaFilter::TextOnly => {
                qb.push(" AND r.audio_url IS NULL");
            }
        }

        push_flag(qb, "r.is_flagged", self.flagged);
        push_flag(qb, "r.is_addressed", self.addressed);
    }
}

/// `Some(false)` also matches rows where the flag was never set.
fn flag_matches(wanted: Option<bool>, actual: Option<bool>) -> bool {
    match wanted {
        None => true,
        Some(true) => actual == Some(true),
        Some(false) => actual != Some(true),
    }
}

fn push_flag(qb: &mut QueryBuilder<'_, Postgres>, column: &str, wanted: Option<bool>) {
    match wanted {
        None => {}
        Some(true) => {
            qb.push(format!(" AND {} = true", column));
        }
        Some(false) => {
            qb.push(format!(" AND ({0} IS NULL OR {0} = false)", column));
        }
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ============ Parsing helpers ============

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn parse_bound(raw: &str, bound: Bound) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(match bound {
        Bound::Start => start_of_day(date),
        Bound::End => end_of_day(date),
    })
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1) - Duration::nanoseconds(1)
}

fn invalid_date(param: &str, raw: &str) -> AppError {
    AppError::Validation(format!(
        "{} '{}' must be YYYY-MM-DD or an RFC 3339 timestamp",
        param, raw
    ))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn comma_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn push_unique<T: PartialEq>(mut acc: Vec<T>, item: T) -> Vec<T> {
    if !acc.contains(&item) {
        acc.push(item);
    }
    acc
}

fn tri_state(raw: Option<&str>) -> Option<bool> {
    match raw {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichmentStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn response(business_id: Uuid) -> Response {
        Response {
            id: Uuid::new_v4(),
            survey_id: Uuid::new_v4(),
            business_id,
            rating: 4,
            transcription: Some("The couscous was great".into()),
            audio_url: None,
            sentiment: Some(Sentiment::Positive),
            sentiment_score: Some(0.9),
            keywords: Some(vec!["Couscous".into(), "service".into()]),
            language: Some("fr".into()),
            ip_address: None,
            user_agent: None,
            enrichment_status: EnrichmentStatus::NotRequired,
            created_at: now() - Duration::days(1),
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

    fn open_filters() -> ResponseFilters {
        ResponseFilters::for_window(DateRange::last_days(now().date_naive(), 30))
    }

    #[test]
    fn parses_dashboard_query_parameters() {
        let params = FilterParams {
            start_date: Some("2024-03-01".into()),
            end_date: Some("2024-03-10".into()),
            ratings: Some("1, 2,9,x,2".into()),
            sentiments: Some("negative,angry".into()),
            search: Some("  cold  ".into()),
            qrs: Some("abc,,def".into()),
            include_audio: Some("false".into()),
            include_text: Some("yes".into()),
            is_flagged: Some("false".into()),
            is_addressed: Some("maybe".into()),
        };

        let filters = params.into_filters(now()).unwrap();
        assert_eq!(filters.ratings, vec![1, 2]);
        assert_eq!(filters.sentiments, vec![Sentiment::Negative]);
        assert_eq!(filters.search_query.as_deref(), Some("cold"));
        assert_eq!(filters.survey_filter, vec!["abc".to_string(), "def".to_string()]);
        assert!(!filters.include_audio);
        assert!(filters.include_text);
        assert_eq!(filters.is_flagged, Some(false));
        assert_eq!(filters.is_addressed, None);
        assert_eq!(
            filters.date_range.start,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        // A bare end date covers that whole day.
        assert!(filters.date_range.end > Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap());
        assert!(filters.date_range.end < Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn missing_parameters_give_the_default_window() {
        let filters = FilterParams::default().into_filters(now()).unwrap();
        assert_eq!(filters, open_filters());
        assert!(filters.include_audio && filters.include_text);
    }

    #[test]
    fn unreadable_dates_are_rejected() {
        let params = FilterParams {
            start_date: Some("last tuesday".into()),
            ..Default::default()
        };
        assert!(matches!(
            params.into_filters(now()),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn page_size_is_clamped() {
        let page = Page::from(PageParams {
            page: Some(0),
            limit: Some(500),
        });
        assert_eq!(page, Page { number: 1, size: 100 });
        assert_eq!(Page::from(PageParams::default()).size, 20);
        assert_eq!(Page { number: 3, size: 20 }.offset(), 40);
    }

    #[test]
    fn excluding_audio_and_text_matches_nothing() {
        let mut filters = open_filters();
        filters.include_audio = false;
        filters.include_text = false;
        assert_eq!(
            ResponseQuery::plan(Uuid::new_v4(), &filters, None),
            ResponseQuery::Nothing
        );
    }

    #[test]
    fn unresolved_qr_tokens_match_nothing() {
        let mut filters = open_filters();
        filters.survey_filter = vec!["missing".into()];
        assert_eq!(
            ResponseQuery::plan(Uuid::new_v4(), &filters, Some(vec![])),
            ResponseQuery::Nothing
        );
    }

    #[test]
    fn flag_false_matches_unset_and_explicit_false() {
        let business = Uuid::new_v4();
        let mut filters = open_filters();
        filters.is_flagged = Some(false);
        let query = ResponseQuery::plan(business, &filters, None);

        let mut never_set = response(business);
        never_set.is_flagged = None;
        let mut explicit_false = response(business);
        explicit_false.is_flagged = Some(false);
        let mut flagged = response(business);
        flagged.is_flagged = Some(true);

        assert!(query.matches(&never_set));
        assert!(query.matches(&explicit_false));
        assert!(!query.matches(&flagged));
    }

    #[test]
    fn search_matches_transcription_substring_or_whole_keyword() {
        let business = Uuid::new_v4();
        let mut filters = open_filters();
        let r = response(business);

        filters.search_query = Some("COUSCOUS WAS".into());
        assert!(ResponseQuery::plan(business, &filters, None).matches(&r));

        let mut keyword_only = r.clone();
        keyword_only.transcription = None;
        filters.search_query = Some("couscous".into());
        assert!(ResponseQuery::plan(business, &filters, None).matches(&keyword_only));

        filters.search_query = Some("serv".into());
        assert!(!ResponseQuery::plan(business, &filters, None).matches(&keyword_only));
    }

    #[test]
    fn spam_and_other_tenants_never_match() {
        let business = Uuid::new_v4();
        let query = ResponseQuery::plan(business, &open_filters(), None);

        let mut spam = response(business);
        spam.is_spam = true;
        assert!(!query.matches(&spam));
        assert!(!query.matches(&response(Uuid::new_v4())));
        assert!(query.matches(&response(business)));
    }

    #[test]
    fn sentiment_filter_skips_unanalyzed_rows() {
        let business = Uuid::new_v4();
        let mut filters = open_filters();
        filters.sentiments = vec![Sentiment::Positive, Sentiment::Neutral];
        let query = ResponseQuery::plan(business, &filters, None);

        let mut pending = response(business);
        pending.sentiment = None;
        assert!(!query.matches(&pending));
        assert!(query.matches(&response(business)));
    }

    #[test]
    fn media_filter_splits_audio_and_text() {
        let business = Uuid::new_v4();
        let mut audio = response(business);
        audio.audio_url = Some("blob://x".into());
        let text = response(business);

        let mut filters = open_filters();
        filters.include_text = false;
        let audio_only = ResponseQuery::plan(business, &filters, None);
        assert!(audio_only.matches(&audio));
        assert!(!audio_only.matches(&text));

        filters.include_text = true;
        filters.include_audio = false;
        let text_only = ResponseQuery::plan(business, &filters, None);
        assert!(!text_only.matches(&audio));
        assert!(text_only.matches(&text));
    }

    #[test]
    fn sql_rendering_covers_every_dimension() {
        let business = Uuid::new_v4();
        let mut filters = open_filters();
        filters.ratings = vec![1, 2];
        filters.sentiments = vec![Sentiment::Negative];
        filters.search_query = Some("50%_off".into());
        filters.include_text = false;
        filters.is_flagged = Some(true);
        filters.is_addressed = Some(false);

        let ResponseQuery::Matching(predicate) =
            ResponseQuery::plan(business, &filters, Some(vec![Uuid::new_v4()]))
        else {
            panic!("expected a matching query");
        };

        let mut qb = QueryBuilder::<Postgres>::new("SELECT r.id FROM responses r");
        predicate.push_where(&mut qb);
        let sql = qb.sql();

        assert!(sql.contains("r.business_id = $1"));
        assert!(sql.contains("r.is_spam = false"));
        assert!(sql.contains("r.rating = ANY("));
        assert!(sql.contains("r.sentiment = ANY("));
        assert!(sql.contains("r.transcription ILIKE"));
        assert!(sql.contains("unnest(r.keywords)"));
        assert!(sql.contains("r.survey_id = ANY("));
        assert!(sql.contains("r.audio_url IS NOT NULL"));
        assert!(sql.contains("r.is_flagged = true"));
        assert!(sql.contains("(r.is_addressed IS NULL OR r.is_addressed = false)"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
