//! Query planning and filter normalization.
//!
//! Turns the loosely-typed arguments of a retrieval tool call into a
//! [`RetrievalQuery`] with clamped limits and absolute date bounds.
//! Malformed date bounds are logged and ignored; planning never fails.

use std::sync::LazyLock;

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::backend::{DateRange, FilterExpr, QueryText};
use super::config::RetrievalConfig;
use crate::error::DateSpecError;

/// Query text meaning "everything in range".
pub const WILDCARD: &str = "*";
/// Upper bound for `max_results`.
pub const MAX_RESULTS_CEILING: usize = 20;

/// Days per relative month.
const DAYS_PER_MONTH: i64 = 30;

static RELATIVE_SPEC: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d{1,6})\s*([dwm])$").ok());

/// Raw arguments of a knowledge-base search, as the model sends them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Free text, or `*` for everything in range.
    #[serde(default)]
    pub query: String,
    /// Sender name filter.
    #[serde(default)]
    pub from_user: Option<String>,
    /// Lower bound: absolute date or `<N>d|<N>w|<N>m`.
    #[serde(default)]
    pub date_from: Option<String>,
    /// Upper bound, inclusive of its whole day.
    #[serde(default)]
    pub date_to: Option<String>,
    /// Requested result count.
    #[serde(default)]
    pub max_results: Option<i64>,
    /// Requested score threshold.
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl SearchParams {
    /// Creates params for a plain text query.
    #[must_use]
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Normalized retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalQuery {
    /// Text or match-all.
    pub text: QueryText,
    /// Sender filter.
    pub sender: Option<String>,
    /// Absolute date bounds.
    pub range: DateRange,
    /// Clamped to `[0, 1]`.
    pub min_score: f64,
    /// Clamped to `[1, 20]`.
    pub max_results: usize,
    /// Match-all with at least one date bound.
    pub is_digest: bool,
    /// Human description of the requested period, for digest prompts.
    pub period: Option<String>,
    /// Resolved scopes.
    pub scopes: Vec<String>,
}

impl RetrievalQuery {
    /// Backend filter for this query.
    #[must_use]
    pub fn filter(&self) -> FilterExpr {
        FilterExpr {
            text: self.text.clone(),
            sender: self.sender.clone(),
            range: self.range,
        }
    }

    /// Number of cards to display.
    #[must_use]
    pub fn display_count(&self, display_limit: usize) -> usize {
        display_limit.min(self.max_results)
    }

    /// Stable hash over every field, including resolved scopes.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}

/// Builds [`RetrievalQuery`] values using configured defaults.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    default_max_results: usize,
    default_min_score: f64,
}

impl QueryPlanner {
    /// Creates a planner from retrieval settings.
    #[must_use]
    pub const fn new(config: &RetrievalConfig) -> Self {
        Self {
            default_max_results: config.default_max_results,
            default_min_score: config.default_min_score,
        }
    }

    /// Normalizes raw tool arguments against `now`.
    #[must_use]
    pub fn plan(
        &self,
        params: &SearchParams,
        scopes: &[String],
        now: DateTime<Utc>,
    ) -> RetrievalQuery {
        let raw = params.query.trim();
        let text = if raw.is_empty() || raw == WILDCARD {
            QueryText::MatchAll
        } else {
            QueryText::Text(raw.to_string())
        };

        let from = resolve_bound("date_from", params.date_from.as_deref(), now);
        let to = resolve_bound("date_to", params.date_to.as_deref(), now)
            .and_then(|to| to.checked_add_days(Days::new(1)));
        let range = DateRange { from, to };

        let sender = params
            .from_user
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        let is_digest = text.is_match_all() && range.is_bounded();
        let period = describe_period(
            from.and(params.date_from.as_deref()),
            to.and(params.date_to.as_deref()),
        );

        RetrievalQuery {
            text,
            sender,
            range,
            min_score: clamp_min_score(params.min_score, self.default_min_score),
            max_results: clamp_max_results(params.max_results, self.default_max_results),
            is_digest,
            period,
            scopes: scopes.to_vec(),
        }
    }
}

/// Clamps a requested result count to `[1, 20]`.
#[must_use]
pub fn clamp_max_results(requested: Option<i64>, default: usize) -> usize {
    requested
        .map_or(default, |n| {
            usize::try_from(n.max(1)).unwrap_or(MAX_RESULTS_CEILING)
        })
        .clamp(1, MAX_RESULTS_CEILING)
}

/// Clamps a requested score threshold to `[0, 1]`. NaN falls back to the default.
#[must_use]
pub fn clamp_min_score(requested: Option<f64>, default: f64) -> f64 {
    requested
        .filter(|s| !s.is_nan())
        .unwrap_or(default)
        .clamp(0.0, 1.0)
}

/// Parses an absolute date or a `<N>d|<N>w|<N>m` offset back from `now`.
///
/// Absolute dates accept RFC 3339, `YYYY-MM-DDTHH:MM:SS`, and `YYYY-MM-DD`
/// (midnight UTC). A month is 30 days.
pub fn parse_date_spec(spec: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, DateSpecError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(DateSpecError::Empty);
    }

    if let Some(caps) = RELATIVE_SPEC.as_ref().and_then(|re| re.captures(spec)) {
        let out_of_range = || DateSpecError::OutOfRange {
            spec: spec.to_string(),
        };
        let amount: i64 = caps[1].parse().map_err(|_| out_of_range())?;
        let days = match caps[2].to_ascii_lowercase().as_str() {
            "w" => amount.checked_mul(7),
            "m" => amount.checked_mul(DAYS_PER_MONTH),
            _ => Some(amount),
        }
        .ok_or_else(out_of_range)?;
        let offset = Duration::try_days(days).ok_or_else(out_of_range)?;
        return now.checked_sub_signed(offset).ok_or_else(out_of_range);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(spec) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(spec, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(spec, "%Y-%m-%d")
        && let Some(dt) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(dt.and_utc());
    }

    Err(DateSpecError::Unrecognized {
        spec: spec.to_string(),
    })
}

fn resolve_bound(field: &str, spec: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let spec = spec?;
    match parse_date_spec(spec, now) {
        Ok(dt) => Some(dt),
        Err(e) => {
            warn!(field, spec, error = %e, "ignoring unparseable date bound");
            None
        }
    }
}

fn describe_period(from: Option<&str>, to: Option<&str>) -> Option<String> {
    let relative = |spec: &str| {
        let caps = RELATIVE_SPEC.as_ref()?.captures(spec.trim())?;
        let n: u64 = caps[1].parse().ok()?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "w" => "weeks",
            "m" => "months",
            _ => "days",
        };
        Some(format!("from the past {n} {unit}"))
    };

    match (from, to) {
        (Some(from), None) => relative(from).or_else(|| Some(format!("since {}", from.trim()))),
        (Some(from), Some(to)) => Some(format!("from {} to {}", from.trim(), to.trim())),
        (None, Some(to)) => Some(format!("until {}", to.trim())),
        (None, None) => None,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn planner() -> QueryPlanner {
        QueryPlanner::new(&RetrievalConfig::default())
    }

    #[test_case("7d", 7 ; "days")]
    #[test_case("2w", 14 ; "weeks")]
    #[test_case("3m", 90 ; "months are thirty days")]
    #[test_case("0d", 0 ; "zero offset")]
    #[test_case("10D", 10 ; "uppercase unit")]
    fn test_relative_specs(spec: &str, days: i64) {
        let resolved =
            parse_date_spec(spec, now()).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(now() - resolved, Duration::days(days));
    }

    #[test]
    fn test_absolute_specs() {
        let date = parse_date_spec("2025-01-10", now()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(date.to_rfc3339(), "2025-01-10T00:00:00+00:00");

        let dt = parse_date_spec("2025-01-10T08:30:00Z", now()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(dt.to_rfc3339(), "2025-01-10T08:30:00+00:00");
    }

    #[test]
    fn test_malformed_specs() {
        assert_eq!(parse_date_spec("  ", now()), Err(DateSpecError::Empty));
        assert!(matches!(
            parse_date_spec("last tuesday", now()),
            Err(DateSpecError::Unrecognized { .. })
        ));
    }

    #[test]
    fn test_absent_bounds_are_unbounded() {
        let query = planner().plan(&SearchParams::text("rust"), &[], now());
        assert_eq!(query.range, DateRange::default());
        assert!(!query.is_digest);
        assert!(query.period.is_none());
    }

    #[test]
    fn test_malformed_bound_is_ignored() {
        let params = SearchParams {
            query: "*".to_string(),
            date_from: Some("yesterday-ish".to_string()),
            ..SearchParams::default()
        };
        let query = planner().plan(&params, &[], now());
        assert!(query.range.from.is_none());
        assert!(!query.is_digest);
    }

    #[test]
    fn test_date_to_covers_whole_day() {
        let params = SearchParams {
            query: "release".to_string(),
            date_to: Some("2025-06-01".to_string()),
            ..SearchParams::default()
        };
        let query = planner().plan(&params, &[], now());
        let to = query.range.to.unwrap_or_else(|| panic!("date_to missing"));
        assert_eq!(to.to_rfc3339(), "2025-06-02T00:00:00+00:00");
    }

    #[test]
    fn test_digest_detection() {
        let digest = SearchParams {
            query: "*".to_string(),
            date_from: Some("7d".to_string()),
            ..SearchParams::default()
        };
        let query = planner().plan(&digest, &["s".to_string()], now());
        assert!(query.is_digest);
        assert_eq!(query.text, QueryText::MatchAll);
        assert_eq!(query.period.as_deref(), Some("from the past 7 days"));
        assert_eq!(query.scopes, vec!["s".to_string()]);

        let wildcard_unbounded = planner().plan(&SearchParams::text("*"), &[], now());
        assert!(!wildcard_unbounded.is_digest);

        let text_bounded = SearchParams {
            query: "deploy".to_string(),
            date_from: Some("7d".to_string()),
            ..SearchParams::default()
        };
        assert!(!planner().plan(&text_bounded, &[], now()).is_digest);
    }

    #[test]
    fn test_defaults_and_sender() {
        let params = SearchParams {
            query: " budget ".to_string(),
            from_user: Some("  ".to_string()),
            ..SearchParams::default()
        };
        let query = planner().plan(&params, &[], now());
        assert_eq!(query.text, QueryText::Text("budget".to_string()));
        assert_eq!(query.max_results, 5);
        assert!((query.min_score - 0.1).abs() < f64::EPSILON);
        assert!(query.sender.is_none());
    }

    #[test]
    fn test_cache_key_tracks_scopes() {
        let params = SearchParams::text("rust");
        let a = planner().plan(&params, &["a".to_string()], now());
        let b = planner().plan(&params, &["b".to_string()], now());
        assert_eq!(a.cache_key(), a.clone().cache_key());
        assert_ne!(a.cache_key(), b.cache_key());
    }

    proptest! {
        #[test]
        fn prop_max_results_clamped(n in any::<i64>()) {
            let clamped = clamp_max_results(Some(n), 5);
            prop_assert!((1..=MAX_RESULTS_CEILING).contains(&clamped));
        }

        #[test]
        fn prop_min_score_clamped(s in any::<f64>()) {
            let clamped = clamp_min_score(Some(s), 0.1);
            prop_assert!((0.0..=1.0).contains(&clamped));
        }
    }
}
