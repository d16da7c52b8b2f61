//! Request parameter parsing and validation.
//!
//! [`RawAlertParams`] collects string parameters as they arrive on the wire
//! (query string or form body, snake_case or camelCase names) and [`parse`]
//! turns them into a typed, immutable [`AlertFilterSet`]. Validation stops at
//! the first failing parameter, checked in this order: `limit`, `cursor`,
//! `bug_id`, `is_improvement`, `recovered`, `min_start_revision`,
//! `max_start_revision`, `min_end_revision`, `max_end_revision`,
//! `min_timestamp`, `max_timestamp`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use perfdash_common::cursor::Cursor;
use perfdash_common::types::{AlertFilter, BugFilter, Bounds, SortOrder, TriState};

use crate::error::ValidationError;

/// Default page size when `limit` is absent.
pub const DEFAULT_LIMIT: usize = 100;

/// Hard upper bound on a page. Larger requests are clamped.
pub const MAX_LIMIT: usize = 1000;

/// Maps a wire parameter name to its canonical snake_case name.
fn canonical_name(name: &str) -> Option<&'static str> {
    let canonical = match name {
        "bot" => "bot",
        "bug_id" | "bugId" => "bug_id",
        "cursor" => "cursor",
        "is_improvement" | "isImprovement" => "is_improvement",
        "key" => "key",
        "limit" => "limit",
        "master" => "master",
        "max_end_revision" | "maxEndRevision" => "max_end_revision",
        "max_start_revision" | "maxStartRevision" => "max_start_revision",
        "max_timestamp" | "maxTimestamp" => "max_timestamp",
        "min_end_revision" | "minEndRevision" => "min_end_revision",
        "min_start_revision" | "minStartRevision" => "min_start_revision",
        "min_timestamp" | "minTimestamp" => "min_timestamp",
        "recovered" => "recovered",
        "report" | "report[]" => "report",
        "sheriff" => "sheriff",
        "test" => "test",
        "test_suite" | "testSuite" => "test_suite",
        _ => return None,
    };
    Some(canonical)
}

/// Untyped request parameters, keyed by canonical name.
///
/// Single-valued parameters keep their first occurrence. Empty values are
/// dropped, except for `bug_id` where the empty string is the "untriaged"
/// sentinel. Unknown names are ignored.
///
/// # Examples
///
/// ```
/// use perfdash_query::RawAlertParams;
///
/// let raw = RawAlertParams::from_pairs([
///     ("testSuite", "speedometer2"),
///     ("report", "t1"),
///     ("report", "t2"),
///     ("bot", ""),
///     ("utm_source", "mail"),
/// ]);
/// assert_eq!(raw.get("test_suite"), Some("speedometer2"));
/// assert_eq!(raw.reports(), ["t1", "t2"]);
/// assert_eq!(raw.get("bot"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAlertParams {
    values: BTreeMap<&'static str, String>,
    reports: Vec<String>,
}

impl RawAlertParams {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut raw = Self::default();
        for (name, value) in pairs {
            raw.insert(name.as_ref(), value.into());
        }
        raw
    }

    /// Records one parameter. Returns `false` when the name is not recognized.
    pub fn insert(&mut self, name: &str, value: String) -> bool {
        let Some(name) = canonical_name(name) else {
            return false;
        };
        if name == "report" {
            if !value.is_empty() {
                self.reports.push(value);
            }
            return true;
        }
        if value.is_empty() && name != "bug_id" {
            return true;
        }
        self.values.entry(name).or_insert(value);
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn reports(&self) -> &[String] {
        &self.reports
    }
}

/// Page size policy applied while parsing `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

/// A validated, immutable filter set.
///
/// Constructed once by [`parse`] and handed by reference to the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertFilterSet {
    filter: AlertFilter,
    report_ids: Vec<String>,
    cursor: Option<Cursor>,
    limit: usize,
    order: SortOrder,
}

impl AlertFilterSet {
    pub fn filter(&self) -> &AlertFilter {
        &self.filter
    }

    /// Report template ids to expand into a test allow-set.
    pub fn report_ids(&self) -> &[String] {
        &self.report_ids
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }
}

/// Validates raw parameters into an [`AlertFilterSet`].
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first invalid parameter.
///
/// # Examples
///
/// ```
/// use perfdash_common::types::{BugFilter, TriState};
/// use perfdash_query::{filter, LimitPolicy, RawAlertParams};
///
/// let raw = RawAlertParams::from_pairs([("bug_id", ""), ("recovered", "TRUE")]);
/// let set = filter::parse(&raw, &LimitPolicy::default()).unwrap();
/// assert_eq!(set.filter().bug, BugFilter::Untriaged);
/// assert_eq!(set.filter().recovered, TriState::True);
/// assert_eq!(set.limit(), 100);
///
/// let raw = RawAlertParams::from_pairs([("recovered", "maybe")]);
/// let err = filter::parse(&raw, &LimitPolicy::default()).unwrap_err();
/// assert_eq!(err.field, "recovered");
/// ```
pub fn parse(raw: &RawAlertParams, policy: &LimitPolicy) -> Result<AlertFilterSet, ValidationError> {
    let limit = parse_limit(raw.get("limit"), policy)?;
    let cursor = raw
        .get("cursor")
        .map(|token| {
            Cursor::decode(token).map_err(|e| ValidationError::new("cursor", e.to_string()))
        })
        .transpose()?;
    let bug = parse_bug_filter(raw.get("bug_id"))?;
    let is_improvement = parse_tri_state("is_improvement", raw.get("is_improvement"))?;
    let recovered = parse_tri_state("recovered", raw.get("recovered"))?;
    let start_revision = Bounds {
        min: parse_revision("min_start_revision", raw.get("min_start_revision"))?,
        max: parse_revision("max_start_revision", raw.get("max_start_revision"))?,
    };
    let end_revision = Bounds {
        min: parse_revision("min_end_revision", raw.get("min_end_revision"))?,
        max: parse_revision("max_end_revision", raw.get("max_end_revision"))?,
    };
    let timestamp = Bounds {
        min: parse_optional_timestamp("min_timestamp", raw.get("min_timestamp"))?,
        max: parse_optional_timestamp("max_timestamp", raw.get("max_timestamp"))?,
    };

    let text = |name: &str| raw.get(name).map(str::to_string);
    let filter = AlertFilter {
        key: text("key"),
        master: text("master"),
        bot: text("bot"),
        test_suite: text("test_suite"),
        test: text("test"),
        sheriff: text("sheriff"),
        bug,
        is_improvement,
        recovered,
        start_revision,
        end_revision,
        timestamp,
    };

    Ok(AlertFilterSet {
        filter,
        report_ids: raw.reports().to_vec(),
        cursor,
        limit,
        order: SortOrder::NewestFirst,
    })
}

fn parse_limit(value: Option<&str>, policy: &LimitPolicy) -> Result<usize, ValidationError> {
    let Some(value) = value else {
        return Ok(policy.default_limit.min(policy.max_limit));
    };
    let requested: i64 = value
        .trim()
        .parse()
        .map_err(|_| ValidationError::new("limit", format!("'{value}' is not an integer")))?;
    if requested < 0 {
        return Err(ValidationError::new(
            "limit",
            format!("{requested} is negative"),
        ));
    }
    let requested = usize::try_from(requested).unwrap_or(usize::MAX);
    if requested > policy.max_limit {
        tracing::debug!(requested, max = policy.max_limit, "Clamping page size");
        return Ok(policy.max_limit);
    }
    Ok(requested)
}

/// Parses a case-insensitive `true`/`false`; absent means unspecified.
pub fn parse_tri_state(field: &'static str, value: Option<&str>) -> Result<TriState, ValidationError> {
    match value {
        None => Ok(TriState::Unspecified),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(TriState::True),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(TriState::False),
        Some(v) => Err(ValidationError::new(
            field,
            format!("expected 'true' or 'false', got '{v}'"),
        )),
    }
}

/// Parses `bug_id`: the empty string selects untriaged records, an integer
/// selects exactly that bug.
pub fn parse_bug_filter(value: Option<&str>) -> Result<BugFilter, ValidationError> {
    match value {
        None => Ok(BugFilter::Any),
        Some("") => Ok(BugFilter::Untriaged),
        Some(v) => v.trim().parse().map(BugFilter::Exact).map_err(|_| {
            ValidationError::new(
                "bug_id",
                format!("expected a bug number or an empty value, got '{v}'"),
            )
        }),
    }
}

fn parse_revision(field: &'static str, value: Option<&str>) -> Result<Option<i64>, ValidationError> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ValidationError::new(field, format!("'{v}' is not a revision number")))
        })
        .transpose()
}

fn parse_optional_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    value
        .map(|v| {
            parse_timestamp(v).ok_or_else(|| {
                ValidationError::new(field, format!("'{v}' is not an ISO-8601 timestamp"))
            })
        })
        .transpose()
}

/// Parses an ISO-8601 instant. Values without an offset are taken as UTC.
///
/// ```
/// use perfdash_query::filter::parse_timestamp;
///
/// assert!(parse_timestamp("2024-03-01T12:00:00Z").is_some());
/// assert!(parse_timestamp("2024-03-01T12:00:00.250").is_some());
/// assert!(parse_timestamp("2024-03-01").is_some());
/// assert!(parse_timestamp("yesterday").is_none());
/// ```
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
