use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored observation of a detected performance regression or improvement.
///
/// Records are produced by the detection pipeline; the alert service only
/// reads them. `start_revision <= end_revision` holds for every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub key: String,
    pub master_name: String,
    pub bot_name: String,
    pub test_suite_name: String,
    /// Full test path, `master/bot/suite/measurement[/case...]`.
    pub test: String,
    pub start_revision: i64,
    pub end_revision: i64,
    /// Stored with millisecond precision; finer digits are truncated on
    /// insert.
    pub timestamp: DateTime<Utc>,
    /// `None` means untriaged.
    pub bug_id: Option<i64>,
    pub is_improvement: bool,
    pub recovered: bool,
    /// Owning sheriff rotation.
    pub sheriff: Option<String>,
    pub units: String,
    pub median_before_anomaly: f64,
    pub median_after_anomaly: f64,
}

/// Three-valued boolean filter.
///
/// # Examples
///
/// ```
/// use perfdash_common::types::TriState;
///
/// assert!(TriState::Unspecified.matches(true));
/// assert!(TriState::Unspecified.matches(false));
/// assert!(TriState::True.matches(true));
/// assert!(!TriState::False.matches(true));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriState {
    #[default]
    Unspecified,
    True,
    False,
}

impl TriState {
    /// The required value, or `None` when no filter applies.
    pub fn required(self) -> Option<bool> {
        match self {
            TriState::Unspecified => None,
            TriState::True => Some(true),
            TriState::False => Some(false),
        }
    }

    pub fn matches(self, value: bool) -> bool {
        self.required().map_or(true, |required| required == value)
    }
}

/// Filter on bug linkage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BugFilter {
    /// No filter.
    #[default]
    Any,
    /// Only records without a bug.
    Untriaged,
    /// Only records linked to exactly this bug.
    Exact(i64),
}

impl BugFilter {
    pub fn matches(self, bug_id: Option<i64>) -> bool {
        match self {
            BugFilter::Any => true,
            BugFilter::Untriaged => bug_id.is_none(),
            BugFilter::Exact(id) => bug_id == Some(id),
        }
    }
}

/// Total order in which alert pages are served: by timestamp, ties broken
/// by key, both in the same direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "desc")]
    NewestFirst,
    #[serde(rename = "asc")]
    OldestFirst,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::NewestFirst => write!(f, "desc"),
            SortOrder::OldestFirst => write!(f, "asc"),
        }
    }
}

/// Inclusive bounds on an ordered value. Either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for Bounds<T> {
    fn default() -> Self {
        Self {
            min: None,
            max: None,
        }
    }
}

impl<T: PartialOrd> Bounds<T> {
    pub fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.min.as_ref().map_or(true, |min| value >= min)
            && self.max.as_ref().map_or(true, |max| value <= max)
    }
}

/// The conjunction of filters a query applies to alert records.
///
/// Every `None`/unspecified field applies no restriction. String filters are
/// exact matches; bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub key: Option<String>,
    pub master: Option<String>,
    pub bot: Option<String>,
    pub test_suite: Option<String>,
    pub test: Option<String>,
    pub sheriff: Option<String>,
    pub bug: BugFilter,
    pub is_improvement: TriState,
    pub recovered: TriState,
    pub start_revision: Bounds<i64>,
    pub end_revision: Bounds<i64>,
    pub timestamp: Bounds<DateTime<Utc>>,
}

impl AlertFilter {
    /// True when no filter is specified, i.e. an unrestricted scan.
    pub fn is_unrestricted(&self) -> bool {
        self == &AlertFilter::default()
    }

    /// Reference evaluation of the predicate against a single record.
    pub fn matches(&self, record: &AlertRecord) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == value)
        }

        eq(&self.key, &record.key)
            && eq(&self.master, &record.master_name)
            && eq(&self.bot, &record.bot_name)
            && eq(&self.test_suite, &record.test_suite_name)
            && eq(&self.test, &record.test)
            && self
                .sheriff
                .as_deref()
                .map_or(true, |s| record.sheriff.as_deref() == Some(s))
            && self.bug.matches(record.bug_id)
            && self.is_improvement.matches(record.is_improvement)
            && self.recovered.matches(record.recovered)
            && self.start_revision.contains(&record.start_revision)
            && self.end_revision.contains(&record.end_revision)
            && self.timestamp.contains(&record.timestamp)
    }
}
