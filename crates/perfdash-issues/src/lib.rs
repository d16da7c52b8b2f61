//! Bug tracker integration.
//!
//! [`IssueTracker`] is the seam the alert service uses to list recently
//! filed regression bugs. [`client::HttpIssueTracker`] talks to a
//! Monorail-style REST API with a bounded timeout and bounded retries; the
//! call is read-only, so retrying is always safe.

pub mod client;
pub mod error;


use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use client::{HttpIssueTracker, IssueTrackerSettings};
pub use error::{IssueTrackerError, Result};

/// Search window for recently opened bugs.
pub const RECENT_WINDOW_QUERY: &str = "opened-after:today-5";

/// Labels every recent regression bug carries.
pub const RECENT_REGRESSION_LABELS: &str = "Type-Bug-Regression,Performance";

/// Issue search parameters, forwarded verbatim as query string fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueQuery {
    pub q: String,
    pub label: String,
    pub sort: String,
}

impl IssueQuery {
    /// Regression bugs opened in the last five days, newest first.
    ///
    /// # Examples
    ///
    /// ```
    /// use perfdash_issues::IssueQuery;
    ///
    /// let query = IssueQuery::recent_regressions();
    /// assert_eq!(query.q, "opened-after:today-5");
    /// assert_eq!(query.sort, "-id");
    /// ```
    pub fn recent_regressions() -> Self {
        Self {
            q: RECENT_WINDOW_QUERY.to_string(),
            label: RECENT_REGRESSION_LABELS.to_string(),
            sort: "-id".to_string(),
        }
    }
}

/// A searchable bug tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Returns the raw issue items matching `query`, unmodified.
    ///
    /// # Errors
    ///
    /// [`IssueTrackerError::Transient`] once retries are exhausted,
    /// [`IssueTrackerError::Api`] for a non-retryable rejection,
    /// [`IssueTrackerError::Decode`] for a malformed response body.
    async fn list_issues(&self, query: &IssueQuery) -> Result<Vec<Value>>;
}
