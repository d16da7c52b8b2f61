//! Alert record storage.
//!
//! [`AlertStore`] is the seam the query engine executes against and
//! [`ReportTemplateStore`] the one it resolves report templates through.
//! The bundled implementation ([`engine::SqliteStorageEngine`]) keeps both
//! in a single SQLite database and pages with a keyset over
//! `(timestamp, key)`.

pub mod engine;
pub mod error;
mod templates;


use std::collections::BTreeSet;

use perfdash_common::cursor::Cursor;
use perfdash_common::types::{AlertFilter, AlertRecord, SortOrder};

pub use error::{Result, StorageError};

/// Largest allow-set of test identifiers a single query may carry.
pub const MAX_TEST_KEYS_PER_QUERY: usize = 500;

/// A fully planned page request.
///
/// # Examples
///
/// ```
/// use perfdash_storage::AlertQuery;
///
/// let query = AlertQuery { limit: 25, ..Default::default() };
/// assert!(query.filter.is_unrestricted());
/// assert!(query.after.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
    pub filter: AlertFilter,
    /// Allow-set on the record's test identifier. `None` applies no filter;
    /// an empty set matches nothing.
    pub test_keys: Option<BTreeSet<String>>,
    pub order: SortOrder,
    /// Resume strictly after this position.
    pub after: Option<Cursor>,
    pub limit: usize,
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct AlertPage {
    pub records: Vec<AlertRecord>,
    /// Present when more matching records may follow.
    pub next_cursor: Option<Cursor>,
}

/// Persistence backend for alert records.
///
/// Implementations must be safe to share across threads because request
/// handlers run concurrently.
pub trait AlertStore: Send + Sync {
    /// Returns at most `query.limit` records matching every filter, in
    /// `query.order`, resuming after `query.after`.
    ///
    /// # Errors
    ///
    /// [`StorageError::UnsupportedFilterCombination`] when the predicate
    /// cannot be executed by this store, [`StorageError::Inconsistent`] when
    /// a stored record violates its invariants.
    fn query_alerts(&self, query: &AlertQuery) -> Result<AlertPage>;

    /// Cheap liveness check used by the health endpoint.
    fn ping(&self) -> Result<()>;
}

/// Resolves report template identifiers into the tests they cover.
pub trait ReportTemplateStore: Send + Sync {
    /// Test identifiers covered by `template_id`. Unknown templates yield an
    /// empty set, not an error.
    fn test_keys_for_template(&self, template_id: &str) -> Result<BTreeSet<String>>;
}
