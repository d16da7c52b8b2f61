use std::collections::BTreeSet;
use std::sync::Arc;

use perfdash_storage::{AlertQuery, AlertStore, ReportTemplateStore};

use crate::assemble::{assemble_all, AlertsResponse};
use crate::error::{QueryError, Result};
use crate::filter::AlertFilterSet;
use crate::templates;

/// Merges a filter set and its expanded allow-set into one store query.
pub fn plan(filters: &AlertFilterSet, test_keys: Option<BTreeSet<String>>) -> AlertQuery {
    AlertQuery {
        filter: filters.filter().clone(),
        test_keys,
        order: filters.order(),
        after: filters.cursor().cloned(),
        limit: filters.limit(),
    }
}

/// Runs validated filter sets against an alert store.
///
/// Issues at most one template lookup per id and exactly one store query
/// per call.
#[derive(Clone)]
pub struct AlertQueryEngine {
    store: Arc<dyn AlertStore>,
    templates: Arc<dyn ReportTemplateStore>,
    legacy_empty_on_inconsistency: bool,
}

impl AlertQueryEngine {
    pub fn new(store: Arc<dyn AlertStore>, templates: Arc<dyn ReportTemplateStore>) -> Self {
        Self {
            store,
            templates,
            legacy_empty_on_inconsistency: false,
        }
    }

    /// When enabled, an inconsistent store record yields an empty page
    /// (logged at WARN) instead of [`QueryError::Inconsistent`].
    pub fn with_legacy_empty_on_inconsistency(mut self, enabled: bool) -> Self {
        self.legacy_empty_on_inconsistency = enabled;
        self
    }

    pub fn run(&self, filters: &AlertFilterSet) -> Result<AlertsResponse> {
        if filters.limit() == 0 {
            return Ok(AlertsResponse::default());
        }

        let test_keys = templates::expand(self.templates.as_ref(), filters.report_ids())?;
        if test_keys.as_ref().is_some_and(|keys| keys.is_empty()) {
            tracing::debug!(
                reports = filters.report_ids().len(),
                "Report templates cover no tests, skipping store query"
            );
            return Ok(AlertsResponse::default());
        }

        let query = plan(filters, test_keys);
        let page = match self.store.query_alerts(&query) {
            Ok(page) => page,
            Err(err) => {
                return match QueryError::from(err) {
                    QueryError::Inconsistent { key, reason } if self.legacy_empty_on_inconsistency => {
                        tracing::warn!(
                            key = %key,
                            reason = %reason,
                            "Inconsistent alert record, returning empty page"
                        );
                        Ok(AlertsResponse::default())
                    }
                    other => Err(other),
                };
            }
        };

        tracing::debug!(
            count = page.records.len(),
            has_more = page.next_cursor.is_some(),
            "Alert query completed"
        );
        Ok(AlertsResponse {
            anomalies: assemble_all(&page.records),
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
    }

    /// Liveness of the underlying store.
    pub fn ping(&self) -> Result<()> {
        self.store.ping().map_err(QueryError::from)
    }
}
