//! Output shape of the alert query.
//!
//! Field names and their order are part of the public contract: clients
//! index into them directly, so new fields go at the end.

use chrono::{DateTime, Utc};
use perfdash_common::types::AlertRecord;
use serde::Serialize;
use utoipa::ToSchema;

/// Test coordinates split out of the record's test path.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TestDescriptor {
    pub master: String,
    pub bot: String,
    pub test_suite: String,
    /// Fourth path component, empty when the path is shorter.
    pub measurement: String,
    /// Remaining path components joined by `/`.
    pub test_case: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDirection {
    Up,
    Down,
    None,
}

/// One assembled alert.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AnomalyView {
    pub key: String,
    pub descriptor: TestDescriptor,
    pub test: String,
    pub master: String,
    pub bot: String,
    pub test_suite: String,
    pub start_revision: i64,
    pub end_revision: i64,
    pub timestamp: DateTime<Utc>,
    pub bug_id: Option<i64>,
    pub improvement: bool,
    pub recovered: bool,
    pub sheriff: Option<String>,
    pub units: String,
    pub median_before_anomaly: f64,
    pub median_after_anomaly: f64,
    pub delta_value: f64,
    /// `null` when the baseline median is zero.
    pub percent_changed: Option<f64>,
    pub direction: ChangeDirection,
}

/// Query mode response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AlertsResponse {
    pub anomalies: Vec<AnomalyView>,
    /// Present only when more results may follow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

fn descriptor(record: &AlertRecord) -> TestDescriptor {
    let mut parts = record.test.splitn(5, '/').skip(3);
    let measurement = parts.next().unwrap_or_default().to_string();
    let test_case = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    TestDescriptor {
        master: record.master_name.clone(),
        bot: record.bot_name.clone(),
        test_suite: record.test_suite_name.clone(),
        measurement,
        test_case,
    }
}

/// Maps a stored record to its output shape. Pure.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use perfdash_common::types::AlertRecord;
/// use perfdash_query::assemble::{assemble, ChangeDirection};
///
/// let record = AlertRecord {
///     key: "a1".into(),
///     master_name: "ChromiumPerf".into(),
///     bot_name: "linux-perf".into(),
///     test_suite_name: "blink_perf".into(),
///     test: "ChromiumPerf/linux-perf/blink_perf/layout/flexbox".into(),
///     start_revision: 10,
///     end_revision: 12,
///     timestamp: Utc::now(),
///     bug_id: None,
///     is_improvement: false,
///     recovered: false,
///     sheriff: None,
///     units: "ms".into(),
///     median_before_anomaly: 20.0,
///     median_after_anomaly: 25.0,
/// };
/// let view = assemble(&record);
/// assert_eq!(view.descriptor.measurement, "layout");
/// assert_eq!(view.descriptor.test_case.as_deref(), Some("flexbox"));
/// assert_eq!(view.percent_changed, Some(25.0));
/// assert_eq!(view.direction, ChangeDirection::Up);
/// ```
pub fn assemble(record: &AlertRecord) -> AnomalyView {
    let delta_value = record.median_after_anomaly - record.median_before_anomaly;
    let percent_changed = (record.median_before_anomaly != 0.0)
        .then(|| delta_value / record.median_before_anomaly.abs() * 100.0);
    let direction = if delta_value > 0.0 {
        ChangeDirection::Up
    } else if delta_value < 0.0 {
        ChangeDirection::Down
    } else {
        ChangeDirection::None
    };

    AnomalyView {
        key: record.key.clone(),
        descriptor: descriptor(record),
        test: record.test.clone(),
        master: record.master_name.clone(),
        bot: record.bot_name.clone(),
        test_suite: record.test_suite_name.clone(),
        start_revision: record.start_revision,
        end_revision: record.end_revision,
        timestamp: record.timestamp,
        bug_id: record.bug_id,
        improvement: record.is_improvement,
        recovered: record.recovered,
        sheriff: record.sheriff.clone(),
        units: record.units.clone(),
        median_before_anomaly: record.median_before_anomaly,
        median_after_anomaly: record.median_after_anomaly,
        delta_value,
        percent_changed,
        direction,
    }
}

pub fn assemble_all(records: &[AlertRecord]) -> Vec<AnomalyView> {
    records.iter().map(assemble).collect()
}
