use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use perfdash_common::types::{AlertRecord, BugFilter, TriState};
use perfdash_storage::engine::SqliteStorageEngine;
use perfdash_storage::{AlertPage, AlertQuery, AlertStore, ReportTemplateStore, StorageError};

use crate::filter::{self, LimitPolicy, RawAlertParams};
use crate::{AlertQueryEngine, AlertsResponse, QueryError};

fn record(i: i64, suite: &str, measurement: &str) -> AlertRecord {
    let base = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    AlertRecord {
        key: format!("{suite}-{i:04}"),
        master_name: "ChromiumPerf".into(),
        bot_name: if i % 3 == 0 { "win-perf" } else { "linux-perf" }.into(),
        test_suite_name: suite.into(),
        test: format!("ChromiumPerf/linux-perf/{suite}/{measurement}"),
        start_revision: 5000 + i,
        end_revision: 5002 + i,
        timestamp: base + Duration::seconds(i * 30),
        bug_id: if i % 4 == 0 { Some(9000 + i) } else { None },
        is_improvement: i % 2 == 0,
        recovered: i % 5 == 0,
        sheriff: Some("V8 Perf Sheriff".into()),
        units: "ms".into(),
        median_before_anomaly: 100.0,
        median_after_anomaly: 100.0 + i as f64,
    }
}

fn engine_with(records: &[AlertRecord]) -> (Arc<SqliteStorageEngine>, AlertQueryEngine) {
    let store = Arc::new(SqliteStorageEngine::in_memory().unwrap());
    store.insert_alerts(records).unwrap();
    let engine = AlertQueryEngine::new(store.clone(), store.clone());
    (store, engine)
}

fn run(engine: &AlertQueryEngine, pairs: &[(&str, &str)]) -> crate::Result<AlertsResponse> {
    let raw = RawAlertParams::from_pairs(pairs.iter().copied());
    let filters = filter::parse(&raw, &LimitPolicy::default())?;
    engine.run(&filters)
}

fn keys(response: &AlertsResponse) -> Vec<String> {
    response.anomalies.iter().map(|a| a.key.clone()).collect()
}

/// Store that counts calls and answers with a fixed outcome.
struct ScriptedStore {
    calls: AtomicUsize,
    outcome: fn() -> perfdash_storage::Result<AlertPage>,
}

impl ScriptedStore {
    fn new(outcome: fn() -> perfdash_storage::Result<AlertPage>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome,
        })
    }
}

impl AlertStore for ScriptedStore {
    fn query_alerts(&self, _query: &AlertQuery) -> perfdash_storage::Result<AlertPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)()
    }

    fn ping(&self) -> perfdash_storage::Result<()> {
        Ok(())
    }
}

struct NoTemplates;

impl ReportTemplateStore for NoTemplates {
    fn test_keys_for_template(&self, _id: &str) -> perfdash_storage::Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }
}

fn inconsistent() -> perfdash_storage::Result<AlertPage> {
    Err(StorageError::Inconsistent {
        key: "k-1".into(),
        reason: "start_revision 9 > end_revision 3".into(),
    })
}

#[test]
fn suite_of_150_pages_as_100_then_50() {
    let mut records: Vec<AlertRecord> = (0..150).map(|i| record(i, "suite_a", "m")).collect();
    records.extend((0..20).map(|i| record(i, "suite_b", "m")));
    let (_, engine) = engine_with(&records);

    let first = run(&engine, &[("testSuite", "suite_a"), ("limit", "100")]).unwrap();
    assert_eq!(first.anomalies.len(), 100);
    let cursor = first.next_cursor.clone().expect("first page has a cursor");

    let second = run(
        &engine,
        &[("testSuite", "suite_a"), ("limit", "100"), ("cursor", cursor.as_str())],
    )
    .unwrap();
    assert_eq!(second.anomalies.len(), 50);
    assert!(second.next_cursor.is_none());

    let mut all: Vec<String> = keys(&first);
    all.extend(keys(&second));
    let unique: BTreeSet<&String> = all.iter().collect();
    assert_eq!(unique.len(), 150);
    assert!(second.anomalies.iter().all(|a| a.test_suite == "suite_a"));
}

#[test]
fn paginated_results_equal_single_query() {
    let records: Vec<AlertRecord> = (0..80).map(|i| record(i, "suite_a", "m")).collect();
    let (_, engine) = engine_with(&records);
    let filters = [
        ("bot", "linux-perf"),
        ("recovered", "false"),
        ("min_start_revision", "5010"),
    ];

    let mut params: Vec<(&str, &str)> = filters.to_vec();
    params.push(("limit", "1000"));
    let expected = keys(&run(&engine, &params).unwrap());
    assert!(!expected.is_empty());

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut params: Vec<(&str, &str)> = filters.to_vec();
        params.push(("limit", "7"));
        if let Some(c) = &cursor {
            params.push(("cursor", c.as_str()));
        }
        let page = run(&engine, &params).unwrap();
        assert!(page.anomalies.len() <= 7);
        seen.extend(keys(&page));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, expected);
}

#[test]
fn every_result_satisfies_filters() {
    let records: Vec<AlertRecord> = (0..60).map(|i| record(i, "suite_a", "m")).collect();
    let (_, engine) = engine_with(&records);
    let response = run(
        &engine,
        &[
            ("is_improvement", "true"),
            ("bug_id", ""),
            ("max_end_revision", "5040"),
            ("min_timestamp", "2024-02-01T00:05:00Z"),
        ],
    )
    .unwrap();
    assert!(!response.anomalies.is_empty());
    let min_ts = Utc.with_ymd_and_hms(2024, 2, 1, 0, 5, 0).unwrap();
    for a in &response.anomalies {
        assert!(a.improvement);
        assert!(a.bug_id.is_none());
        assert!(a.end_revision <= 5040);
        assert!(a.timestamp >= min_ts);
    }
}

#[test]
fn fractional_min_timestamp_is_an_exact_lower_bound() {
    let records: Vec<AlertRecord> = (0..4).map(|i| record(i, "s", "m")).collect();
    let (_, engine) = engine_with(&records);

    let response = run(&engine, &[("min_timestamp", "2024-02-01T00:00:30.000500Z")]).unwrap();
    assert_eq!(keys(&response), vec!["s-0003", "s-0002"]);

    let raw = RawAlertParams::from_pairs([("min_timestamp", "2024-02-01T00:00:30.000500Z")]);
    let filters = filter::parse(&raw, &LimitPolicy::default()).unwrap();
    assert!(!filters.filter().matches(&records[1]));

    let response = run(&engine, &[("min_timestamp", "2024-02-01T00:00:30.000Z")]).unwrap();
    assert_eq!(keys(&response), vec!["s-0003", "s-0002", "s-0001"]);
}

#[test]
fn exact_bug_id_filters_to_one_bug() {
    let records: Vec<AlertRecord> = (0..20).map(|i| record(i, "suite_a", "m")).collect();
    let (_, engine) = engine_with(&records);
    let response = run(&engine, &[("bugId", "9008")]).unwrap();
    assert_eq!(keys(&response), vec!["suite_a-0008"]);
}

#[test]
fn disjoint_templates_union_intersected_with_filters() {
    let mut records: Vec<AlertRecord> = (0..10).map(|i| record(i, "s", "A")).collect();
    records.extend((10..20).map(|i| record(i, "s", "B")));
    records.extend((20..30).map(|i| record(i, "s", "C")));
    let (store, engine) = engine_with(&records);
    store
        .upsert_report_template("tA", "A only", &["ChromiumPerf/linux-perf/s/A".into()])
        .unwrap();
    store
        .upsert_report_template("tB", "B only", &["ChromiumPerf/linux-perf/s/B".into()])
        .unwrap();

    let response = run(&engine, &[("report", "tA"), ("report", "tB")]).unwrap();
    assert_eq!(response.anomalies.len(), 20);
    assert!(response
        .anomalies
        .iter()
        .all(|a| a.descriptor.measurement == "A" || a.descriptor.measurement == "B"));

    let response = run(
        &engine,
        &[("report", "tA"), ("report", "tB"), ("bot", "win-perf")],
    )
    .unwrap();
    assert!(!response.anomalies.is_empty());
    assert!(response
        .anomalies
        .iter()
        .all(|a| a.bot == "win-perf" && a.descriptor.measurement != "C"));
}

#[test]
fn unknown_templates_match_nothing_without_store_call() {
    let store = ScriptedStore::new(|| Ok(AlertPage::default()));
    let engine = AlertQueryEngine::new(store.clone(), Arc::new(NoTemplates));
    let response = run(&engine, &[("report", "nope")]).unwrap();
    assert!(response.anomalies.is_empty());
    assert!(response.next_cursor.is_none());
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_limit_returns_empty_page() {
    let records: Vec<AlertRecord> = (0..5).map(|i| record(i, "s", "m")).collect();
    let (_, engine) = engine_with(&records);
    let response = run(&engine, &[("limit", "0")]).unwrap();
    assert!(response.anomalies.is_empty());
    assert!(response.next_cursor.is_none());

    let store = ScriptedStore::new(|| Ok(AlertPage::default()));
    let engine = AlertQueryEngine::new(store.clone(), Arc::new(NoTemplates));
    run(&engine, &[("limit", "0"), ("report", "x")]).unwrap();
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_store_gives_well_formed_empty_response() {
    let (_, engine) = engine_with(&[]);
    let response = run(&engine, &[]).unwrap();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json, serde_json::json!({ "anomalies": [] }));
}

#[test]
fn tri_state_parsing() {
    let parse = |v: Option<&str>| filter::parse_tri_state("recovered", v);
    assert_eq!(parse(Some("true")).unwrap(), TriState::True);
    assert_eq!(parse(Some("False")).unwrap(), TriState::False);
    assert_eq!(parse(None).unwrap(), TriState::Unspecified);
    let err = parse(Some("maybe")).unwrap_err();
    assert_eq!(err.field, "recovered");
}

#[test]
fn bug_id_sentinel_parsing() {
    assert_eq!(filter::parse_bug_filter(None).unwrap(), BugFilter::Any);
    assert_eq!(filter::parse_bug_filter(Some("")).unwrap(), BugFilter::Untriaged);
    assert_eq!(
        filter::parse_bug_filter(Some("12345")).unwrap(),
        BugFilter::Exact(12345)
    );
    assert_eq!(filter::parse_bug_filter(Some("abc")).unwrap_err().field, "bug_id");
}

#[test]
fn limit_rules() {
    let policy = LimitPolicy::default();
    let limit = |v: &str| {
        filter::parse(&RawAlertParams::from_pairs([("limit", v)]), &policy).map(|f| f.limit())
    };
    assert_eq!(limit("25").unwrap(), 25);
    assert_eq!(limit("0").unwrap(), 0);
    assert_eq!(limit("50000").unwrap(), 1000);
    assert_eq!(limit("-1").unwrap_err().field, "limit");
    assert_eq!(limit("ten").unwrap_err().field, "limit");

    let set = filter::parse(&RawAlertParams::default(), &policy).unwrap();
    assert_eq!(set.limit(), 100);
    assert!(set.filter().is_unrestricted());
    assert!(set.cursor().is_none());
}

#[test]
fn first_invalid_field_is_reported() {
    let raw = RawAlertParams::from_pairs([
        ("max_timestamp", "never"),
        ("recovered", "perhaps"),
        ("limit", "lots"),
    ]);
    let err = filter::parse(&raw, &LimitPolicy::default()).unwrap_err();
    assert_eq!(err.field, "limit");

    let raw = RawAlertParams::from_pairs([("max_timestamp", "never"), ("recovered", "perhaps")]);
    let err = filter::parse(&raw, &LimitPolicy::default()).unwrap_err();
    assert_eq!(err.field, "recovered");

    let raw = RawAlertParams::from_pairs([("minStartRevision", "r123")]);
    let err = filter::parse(&raw, &LimitPolicy::default()).unwrap_err();
    assert_eq!(err.field, "min_start_revision");
}

#[test]
fn malformed_cursor_is_rejected() {
    let raw = RawAlertParams::from_pairs([("cursor", "%%%")]);
    let err = filter::parse(&raw, &LimitPolicy::default()).unwrap_err();
    assert_eq!(err.field, "cursor");
}

#[test]
fn camel_case_and_snake_case_are_equivalent() {
    let policy = LimitPolicy::default();
    let camel = RawAlertParams::from_pairs([
        ("testSuite", "s"),
        ("isImprovement", "true"),
        ("maxStartRevision", "10"),
        ("minTimestamp", "2024-01-01"),
    ]);
    let snake = RawAlertParams::from_pairs([
        ("test_suite", "s"),
        ("is_improvement", "true"),
        ("max_start_revision", "10"),
        ("min_timestamp", "2024-01-01T00:00:00"),
    ]);
    assert_eq!(
        filter::parse(&camel, &policy).unwrap(),
        filter::parse(&snake, &policy).unwrap()
    );
}

#[test]
fn inconsistent_store_is_a_typed_error_by_default() {
    let store = ScriptedStore::new(inconsistent);
    let engine = AlertQueryEngine::new(store, Arc::new(NoTemplates));
    let err = run(&engine, &[]).unwrap_err();
    assert!(matches!(err, QueryError::Inconsistent { ref key, .. } if key == "k-1"));
}

#[test]
fn legacy_mode_collapses_inconsistency_to_empty_page() {
    let store = ScriptedStore::new(inconsistent);
    let engine =
        AlertQueryEngine::new(store, Arc::new(NoTemplates)).with_legacy_empty_on_inconsistency(true);
    let response = run(&engine, &[]).unwrap();
    assert!(response.anomalies.is_empty());
    assert!(response.next_cursor.is_none());
}

#[test]
fn legacy_mode_still_reports_other_failures() {
    let store = ScriptedStore::new(|| {
        Err(StorageError::UnsupportedFilterCombination("too many tests".into()))
    });
    let engine =
        AlertQueryEngine::new(store, Arc::new(NoTemplates)).with_legacy_empty_on_inconsistency(true);
    let err = run(&engine, &[]).unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedFilterCombination(_)));
}

#[test]
fn output_fields_keep_their_order() {
    let (_, engine) = engine_with(&[record(4, "suite_a", "m")]);
    let response = run(&engine, &[]).unwrap();
    let json = serde_json::to_string(&response.anomalies[0]).unwrap();
    let order = [
        "\"key\"",
        "\"descriptor\"",
        "\"test\"",
        "\"master\"",
        "\"bot\"",
        "\"test_suite\"",
        "\"start_revision\"",
        "\"end_revision\"",
        "\"timestamp\"",
        "\"bug_id\"",
        "\"improvement\"",
        "\"recovered\"",
        "\"sheriff\"",
        "\"units\"",
        "\"median_before_anomaly\"",
        "\"median_after_anomaly\"",
        "\"delta_value\"",
        "\"percent_changed\"",
        "\"direction\"",
    ];
    // Skip past the nested descriptor before looking for top-level names.
    let descriptor_end = json.find('}').unwrap();
    let mut last = 0;
    for (i, name) in order.iter().enumerate() {
        let pos = if i < 2 {
            json.find(name).unwrap()
        } else {
            descriptor_end + json[descriptor_end..].find(name).unwrap()
        };
        assert!(pos >= last, "{name} out of order in {json}");
        last = pos;
    }
    assert!(json.contains("\"direction\":\"up\""));
}

#[test]
fn zero_baseline_has_no_percent_change() {
    let mut rec = record(1, "s", "m");
    rec.median_before_anomaly = 0.0;
    rec.median_after_anomaly = 0.0;
    let view = crate::assemble::assemble(&rec);
    assert_eq!(view.percent_changed, None);
    assert_eq!(view.direction, crate::assemble::ChangeDirection::None);
    assert_eq!(view.descriptor.test_case, None);
}
