#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use perfdash_common::types::AlertRecord;
use perfdash_issues::{IssueQuery, IssueTracker, IssueTrackerError};
use perfdash_query::{AlertQueryEngine, LimitPolicy};
use perfdash_server::app;
use perfdash_server::auth::{create_token, OperatorPolicy};
use perfdash_server::state::AppState;
use perfdash_storage::engine::SqliteStorageEngine;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "test-secret";

/// What the fake bug tracker answers with.
#[derive(Clone)]
pub enum TrackerOutcome {
    Items(Vec<Value>),
    Transient,
}

pub struct FakeIssueTracker {
    outcome: Mutex<TrackerOutcome>,
    calls: AtomicUsize,
}

impl FakeIssueTracker {
    pub fn new(outcome: TrackerOutcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_outcome(&self, outcome: TrackerOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }
}

#[async_trait]
impl IssueTracker for FakeIssueTracker {
    async fn list_issues(&self, query: &IssueQuery) -> perfdash_issues::Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(query, &IssueQuery::recent_regressions());
        match self.outcome.lock().unwrap().clone() {
            TrackerOutcome::Items(items) => Ok(items),
            TrackerOutcome::Transient => Err(IssueTrackerError::Transient {
                attempts: 3,
                last_error: "503 Service Unavailable".to_string(),
            }),
        }
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
    pub store: Arc<SqliteStorageEngine>,
    pub tracker: Arc<FakeIssueTracker>,
    pub app: axum::Router,
}

pub fn sample_bugs() -> Vec<Value> {
    vec![
        json!({"id": 1202, "title": "18.2% regression in memory at 901:905", "labels": ["Type-Bug-Regression", "Performance"]}),
        json!({"id": 1199, "summary": "Startup time regression", "extra": {"nested": [1, 2, 3]}}),
    ]
}

pub fn build_test_context(legacy_empty_on_inconsistency: bool) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("alerts.db");
    let store = Arc::new(SqliteStorageEngine::new(&db_path)?);
    let tracker = Arc::new(FakeIssueTracker::new(TrackerOutcome::Items(sample_bugs())));

    let engine = AlertQueryEngine::new(store.clone(), store.clone())
        .with_legacy_empty_on_inconsistency(legacy_empty_on_inconsistency);

    let state = AppState {
        engine,
        issue_tracker: tracker.clone(),
        authorizer: Arc::new(OperatorPolicy::new(
            ["chromium.org", "google.com"],
            ["partner@example.com"],
        )),
        limits: LimitPolicy::default(),
        jwt_secret: Arc::new(TEST_SECRET.to_string()),
        start_time: Utc::now(),
    };

    let app = app::build_http_app(state);

    Ok(TestContext {
        temp_dir,
        db_path,
        store,
        tracker,
        app,
    })
}

pub fn token_for(email: &str, verified: bool) -> String {
    create_token(TEST_SECRET, email, email, verified, 3600).expect("token should be created")
}

pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

pub fn alert(key: &str, suite: &str, seconds: i64) -> AlertRecord {
    AlertRecord {
        key: key.to_string(),
        master_name: "ChromiumPerf".to_string(),
        bot_name: "linux-perf".to_string(),
        test_suite_name: suite.to_string(),
        test: format!("ChromiumPerf/linux-perf/{suite}/timeToFirstPaint/story"),
        start_revision: 1000,
        end_revision: 1010,
        timestamp: ts(seconds),
        bug_id: None,
        is_improvement: false,
        recovered: false,
        sheriff: Some("Speed Perf Sheriff".to_string()),
        units: "ms".to_string(),
        median_before_anomaly: 100.0,
        median_after_anomaly: 120.0,
    }
}

/// Writes a row with `start_revision > end_revision`, bypassing the store's
/// insert validation.
pub fn insert_inconsistent_row(ctx: &TestContext, key: &str) {
    let conn = rusqlite::Connection::open(&ctx.db_path).expect("db should open");
    conn.execute(
        "INSERT INTO anomalies (key, master_name, bot_name, test_suite_name, test, start_revision, \
         end_revision, timestamp, is_improvement, recovered) \
         VALUES (?1, 'ChromiumPerf', 'linux-perf', 'suite_a', 'ChromiumPerf/linux-perf/suite_a/m', \
         500, 100, ?2, 0, 0)",
        rusqlite::params![key, ts(0).timestamp_millis()],
    )
    .expect("row should insert");
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).expect("request should build");
    send(app, req).await
}

pub async fn request_form(
    app: &axum::Router,
    uri: &str,
    token: Option<&str>,
    form: &str,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/x-www-form-urlencoded");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Body::from(form.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected error envelope: {body}");
    assert_eq!(body["err_msg"], "success");
    assert!(body["trace_id"].as_str().is_some_and(|t| !t.is_empty()));
}

pub fn assert_err_envelope(body: &Value, err_code: i64) {
    assert_eq!(body["err_code"], err_code, "unexpected envelope: {body}");
    assert!(body["err_msg"].as_str().is_some_and(|m| !m.is_empty()));
    assert!(body["trace_id"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["data"].is_null());
}

/// Keys of the anomalies in a successful alerts response.
pub fn anomaly_keys(body: &Value) -> Vec<String> {
    body["data"]["anomalies"]
        .as_array()
        .expect("anomalies should be an array")
        .iter()
        .map(|a| a["key"].as_str().expect("key should be a string").to_string())
        .collect()
}
