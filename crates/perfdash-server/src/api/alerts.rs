use crate::api::{error_response, success_response};
use crate::auth::CallerContext;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use perfdash_issues::{IssueQuery, IssueTrackerError};
use perfdash_query::{filter, AlertsResponse, QueryError, RawAlertParams};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// List type selecting the recent-bugs lookup.
pub const RECENT_BUGS: &str = "recent_bugs";

/// Raw items from the bug tracker, unmodified.
#[derive(Serialize, ToSchema)]
pub struct RecentBugsResponse {
    pub bugs: Vec<Value>,
}

type Pairs = Vec<(String, String)>;

fn query_error_response(trace_id: &str, err: QueryError) -> Response {
    match err {
        QueryError::Validation(e) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", &e.to_string())
        }
        QueryError::UnsupportedFilterCombination(msg) => error_response(
            StatusCode::BAD_REQUEST,
            trace_id,
            "unsupported_filter_combination",
            &format!("unsupported filter combination: {msg}"),
        ),
        QueryError::Inconsistent { key, reason } => {
            tracing::error!(key = %key, reason = %reason, "Alert store returned an inconsistent record");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Alert query failed: inconsistent record in store",
            )
        }
        QueryError::Storage(e) => {
            tracing::error!(error = %e, "Alert query failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

/// Parses, plans and executes one alert query.
fn run_query(state: &AppState, trace_id: &str, pairs: Pairs) -> Response {
    let raw = RawAlertParams::from_pairs(pairs);
    let filters = match filter::parse(&raw, &state.limits) {
        Ok(f) => f,
        Err(e) => return query_error_response(trace_id, e.into()),
    };
    match state.engine.run(&filters) {
        Ok(response) => success_response(StatusCode::OK, trace_id, response),
        Err(e) => query_error_response(trace_id, e),
    }
}

/// Recent regression bugs for authorized operators. The authorization check
/// happens before any call to the bug tracker.
async fn recent_bugs(state: &AppState, trace_id: &str, caller: &CallerContext) -> Response {
    if !state.authorizer.is_authorized_operator(caller.0.as_ref()) {
        tracing::info!(
            caller = caller.0.as_ref().map(|c| c.email.as_str()).unwrap_or("anonymous"),
            "Recent bugs denied"
        );
        return error_response(
            StatusCode::FORBIDDEN,
            trace_id,
            "forbidden",
            "Only verified accounts of allow-listed domains may query recent bugs",
        );
    }

    match state
        .issue_tracker
        .list_issues(&IssueQuery::recent_regressions())
        .await
    {
        Ok(bugs) => success_response(StatusCode::OK, trace_id, RecentBugsResponse { bugs }),
        Err(e) => {
            tracing::error!(error = %e, "Recent bugs lookup failed");
            let msg = match e {
                IssueTrackerError::Transient { .. } => "Bug tracker unavailable",
                _ => "Bug tracker request failed",
            };
            error_response(StatusCode::BAD_GATEWAY, trace_id, "upstream_error", msg)
        }
    }
}

async fn dispatch_list_type(
    state: &AppState,
    trace_id: &str,
    caller: &CallerContext,
    list_type: &str,
) -> Response {
    if list_type == RECENT_BUGS {
        return recent_bugs(state, trace_id, caller).await;
    }
    error_response(
        StatusCode::BAD_REQUEST,
        trace_id,
        "bad_request",
        &format!("unsupported list type '{list_type}'"),
    )
}

/// Query alerts. Every filter is optional; specified filters are ANDed.
///
/// Parameters accept snake_case or camelCase names. `bug_id=` (empty)
/// selects untriaged alerts. `report` may repeat; alerts match when their
/// test belongs to any of the templates. Results are ordered newest first;
/// pass `next_cursor` back as `cursor` for the next page.
#[utoipa::path(
    get,
    path = "/api/alerts",
    tag = "Alerts",
    params(
        ("bot" = Option<String>, Query, description = "Bot name"),
        ("master" = Option<String>, Query, description = "Master name"),
        ("test_suite" = Option<String>, Query, description = "Test suite name (alias testSuite)"),
        ("test" = Option<String>, Query, description = "Full test path"),
        ("key" = Option<String>, Query, description = "Alert key"),
        ("sheriff" = Option<String>, Query, description = "Sheriff rotation"),
        ("bug_id" = Option<String>, Query, description = "Bug number, or empty for untriaged (alias bugId)"),
        ("is_improvement" = Option<bool>, Query, description = "true / false (alias isImprovement)"),
        ("recovered" = Option<bool>, Query, description = "true / false"),
        ("min_start_revision" = Option<i64>, Query, description = "Inclusive lower bound on start revision"),
        ("max_start_revision" = Option<i64>, Query, description = "Inclusive upper bound on start revision"),
        ("min_end_revision" = Option<i64>, Query, description = "Inclusive lower bound on end revision"),
        ("max_end_revision" = Option<i64>, Query, description = "Inclusive upper bound on end revision"),
        ("min_timestamp" = Option<String>, Query, description = "Inclusive ISO-8601 lower bound"),
        ("max_timestamp" = Option<String>, Query, description = "Inclusive ISO-8601 upper bound"),
        ("report" = Option<Vec<String>>, Query, description = "Report template id, repeatable"),
        ("limit" = Option<u32>, Query, description = "Page size, default 100, capped at 1000"),
        ("cursor" = Option<String>, Query, description = "Continuation token from a previous page")
    ),
    responses(
        (status = 200, description = "One page of alerts", body = AlertsResponse),
        (status = 400, description = "Invalid parameter or unsupported filter combination", body = crate::api::ApiError),
        (status = 401, description = "Invalid bearer token", body = crate::api::ApiError),
        (status = 500, description = "Alert store failure", body = crate::api::ApiError)
    )
)]
async fn query_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(pairs): Query<Pairs>,
) -> Response {
    run_query(&state, &trace_id, pairs)
}

/// Query alerts with form-encoded parameters. Same semantics as `GET`.
#[utoipa::path(
    post,
    path = "/api/alerts",
    tag = "Alerts",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "Same parameters as the GET query string"
    ),
    responses(
        (status = 200, description = "One page of alerts", body = AlertsResponse),
        (status = 400, description = "Invalid parameter or unsupported filter combination", body = crate::api::ApiError),
        (status = 500, description = "Alert store failure", body = crate::api::ApiError)
    )
)]
async fn query_alerts_form(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Form(pairs): Form<Pairs>,
) -> Response {
    run_query(&state, &trace_id, pairs)
}

/// Named alert lists. `recent_bugs` returns regression bugs opened in the
/// last five days and requires a verified allow-listed account.
#[utoipa::path(
    get,
    path = "/api/alerts/{list_type}",
    tag = "Alerts",
    security((), ("bearer_auth" = [])),
    params(("list_type" = String, Path, description = "List type, e.g. recent_bugs")),
    responses(
        (status = 200, description = "Recent regression bugs", body = RecentBugsResponse),
        (status = 400, description = "Unsupported list type", body = crate::api::ApiError),
        (status = 403, description = "Caller is not an authorized operator", body = crate::api::ApiError),
        (status = 502, description = "Bug tracker failure", body = crate::api::ApiError)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    Extension(caller): Extension<CallerContext>,
    State(state): State<AppState>,
    Path(list_type): Path<String>,
) -> Response {
    dispatch_list_type(&state, &trace_id, &caller, &list_type).await
}

/// Form-posting variant of `GET /api/alerts/{list_type}`.
#[utoipa::path(
    post,
    path = "/api/alerts/{list_type}",
    tag = "Alerts",
    security((), ("bearer_auth" = [])),
    params(("list_type" = String, Path, description = "List type, e.g. recent_bugs")),
    responses(
        (status = 200, description = "Recent regression bugs", body = RecentBugsResponse),
        (status = 400, description = "Unsupported list type", body = crate::api::ApiError),
        (status = 403, description = "Caller is not an authorized operator", body = crate::api::ApiError),
        (status = 502, description = "Bug tracker failure", body = crate::api::ApiError)
    )
)]
async fn list_alerts_form(
    Extension(trace_id): Extension<TraceId>,
    Extension(caller): Extension<CallerContext>,
    State(state): State<AppState>,
    Path(list_type): Path<String>,
) -> Response {
    dispatch_list_type(&state, &trace_id, &caller, &list_type).await
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(query_alerts, query_alerts_form))
        .routes(routes!(list_alerts, list_alerts_form))
}
