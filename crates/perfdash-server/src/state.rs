use crate::auth::OperatorAuthorizer;
use chrono::{DateTime, Utc};
use perfdash_issues::IssueTracker;
use perfdash_query::{AlertQueryEngine, LimitPolicy};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: AlertQueryEngine,
    pub issue_tracker: Arc<dyn IssueTracker>,
    pub authorizer: Arc<dyn OperatorAuthorizer>,
    pub limits: LimitPolicy,
    pub jwt_secret: Arc<String>,
    pub start_time: DateTime<Utc>,
}
