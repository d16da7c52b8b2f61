use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{IssueTrackerError, Result};
use crate::{IssueQuery, IssueTracker};

/// Longest response body kept in an [`IssueTrackerError::Api`].
const MAX_ERROR_BODY: usize = 512;

fn default_base_url() -> String {
    "https://monorail-prod.appspot.com/_ah/api/monorail/v1".to_string()
}

fn default_project() -> String {
    "chromium".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_millis() -> u64 {
    200
}

/// Connection settings for [`HttpIssueTracker`].
#[derive(Debug, Clone, Deserialize)]
pub struct IssueTrackerSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_project")]
    pub project: String,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
    /// Sent as a bearer token when present.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Default for IssueTrackerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project: default_project(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_millis: default_backoff_millis(),
            access_token: None,
        }
    }
}

/// REST client for a Monorail-style issue search endpoint:
/// `GET {base_url}/projects/{project}/issues?q=..&label=..&sort=..`.
pub struct HttpIssueTracker {
    client: reqwest::Client,
    settings: IssueTrackerSettings,
}

impl HttpIssueTracker {
    pub fn new(settings: IssueTrackerSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/projects/{}/issues",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.project
        )
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.settings
                .backoff_millis
                .saturating_mul(2u64.saturating_pow(attempt)),
        )
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Pulls the `items` array out of a search response. A missing array means
/// no results.
fn extract_items(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Object(mut map) => match map.remove("items") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(IssueTrackerError::Decode(format!(
                "'items' is not an array: {other}"
            ))),
        },
        other => Err(IssueTrackerError::Decode(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

#[async_trait]
impl IssueTracker for HttpIssueTracker {
    async fn list_issues(&self, query: &IssueQuery) -> Result<Vec<Value>> {
        let url = self.issues_url();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let mut request = self.client.get(&url).query(query);
            if let Some(token) = &self.settings.access_token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: Value = resp
                            .json()
                            .await
                            .map_err(|e| IssueTrackerError::Decode(e.to_string()))?;
                        let items = extract_items(body)?;
                        tracing::debug!(count = items.len(), attempts = attempt + 1, "Listed issues");
                        return Ok(items);
                    }
                    if !is_retryable(status) {
                        let body = resp.text().await.unwrap_or_default();
                        tracing::error!(status = %status, "Issue tracker rejected request");
                        return Err(IssueTrackerError::Api {
                            status: status.as_u16(),
                            body: truncate(&body),
                        });
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Issue tracker returned retryable status, retrying"
                    );
                    last_error = format!("HTTP {status}");
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Issue tracker request failed, retrying"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        tracing::error!(
            url = %url,
            attempts = max_attempts,
            error = %last_error,
            "Issue tracker request failed after all retries"
        );
        Err(IssueTrackerError::Transient {
            attempts: max_attempts,
            last_error,
        })
    }
}
