/// Errors returned by bug tracker clients.
///
/// # Examples
///
/// ```rust
/// use perfdash_issues::error::IssueTrackerError;
///
/// let err = IssueTrackerError::Api {
///     status: 403,
///     body: "forbidden".to_string(),
/// };
/// assert!(err.to_string().contains("403"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum IssueTrackerError {
    /// Network failures, timeouts or retryable statuses persisted through
    /// every attempt.
    #[error("IssueTracker: request failed after {attempts} attempts: {last_error}")]
    Transient { attempts: u32, last_error: String },

    /// The tracker rejected the request with a non-retryable status.
    #[error("IssueTracker: API error: status={status}, body={body}")]
    Api { status: u16, body: String },

    /// The response body was not the expected JSON document.
    #[error("IssueTracker: malformed response: {0}")]
    Decode(String),

    /// The HTTP client could not be constructed.
    #[error("IssueTracker: client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Convenience `Result` alias for bug tracker operations.
pub type Result<T> = std::result::Result<T, IssueTrackerError>;
