use perfdash_storage::StorageError;

/// A request parameter failed validation.
///
/// Only the first failing parameter is reported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors returned by the query engine.
///
/// Callers can always distinguish "no matches" (an empty, successful
/// response) from "the query failed" (one of these).
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unsupported filter combination: {0}")]
    UnsupportedFilterCombination(String),

    #[error("alert store returned an inconsistent record '{key}': {reason}")]
    Inconsistent { key: String, reason: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnsupportedFilterCombination(msg) => {
                QueryError::UnsupportedFilterCombination(msg)
            }
            StorageError::Inconsistent { key, reason } => QueryError::Inconsistent { key, reason },
            other => QueryError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
