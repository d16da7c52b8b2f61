/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use perfdash_storage::error::StorageError;
///
/// let err = StorageError::Inconsistent {
///     key: "alert-99".to_string(),
///     reason: "start_revision 12 > end_revision 10".to_string(),
/// };
/// assert!(err.to_string().contains("alert-99"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The filter combination cannot be executed by this store.
    #[error("Storage: unsupported filter combination: {0}")]
    UnsupportedFilterCombination(String),

    /// A stored record violates its invariants and cannot be served.
    #[error("Storage: inconsistent record '{key}': {reason}")]
    Inconsistent { key: String, reason: String },

    /// A record handed to the store for insertion is invalid.
    #[error("Storage: invalid record '{key}': {reason}")]
    InvalidRecord { key: String, reason: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
