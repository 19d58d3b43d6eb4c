use siren_common::error::PipelineError;

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure on a payload column.
    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value failed to parse back into its domain type.
    #[error("storage: corrupt value in column '{column}': {reason}")]
    Corrupt {
        column: &'static str,
        reason: String,
    },

    /// Generic storage error for cases not covered by other variants.
    #[error("storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Write/read failures against a healthy schema are retryable; missing
/// records and corrupt payloads are not worth requeueing.
impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } | StorageError::Corrupt { .. } => {
                PipelineError::Persistent(e.to_string())
            }
            _ => PipelineError::Transient(e.to_string()),
        }
    }
}
