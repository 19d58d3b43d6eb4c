/// Discriminated error kinds for the pipeline stages.
///
/// The recovery policy hangs off the kind: `Transient` is retried with
/// backoff and requeued, `Persistent` drops the record with an
/// `EVENT_DROP` log, `Fatal` fails the enclosing action instance, and
/// `Config` drops the anomaly with a warning.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network timeout, store unavailable, lock contention. Retryable.
    #[error("transient: {0}")]
    Transient(String),

    /// Bad data, missing strategy item, expired snapshot. The record is
    /// dropped; the pipeline never blocks on these.
    #[error("persistent: {0}")]
    Persistent(String),

    /// Per-instance failure (template render, empty assignees with no
    /// fallback). Fails the enclosing action instance only.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A strategy references an item id that no longer exists.
    #[error("strategy {strategy_id} has no item {item_id}")]
    StrategyItemNotFound { strategy_id: i64, item_id: i64 },

    /// Structured validation failure from an explicit decoder.
    #[error("invalid {entity}: {reason}")]
    Validation {
        entity: &'static str,
        reason: String,
    },
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

/// Convenience `Result` alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
