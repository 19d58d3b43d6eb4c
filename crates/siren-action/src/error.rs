use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    /// The instance is in a terminal status; the runner must not touch it.
    #[error("action instance {0} is already finished")]
    AlreadyFinished(String),

    #[error("unknown action plugin: {0}")]
    UnknownPlugin(String),

    /// Template render failures are fatal for the instance, never retried.
    #[error("template render failed: {0}")]
    Render(String),

    #[error("bad action payload: {0}")]
    BadPayload(String),

    #[error(transparent)]
    Storage(#[from] siren_storage::StorageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ActionError>;
