use shared_types::BackendId;
use thiserror::Error;

/// Errors raised while loading configuration or touching persisted state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("state error: {0}")]
    State(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Failure of a single backend invocation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("backend failed: {0}")]
    Failed(String),

    #[error("backend timed out after {0} ms")]
    Timeout(u64),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a classifier, memory, observer, ritual or tuning collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator timed out after {0} ms")]
    Timeout(u64),

    #[error("collaborator failed: {0}")]
    Failed(String),
}

/// Errors surfaced to the caller of the routing engine.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("default backend '{backend}' failed: {source}")]
    DefaultBackendFailed {
        backend: BackendId,
        #[source]
        source: BackendError,
    },

    #[error("default backend '{0}' is not registered")]
    DefaultBackendMissing(BackendId),
}
