use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;
