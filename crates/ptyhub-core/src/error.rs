use thiserror::Error;

/// Errors produced by the terminal session engine.
#[derive(Debug, Error)]
pub enum PtyHubError {
    /// PTY allocation or process creation failed.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// Read or write on the PTY controller failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Settings storage could not be read or written.
    #[error("config io error: {0}")]
    ConfigIo(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for PtyHubError {
    fn from(e: serde_json::Error) -> Self {
        PtyHubError::ConfigIo(e.to_string())
    }
}

pub type PtyHubResult<T> = Result<T, PtyHubError>;
