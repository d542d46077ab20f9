//! Error types for the engine boundary.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for admin client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by the engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine failed to start: {0}")]
    Start(String),

    #[error("instance already running: {0}")]
    AlreadyRunning(String),

    #[error("instance not running: {0}")]
    NotRunning(String),

    #[error("cache not found: {0}")]
    CacheNotFound(String),

    #[error("lost partition reset failed for {cache}: {reason}")]
    ResetFailed { cache: String, reason: String },

    #[error("engine io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the administrative client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("client io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed [user={user}]")]
    AuthenticationFailed { user: String },

    #[error("cache does not exist: {0}")]
    CacheNotFound(String),

    #[error("command failed: {0}")]
    Command(String),
}

impl ClientError {
    /// Connection-level failures that may clear up once the node is ready.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::ConnectionRefused(_) | ClientError::Io(_))
    }
}
