//! Error types for the credential watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no credential paths to watch")]
    NoPaths,

    #[error("not a file path: {0}")]
    InvalidPath(PathBuf),

    #[error("watcher must be started inside a tokio runtime")]
    NoRuntime,
}
