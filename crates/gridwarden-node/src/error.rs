//! Lifecycle error types.

use thiserror::Error;

use gridwarden_core::{ConfigError, LifecycleState};
use gridwarden_engine::{ClientError, EngineError};

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The operation is not allowed in the current state. Never retried.
    #[error("cannot {operation} while {from}")]
    InvalidTransition {
        from: LifecycleState,
        operation: &'static str,
    },

    #[error("engine failed to start")]
    EngineStart(#[source] EngineError),

    #[error("admin bootstrap failed")]
    Bootstrap(#[source] ClientError),

    #[error("invalid node configuration")]
    Config(#[from] ConfigError),
}
