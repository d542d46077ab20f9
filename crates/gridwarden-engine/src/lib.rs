//! Engine boundary for gridwarden.
//!
//! The supervisor only talks to the storage engine through the traits in
//! [`api`]. [`local::LocalEngine`] implements them in-process and is what
//! the daemon and the tests run against.

pub mod api;
pub mod error;
pub mod local;

pub use api::{
    AdminClient, ClientConfiguration, DEFAULT_CLIENT_ENDPOINT, Engine, EngineHandle,
    EventListener, ListenerId,
};
pub use error::{ClientError, ClientResult, EngineError, EngineResult};
pub use local::{DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USER, LocalEngine, LocalNode, StopCall};
