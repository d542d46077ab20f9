//! gridwarden-node — lifecycle supervision of one data-grid node.
//!
//! ```text
//! ShutdownCoordinator
//!   ├── termination signal → stop()
//!   ├── ReloadSignal       → terminate(), then run() again
//!   └── NodeLifecycleManager (single state owner)
//!       ├── Engine::start(NodeConfiguration)
//!       ├── AdminBootstrap (persistent clusters, retried connect)
//!       ├── ClusterEventBridge (attached while Running)
//!       └── Engine::stop(name, graceful)
//! ```

pub mod bootstrap;
pub mod coordinator;
pub mod error;
pub mod lifecycle;

pub use bootstrap::{AdminBootstrap, BootstrapOutcome};
pub use coordinator::ShutdownCoordinator;
pub use error::{LifecycleError, LifecycleResult};
pub use lifecycle::{NodeLifecycleManager, StopReason};
