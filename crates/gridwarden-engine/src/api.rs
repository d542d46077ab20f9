//! The engine boundary.
//!
//! The clustered storage engine is an external collaborator. These traits
//! are everything the supervisor needs from it: start and stop an
//! instance, a one-shot "stopped" notification, event subscription,
//! lost-partition reset, and a short-lived administrative client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use gridwarden_core::config::{ClientTls, NodeConfiguration};
use gridwarden_core::{ClusterEvent, ClusterEventKind};

use crate::error::{ClientResult, EngineResult};

/// Default administrative endpoint of a local node.
pub const DEFAULT_CLIENT_ENDPOINT: &str = "127.0.0.1:10800";

/// Identifies a listener registration on an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Receives events on the engine's dispatch thread.
///
/// Implementations must return quickly and never block on the
/// supervisor.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ClusterEvent);
}

/// Handle to a running engine instance.
pub trait EngineHandle: Send + Sync {
    /// Instance name, as used by [`Engine::stop`].
    fn name(&self) -> &str;

    fn set_cluster_active(&self, active: bool);

    /// Let the engine adjust the baseline topology by itself once
    /// membership has been stable for `timeout`.
    fn set_baseline_auto_adjust(&self, enabled: bool, timeout: Duration);

    /// Flips to `true` once the instance has stopped, for any reason.
    fn stopped(&self) -> watch::Receiver<bool>;

    /// Register a persistent listener for the given kinds.
    fn local_listen(&self, listener: Arc<dyn EventListener>, kinds: &[ClusterEventKind]) -> ListenerId;

    /// Remove a registration. Returns `false` if it was already gone.
    fn stop_local_listen(&self, id: ListenerId) -> bool;

    /// Accept data loss for `cache_name` and resume normal operation on
    /// its lost partitions.
    fn reset_lost_partitions(&self, cache_name: &str) -> EngineResult<()>;

    fn cache_names(&self) -> Vec<String>;

    /// Discovery port the instance actually bound.
    fn discovery_port(&self) -> Option<u16>;
}

/// Connection settings for the administrative client.
#[derive(Clone)]
pub struct ClientConfiguration {
    pub endpoint: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub tls: Option<ClientTls>,
    pub socket_timeout: Duration,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CLIENT_ENDPOINT.to_string(),
            user_name: None,
            password: None,
            tls: None,
            socket_timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("endpoint", &self.endpoint)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tls", &self.tls)
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

/// Short-lived administrative connection.
#[async_trait]
pub trait AdminClient: Send {
    /// Run an administrative SQL statement through `cache_name`, creating
    /// the cache if needed.
    async fn execute_admin_command(&mut self, cache_name: &str, sql: &str) -> ClientResult<()>;

    /// Drop a cache created for a one-off command. Fails with
    /// `ClientError::CacheNotFound` if it is already gone.
    async fn destroy_ephemeral_cache(&mut self, cache_name: &str) -> ClientResult<()>;
}

/// The engine itself.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Start an instance. Blocks until the node has joined the topology.
    async fn start(&self, config: &NodeConfiguration) -> EngineResult<Arc<dyn EngineHandle>>;

    /// Stop the named instance. `graceful` waits for topology-aware
    /// shutdown (backup handoff). Returns `false` if nothing was running.
    async fn stop(&self, name: &str, graceful: bool) -> bool;

    async fn connect_client(&self, config: &ClientConfiguration) -> ClientResult<Box<dyn AdminClient>>;
}
