//! Node lifecycle state machine.
//!
//! `NodeLifecycleManager` is the single owner of the node's state and of
//! the engine handle while the node runs. Every state read and transition
//! happens under one mutex; nothing awaits while holding it.
//!
//! ```text
//! Stopped ──run──▶ Starting ──▶ Running ──stop──────▶ Stopping ────▶ Stopped
//!                     │            └─────terminate──▶ Terminating ─▶ Stopped
//!                     └── start/bootstrap failure ─────────────────▶ Stopped
//! ```
//!
//! `run` drives a whole lifetime and only returns once the node is back
//! in `Stopped`. `stop` and `terminate` may be called from any task; they
//! release the engine and wake `run`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info, warn};

use gridwarden_cluster::ClusterEventBridge;
use gridwarden_core::config::NodeConfigurationBuilder;
use gridwarden_core::{ClusterEvent, LifecycleState, NodeConfiguration, NodeLeftPolicy};
use gridwarden_engine::{Engine, EngineHandle};

use crate::bootstrap::AdminBootstrap;
use crate::error::{LifecycleError, LifecycleResult};

/// Baseline auto-adjust timeout for persistent clusters.
pub const BASELINE_AUTO_ADJUST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop` was called.
    Stopped,
    /// `terminate` was called.
    Terminated,
    /// The engine stopped without being asked to.
    EngineStopped,
}

struct Inner {
    state: LifecycleState,
    builder: NodeConfigurationBuilder,
    handle: Option<Arc<dyn EngineHandle>>,
    stop_request: Option<Arc<Notify>>,
}

pub struct NodeLifecycleManager {
    engine: Arc<dyn Engine>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<LifecycleState>,
    bridge: ClusterEventBridge,
    bootstrap: Option<AdminBootstrap>,
    node_left_policy: NodeLeftPolicy,
}

impl NodeLifecycleManager {
    pub fn new(engine: Arc<dyn Engine>, builder: NodeConfigurationBuilder) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Stopped);
        Self {
            engine,
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                builder,
                handle: None,
                stop_request: None,
            }),
            state_tx,
            bridge: ClusterEventBridge::new(),
            bootstrap: None,
            node_left_policy: NodeLeftPolicy::default(),
        }
    }

    /// Rotate the admin password on every persistent start.
    pub fn with_bootstrap(mut self, bootstrap: AdminBootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    pub fn with_node_left_policy(mut self, policy: NodeLeftPolicy) -> Self {
        self.node_left_policy = policy;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Follow state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Follow cluster events handled while the node runs, across
    /// restarts.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClusterEvent> {
        self.bridge.subscribe()
    }

    /// Configuration the next `run` would use, before validation.
    pub fn pending_configuration(&self) -> NodeConfiguration {
        self.lock().builder.pending().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut Inner, next: LifecycleState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            inner.state
        );
        info!(from = %inner.state, to = %next, "lifecycle transition");
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    fn back_to_stopped(&self) {
        let mut inner = self.lock();
        inner.stop_request = None;
        self.transition(&mut inner, LifecycleState::Stopped);
    }

    // ── Running ──────────────────────────────────────────────────

    /// Start the engine and block until the node has stopped again.
    ///
    /// Must be driven to completion: dropping the future while running
    /// leaves the engine up and the state at `Running`.
    pub async fn run(&self) -> LifecycleResult<StopReason> {
        let (config, stop_request) = {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Stopped {
                return Err(LifecycleError::InvalidTransition {
                    from: inner.state,
                    operation: "run",
                });
            }
            self.transition(&mut inner, LifecycleState::Starting);
            let stop_request = Arc::new(Notify::new());
            inner.stop_request = Some(Arc::clone(&stop_request));
            (inner.builder.build(), stop_request)
        };

        let config = match config {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "invalid node configuration");
                self.back_to_stopped();
                return Err(e.into());
            }
        };

        let handle = match self.engine.start(&config).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "engine failed to start");
                self.back_to_stopped();
                return Err(LifecycleError::EngineStart(e));
            }
        };
        info!(
            instance = %handle.name(),
            port = handle.discovery_port().unwrap_or_default(),
            persistence = config.persistence_enabled(),
            "engine started"
        );

        handle.set_cluster_active(true);
        if config.persistence_enabled() {
            handle.set_baseline_auto_adjust(true, BASELINE_AUTO_ADJUST_TIMEOUT);
            if let Err(e) = self.bootstrap_admin().await {
                error!(error = %e, "admin bootstrap failed, stopping engine");
                self.engine.stop(handle.name(), false).await;
                self.back_to_stopped();
                return Err(LifecycleError::Bootstrap(e));
            }
        }

        let subscription = self.bridge.attach(&handle, self.node_left_policy);
        let mut stopped = handle.stopped();
        {
            let mut inner = self.lock();
            inner.handle = Some(Arc::clone(&handle));
            self.transition(&mut inner, LifecycleState::Running);
        }

        tokio::select! {
            _ = wait_stopped(&mut stopped) => {}
            _ = stop_request.notified() => {}
        }

        let reason = {
            let mut inner = self.lock();
            match inner.state {
                LifecycleState::Terminating => StopReason::Terminated,
                LifecycleState::Stopping => StopReason::Stopped,
                _ => {
                    warn!(instance = %handle.name(), "engine stopped unexpectedly");
                    self.transition(&mut inner, LifecycleState::Stopping);
                    StopReason::EngineStopped
                }
            }
        };

        subscription.detach();
        // stop/terminate may still be waiting on the engine.
        wait_stopped(&mut stopped).await;

        {
            let mut inner = self.lock();
            inner.handle = None;
            inner.stop_request = None;
            self.transition(&mut inner, LifecycleState::Stopped);
        }
        info!(instance = %handle.name(), ?reason, "node stopped");
        Ok(reason)
    }

    async fn bootstrap_admin(&self) -> gridwarden_engine::ClientResult<()> {
        match &self.bootstrap {
            Some(bootstrap) => {
                let outcome = bootstrap.run(self.engine.as_ref()).await?;
                debug!(?outcome, "admin bootstrap complete");
            }
            None => debug!("no admin password configured, skipping bootstrap"),
        }
        Ok(())
    }

    /// Fast shutdown.
    pub async fn stop(&self) -> LifecycleResult<()> {
        self.shut_down("stop", false).await
    }

    /// Graceful, topology-aware shutdown.
    pub async fn terminate(&self) -> LifecycleResult<()> {
        self.shut_down("terminate", true).await
    }

    async fn shut_down(&self, operation: &'static str, graceful: bool) -> LifecycleResult<()> {
        let (handle, stop_request) = {
            let mut inner = self.lock();
            match inner.state {
                LifecycleState::Running => {}
                LifecycleState::Starting => {
                    return Err(LifecycleError::InvalidTransition {
                        from: LifecycleState::Starting,
                        operation,
                    });
                }
                state => {
                    debug!(%state, operation, "node already stopped or stopping");
                    return Ok(());
                }
            }
            let next = if graceful {
                LifecycleState::Terminating
            } else {
                LifecycleState::Stopping
            };
            self.transition(&mut inner, next);
            (inner.handle.clone(), inner.stop_request.clone())
        };

        if let Some(handle) = handle {
            if !self.engine.stop(handle.name(), graceful).await {
                debug!(instance = %handle.name(), "engine was already stopped");
            }
        }
        if let Some(stop_request) = stop_request {
            stop_request.notify_one();
        }
        Ok(())
    }

    // ── Configuration ────────────────────────────────────────────

    fn configure<F>(&self, operation: &'static str, apply: F) -> LifecycleResult<()>
    where
        F: FnOnce(&mut NodeConfigurationBuilder),
    {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Stopped {
            return Err(LifecycleError::InvalidTransition {
                from: inner.state,
                operation,
            });
        }
        apply(&mut inner.builder);
        Ok(())
    }

    pub fn set_server_port(&self, port: u16) -> LifecycleResult<()> {
        self.configure("set_server_port", |b| {
            b.server_port(port);
        })
    }

    pub fn set_cluster_endpoints(&self, endpoints: Vec<String>) -> LifecycleResult<()> {
        self.configure("set_cluster_endpoints", |b| {
            b.cluster_endpoints(endpoints);
        })
    }

    pub fn set_on_heap_memory_limit(&self, mb: u64) -> LifecycleResult<()> {
        self.configure("set_on_heap_memory_limit", |b| {
            b.on_heap_memory_mb(mb);
        })
    }

    pub fn set_off_heap_memory_limit(&self, mb: u64) -> LifecycleResult<()> {
        self.configure("set_off_heap_memory_limit", |b| {
            b.off_heap_memory_mb(mb);
        })
    }

    pub fn set_persistence(&self, enabled: bool) -> LifecycleResult<()> {
        self.configure("set_persistence", |b| {
            b.persistence(enabled);
        })
    }

    pub fn set_consistent_id(&self, id: impl Into<String>) -> LifecycleResult<()> {
        let id = id.into();
        self.configure("set_consistent_id", |b| {
            b.consistent_id(id);
        })
    }
}

async fn wait_stopped(stopped: &mut watch::Receiver<bool>) {
    let _ = stopped.wait_for(|s| *s).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwarden_engine::LocalEngine;

    fn manager(engine: &LocalEngine) -> NodeLifecycleManager {
        let mut b = NodeConfigurationBuilder::default();
        b.instance_name("node-1");
        NodeLifecycleManager::new(Arc::new(engine.clone()), b)
    }

    #[tokio::test]
    async fn starts_stopped() {
        let m = manager(&LocalEngine::new());
        assert_eq!(m.state(), LifecycleState::Stopped);
        assert_eq!(*m.subscribe_state().borrow(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn stop_while_stopped_is_a_noop() {
        let engine = LocalEngine::new();
        let m = manager(&engine);
        m.stop().await.unwrap();
        m.terminate().await.unwrap();
        assert!(engine.stop_calls().is_empty());
        assert_eq!(m.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn setters_apply_while_stopped() {
        let m = manager(&LocalEngine::new());
        m.set_server_port(47600).unwrap();
        m.set_consistent_id("node-a").unwrap();
        m.set_persistence(true).unwrap();
        let cfg = m.pending_configuration();
        assert_eq!(cfg.discovery.local_port, Some(47600));
        assert_eq!(cfg.consistent_id.as_deref(), Some("node-a"));
        assert!(cfg.persistence_enabled());
    }

    #[tokio::test]
    async fn start_failure_returns_to_stopped() {
        let engine = LocalEngine::new();
        engine.fail_next_start("discovery bind failed");
        let m = manager(&engine);

        let err = m.run().await.unwrap_err();
        assert!(matches!(err, LifecycleError::EngineStart(_)));
        assert_eq!(m.state(), LifecycleState::Stopped);
        assert_eq!(engine.started_configs().len(), 1);
    }

    #[tokio::test]
    async fn invalid_configuration_returns_to_stopped() {
        let engine = LocalEngine::new();
        let m = manager(&engine);
        m.set_server_port(0).unwrap();

        let err = m.run().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
        assert_eq!(m.state(), LifecycleState::Stopped);
        assert!(engine.started_configs().is_empty());
    }
}
