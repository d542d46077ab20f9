//! Engine event listeners.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use gridwarden_core::{ClusterEvent, NodeLeftPolicy};
use gridwarden_engine::{EngineHandle, EventListener};

/// Logs membership changes and applies the node-left policy.
pub struct MembershipListener {
    handle: Weak<dyn EngineHandle>,
    policy: NodeLeftPolicy,
    events: broadcast::Sender<ClusterEvent>,
}

impl MembershipListener {
    pub fn new(
        handle: &Arc<dyn EngineHandle>,
        policy: NodeLeftPolicy,
        events: broadcast::Sender<ClusterEvent>,
    ) -> Self {
        Self {
            handle: Arc::downgrade(handle),
            policy,
            events,
        }
    }

    pub fn policy(&self) -> NodeLeftPolicy {
        self.policy
    }

    fn reset_all_caches(&self) {
        let Some(handle) = self.handle.upgrade() else {
            debug!("engine released, skipping cache reset");
            return;
        };
        for cache in handle.cache_names() {
            match handle.reset_lost_partitions(&cache) {
                Ok(()) => info!(%cache, "lost partitions reset after node left"),
                Err(e) => error!(%cache, error = %e, "failed to reset lost partitions"),
            }
        }
    }
}

impl EventListener for MembershipListener {
    fn on_event(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::NodeJoined { node } => info!(
                addresses = %node.addresses_display(),
                hostnames = %node.hostnames_display(),
                "node joined the cluster"
            ),
            ClusterEvent::NodeLeft { node } => {
                warn!(
                    addresses = %node.addresses_display(),
                    hostnames = %node.hostnames_display(),
                    policy = ?self.policy,
                    "node left the cluster"
                );
                match self.policy {
                    // Partition-loss events drive any reset that is needed.
                    NodeLeftPolicy::DeferToPartitionLoss => {}
                    NodeLeftPolicy::ResetAllCaches => self.reset_all_caches(),
                }
            }
            ClusterEvent::NodeFailed { node } => error!(
                addresses = %node.addresses_display(),
                hostnames = %node.hostnames_display(),
                "node failed"
            ),
            ClusterEvent::PartitionDataLost { .. } => return,
        }
        let _ = self.events.send(event.clone());
    }
}

/// Resets lost partitions for the cache named in each loss event.
pub struct PartitionLossListener {
    handle: Weak<dyn EngineHandle>,
    events: broadcast::Sender<ClusterEvent>,
}

impl PartitionLossListener {
    pub fn new(handle: &Arc<dyn EngineHandle>, events: broadcast::Sender<ClusterEvent>) -> Self {
        Self {
            handle: Arc::downgrade(handle),
            events,
        }
    }
}

impl EventListener for PartitionLossListener {
    fn on_event(&self, event: &ClusterEvent) {
        let ClusterEvent::PartitionDataLost {
            cache_name,
            source_node,
        } = event
        else {
            return;
        };

        warn!(
            cache = %cache_name,
            source = %source_node.addresses_display(),
            "partition data lost"
        );
        match self.handle.upgrade() {
            Some(handle) => match handle.reset_lost_partitions(cache_name) {
                Ok(()) => info!(cache = %cache_name, "lost partitions reset"),
                Err(e) => error!(cache = %cache_name, error = %e, "failed to reset lost partitions"),
            },
            None => debug!(cache = %cache_name, "engine released, skipping reset"),
        }
        let _ = self.events.send(event.clone());
    }
}
