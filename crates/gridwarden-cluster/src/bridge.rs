//! Attaching and detaching the event listeners.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tracing::{debug, info};

use gridwarden_core::{ClusterEvent, ClusterEventKind, NodeLeftPolicy};
use gridwarden_engine::{EngineHandle, ListenerId};

use crate::listeners::{MembershipListener, PartitionLossListener};

/// Capacity of the republish channel. Slow observers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Owns the republish channel and attaches listeners to each running
/// engine instance in turn.
///
/// One bridge outlives many running lifetimes, so observers subscribed
/// once keep following the cluster across restarts.
pub struct ClusterEventBridge {
    events: broadcast::Sender<ClusterEvent>,
}

impl Default for ClusterEventBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterEventBridge {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events }
    }

    /// Follow every event the bridge handled, after it was handled.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Register the membership and partition-loss listeners on `handle`.
    ///
    /// Call once per running lifetime. The returned subscription removes
    /// both registrations when detached or dropped.
    pub fn attach(&self, handle: &Arc<dyn EngineHandle>, policy: NodeLeftPolicy) -> BridgeSubscription {
        let membership = Arc::new(MembershipListener::new(handle, policy, self.events.clone()));
        let loss = Arc::new(PartitionLossListener::new(handle, self.events.clone()));

        let ids = vec![
            handle.local_listen(membership, &ClusterEventKind::MEMBERSHIP),
            handle.local_listen(loss, &[ClusterEventKind::PartitionDataLost]),
        ];
        info!(instance = %handle.name(), ?policy, "cluster event bridge attached");

        BridgeSubscription {
            handle: Arc::downgrade(handle),
            ids,
        }
    }
}

/// Live listener registrations on one engine instance.
pub struct BridgeSubscription {
    handle: Weak<dyn EngineHandle>,
    ids: Vec<ListenerId>,
}

impl BridgeSubscription {
    pub fn listener_ids(&self) -> &[ListenerId] {
        &self.ids
    }

    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        match self.handle.upgrade() {
            Some(handle) => {
                for id in self.ids.drain(..) {
                    handle.stop_local_listen(id);
                }
                debug!(instance = %handle.name(), "cluster event bridge detached");
            }
            None => self.ids.clear(),
        }
    }
}

impl Drop for BridgeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
