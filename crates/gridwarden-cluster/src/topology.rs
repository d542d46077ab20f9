//! Peer bookkeeping from republished cluster events.

use std::collections::BTreeSet;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use gridwarden_core::{ClusterEvent, NodeRef};

/// Remote members seen since the observer started, keyed by address list.
#[derive(Debug, Default)]
pub struct ClusterTopology {
    peers: BTreeSet<Vec<String>>,
    lost_partitions: u64,
}

impl ClusterTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns `true` if the peer set changed.
    pub fn apply(&mut self, event: &ClusterEvent) -> bool {
        match event {
            ClusterEvent::NodeJoined { node } => self.peers.insert(key(node)),
            ClusterEvent::NodeLeft { node } | ClusterEvent::NodeFailed { node } => {
                self.peers.remove(&key(node))
            }
            ClusterEvent::PartitionDataLost { .. } => {
                self.lost_partitions += 1;
                false
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Partition-loss events seen so far.
    pub fn lost_partitions(&self) -> u64 {
        self.lost_partitions
    }
}

fn key(node: &NodeRef) -> Vec<String> {
    let mut addresses = node.addresses.clone();
    addresses.sort();
    addresses
}

/// Log topology changes until the channel closes.
pub async fn observe(mut events: broadcast::Receiver<ClusterEvent>) -> ClusterTopology {
    let mut topology = ClusterTopology::new();
    loop {
        match events.recv().await {
            Ok(event) => {
                if topology.apply(&event) {
                    info!(
                        kind = %event.kind(),
                        peers = topology.peer_count(),
                        "cluster topology changed"
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "topology observer lagged, peer count may be stale");
            }
            Err(RecvError::Closed) => return topology,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> NodeRef {
        NodeRef::new(vec![addr.to_string()], vec![])
    }

    #[test]
    fn tracks_joins_and_departures() {
        let mut t = ClusterTopology::new();
        assert!(t.apply(&ClusterEvent::NodeJoined { node: node("10.0.0.2") }));
        assert!(t.apply(&ClusterEvent::NodeJoined { node: node("10.0.0.3") }));
        assert!(!t.apply(&ClusterEvent::NodeJoined { node: node("10.0.0.3") }));
        assert_eq!(t.peer_count(), 2);

        assert!(t.apply(&ClusterEvent::NodeLeft { node: node("10.0.0.2") }));
        assert!(t.apply(&ClusterEvent::NodeFailed { node: node("10.0.0.3") }));
        assert!(!t.apply(&ClusterEvent::NodeFailed { node: node("10.0.0.9") }));
        assert_eq!(t.peer_count(), 0);
    }

    #[test]
    fn partition_loss_does_not_change_peers() {
        let mut t = ClusterTopology::new();
        let ev = ClusterEvent::PartitionDataLost {
            cache_name: "orders".into(),
            source_node: node("10.0.0.2"),
        };
        assert!(!t.apply(&ev));
        assert_eq!(t.lost_partitions(), 1);
    }

    #[tokio::test]
    async fn observe_returns_when_channel_closes() {
        let (tx, rx) = broadcast::channel(8);
        let task = tokio::spawn(observe(rx));
        tx.send(ClusterEvent::NodeJoined { node: node("10.0.0.2") }).unwrap();
        tx.send(ClusterEvent::NodeJoined { node: node("10.0.0.3") }).unwrap();
        drop(tx);

        let topology = task.await.unwrap();
        assert_eq!(topology.peer_count(), 2);
    }
}
