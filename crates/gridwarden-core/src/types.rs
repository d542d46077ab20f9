//! Shared domain types: lifecycle states and cluster events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No engine running; configuration may be changed.
    Stopped,
    /// Engine start and bootstrap in progress.
    Starting,
    /// Engine running; configuration frozen.
    Running,
    /// Fast shutdown in progress.
    Stopping,
    /// Graceful, topology-aware shutdown in progress.
    Terminating,
}

impl LifecycleState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Terminating)
                | (Stopping, Stopped)
                | (Terminating, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// Network identity of a cluster member as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub addresses: Vec<String>,
    pub hostnames: Vec<String>,
}

impl NodeRef {
    pub fn new(addresses: Vec<String>, hostnames: Vec<String>) -> Self {
        Self {
            addresses,
            hostnames,
        }
    }

    /// Comma-joined addresses, for log fields.
    pub fn addresses_display(&self) -> String {
        self.addresses.join(",")
    }

    /// Comma-joined hostnames, for log fields.
    pub fn hostnames_display(&self) -> String {
        self.hostnames.join(",")
    }
}

/// Event kinds the engine can be asked to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterEventKind {
    NodeJoined,
    NodeLeft,
    NodeFailed,
    PartitionDataLost,
}

impl ClusterEventKind {
    /// Membership (discovery) kinds.
    pub const MEMBERSHIP: [ClusterEventKind; 3] = [
        ClusterEventKind::NodeJoined,
        ClusterEventKind::NodeLeft,
        ClusterEventKind::NodeFailed,
    ];

    /// Every kind the supervisor reacts to.
    pub const ALL: [ClusterEventKind; 4] = [
        ClusterEventKind::NodeJoined,
        ClusterEventKind::NodeLeft,
        ClusterEventKind::NodeFailed,
        ClusterEventKind::PartitionDataLost,
    ];
}

impl fmt::Display for ClusterEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterEventKind::NodeJoined => "node_joined",
            ClusterEventKind::NodeLeft => "node_left",
            ClusterEventKind::NodeFailed => "node_failed",
            ClusterEventKind::PartitionDataLost => "partition_data_lost",
        };
        f.write_str(s)
    }
}

/// Lifecycle and health notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    NodeJoined { node: NodeRef },
    NodeLeft { node: NodeRef },
    NodeFailed { node: NodeRef },
    PartitionDataLost { cache_name: String, source_node: NodeRef },
}

impl ClusterEvent {
    pub fn kind(&self) -> ClusterEventKind {
        match self {
            ClusterEvent::NodeJoined { .. } => ClusterEventKind::NodeJoined,
            ClusterEvent::NodeLeft { .. } => ClusterEventKind::NodeLeft,
            ClusterEvent::NodeFailed { .. } => ClusterEventKind::NodeFailed,
            ClusterEvent::PartitionDataLost { .. } => ClusterEventKind::PartitionDataLost,
        }
    }

    /// The node the event is about (the source node for partition loss).
    pub fn node(&self) -> &NodeRef {
        match self {
            ClusterEvent::NodeJoined { node }
            | ClusterEvent::NodeLeft { node }
            | ClusterEvent::NodeFailed { node } => node,
            ClusterEvent::PartitionDataLost { source_node, .. } => source_node,
        }
    }
}
