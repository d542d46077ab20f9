//! gridwarden-cluster — reactions to engine cluster events.
//!
//! The bridge registers two listeners on a running engine instance and
//! removes them again when the node winds down.
//!
//! ```text
//! ClusterEventBridge (one per manager) .attach(handle, policy)
//!   ├── MembershipListener
//!   │   ├── NodeJoined → info
//!   │   ├── NodeLeft   → warn, then NodeLeftPolicy
//!   │   └── NodeFailed → error
//!   ├── PartitionLossListener
//!   │   └── PartitionDataLost(cache) → reset_lost_partitions(cache), once
//!   └── broadcast::Sender<ClusterEvent> (every handled event republished)
//!         └── topology::observe → peer count log
//! ```
//!
//! Listeners run on the engine's dispatch thread and hold only a weak
//! reference to the instance, so they never keep a stopped engine alive.

pub mod bridge;
pub mod listeners;
pub mod topology;

pub use bridge::{BridgeSubscription, ClusterEventBridge};
pub use listeners::{MembershipListener, PartitionLossListener};
pub use topology::ClusterTopology;
