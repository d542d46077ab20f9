//! Shared helpers for the lifecycle integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gridwarden_core::{LifecycleState, NodeConfigurationBuilder};
use gridwarden_engine::LocalEngine;
use gridwarden_node::NodeLifecycleManager;

pub const NODE: &str = "node-1";

pub fn builder() -> NodeConfigurationBuilder {
    let mut b = NodeConfigurationBuilder::default();
    b.instance_name(NODE);
    b
}

pub fn manager(engine: &LocalEngine, builder: NodeConfigurationBuilder) -> Arc<NodeLifecycleManager> {
    Arc::new(NodeLifecycleManager::new(Arc::new(engine.clone()), builder))
}

pub async fn wait_for_state(manager: &NodeLifecycleManager, state: LifecycleState) {
    let mut rx = manager.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("state {state} not reached"))
        .unwrap();
}

pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
