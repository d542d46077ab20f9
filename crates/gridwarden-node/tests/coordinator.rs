//! Shutdown and restart coordination tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use gridwarden_core::LifecycleState;
use gridwarden_core::retry::RetryPolicy;
use gridwarden_engine::{LocalEngine, StopCall};
use gridwarden_node::{AdminBootstrap, NodeLifecycleManager, ShutdownCoordinator, StopReason};
use gridwarden_watch::{CredentialWatcher, ReloadSignal, WatchOptions};

use common::{builder, eventually, manager, wait_for_state, NODE};

struct Harness {
    engine: LocalEngine,
    manager: Arc<NodeLifecycleManager>,
    shutdown: Option<oneshot::Sender<()>>,
    reloads: mpsc::UnboundedSender<ReloadSignal>,
    task: tokio::task::JoinHandle<gridwarden_node::LifecycleResult<StopReason>>,
}

impl Harness {
    fn start(engine: LocalEngine, manager: Arc<NodeLifecycleManager>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
        let task = tokio::spawn(async move {
            coordinator
                .run(
                    async move {
                        let _ = shutdown_rx.await;
                    },
                    reload_rx,
                )
                .await
        });
        Self {
            engine,
            manager,
            shutdown: Some(shutdown_tx),
            reloads: reload_tx,
            task,
        }
    }

    fn simple() -> Self {
        let engine = LocalEngine::new();
        let manager = manager(&engine, builder());
        Self::start(engine, manager)
    }

    fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    async fn finish(self) -> StopReason {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("coordinator did not finish")
            .unwrap()
            .unwrap()
    }
}

#[tokio::test]
async fn termination_signal_stops_node() {
    let mut h = Harness::simple();
    wait_for_state(&h.manager, LifecycleState::Running).await;

    h.signal_shutdown();
    let engine = h.engine.clone();
    let manager = Arc::clone(&h.manager);
    assert_eq!(h.finish().await, StopReason::Stopped);

    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert_eq!(
        engine.stop_calls(),
        vec![StopCall { name: NODE.into(), graceful: false }]
    );
}

#[tokio::test]
async fn reload_terminates_and_runs_again() {
    let mut h = Harness::simple();
    wait_for_state(&h.manager, LifecycleState::Running).await;

    h.reloads.send(ReloadSignal).unwrap();
    eventually("second start", || {
        h.engine.started_configs().len() == 2 && h.manager.state() == LifecycleState::Running
    })
    .await;

    h.signal_shutdown();
    let engine = h.engine.clone();
    assert_eq!(h.finish().await, StopReason::Stopped);
    assert_eq!(
        engine.stop_calls(),
        vec![
            StopCall { name: NODE.into(), graceful: true },
            StopCall { name: NODE.into(), graceful: false },
        ]
    );
}

#[tokio::test]
async fn reload_during_start_waits_for_running() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LocalEngine::new();
    engine.refuse_connections(1);
    let mut b = builder();
    b.persistence(true).work_dir(dir.path());
    let slow = RetryPolicy::with_backoff(2, |_| Duration::from_millis(300));
    let manager = Arc::new(
        NodeLifecycleManager::new(Arc::new(engine.clone()), b)
            .with_bootstrap(AdminBootstrap::new("s3cret").with_retry_policy(slow)),
    );
    let mut h = Harness::start(engine, manager);

    eventually("first connect attempt", || h.engine.connect_attempts() == 1).await;
    assert_eq!(h.manager.state(), LifecycleState::Starting);
    h.reloads.send(ReloadSignal).unwrap();

    eventually("restart", || {
        h.engine.started_configs().len() == 2 && h.manager.state() == LifecycleState::Running
    })
    .await;
    assert!(h.engine.stop_calls()[0].graceful);

    h.signal_shutdown();
    assert_eq!(h.finish().await, StopReason::Stopped);
}

#[tokio::test]
async fn shutdown_during_start_stops_once_running() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LocalEngine::new();
    engine.refuse_connections(1);
    let mut b = builder();
    b.persistence(true).work_dir(dir.path());
    let slow = RetryPolicy::with_backoff(2, |_| Duration::from_millis(300));
    let manager = Arc::new(
        NodeLifecycleManager::new(Arc::new(engine.clone()), b)
            .with_bootstrap(AdminBootstrap::new("s3cret").with_retry_policy(slow)),
    );
    let mut h = Harness::start(engine, manager);

    eventually("first connect attempt", || h.engine.connect_attempts() == 1).await;
    h.signal_shutdown();
    h.reloads.send(ReloadSignal).unwrap();

    let engine = h.engine.clone();
    assert_eq!(h.finish().await, StopReason::Stopped);
    assert_eq!(engine.started_configs().len(), 1);
    assert_eq!(engine.stop_calls().len(), 1);
}

#[tokio::test]
async fn engine_stop_without_reload_ends_loop() {
    let h = Harness::simple();
    wait_for_state(&h.manager, LifecycleState::Running).await;

    h.engine.kill(NODE);
    let engine = h.engine.clone();
    assert_eq!(h.finish().await, StopReason::EngineStopped);
    assert_eq!(engine.started_configs().len(), 1);
}

#[tokio::test]
async fn start_failure_is_fatal() {
    let engine = LocalEngine::new();
    engine.fail_next_start("no route to discovery endpoints");
    let manager = manager(&engine, builder());
    let h = Harness::start(engine, manager);

    let result = tokio::time::timeout(Duration::from_secs(5), h.task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(gridwarden_node::LifecycleError::EngineStart(_))));
}

#[tokio::test]
async fn credential_rotation_restarts_node() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("client.pfx");
    std::fs::write(&cert, "v1").unwrap();

    let mut h = Harness::simple();
    wait_for_state(&h.manager, LifecycleState::Running).await;

    let reloads = h.reloads.clone();
    let watcher = CredentialWatcher::new(WatchOptions {
        poll_interval: Duration::from_millis(20),
        debounce: Duration::from_millis(200),
    });
    let guard = watcher
        .watch([&cert], move |signal| {
            let _ = reloads.send(signal);
        })
        .unwrap();

    for i in 2..5 {
        std::fs::write(&cert, format!("v{i}")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    eventually("restart after rotation", || {
        h.engine.started_configs().len() == 2 && h.manager.state() == LifecycleState::Running
    })
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.engine.started_configs().len(), 2);

    guard.close().await;
    h.signal_shutdown();
    assert_eq!(h.finish().await, StopReason::Stopped);
}
