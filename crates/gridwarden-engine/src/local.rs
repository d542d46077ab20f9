//! In-process engine.
//!
//! `LocalEngine` implements the engine boundary inside the current
//! process. Every instance started on the same `LocalEngine` sees the
//! others as cluster peers: starting one announces `NodeJoined` to the
//! rest, stopping it announces `NodeLeft` (or `NodeFailed` when it is
//! killed). Each instance owns one event-dispatch thread, so listeners
//! never run on the caller's task.
//!
//! Admin users live with the instance. With persistence enabled they are
//! written to `<work_dir>/auth.json` and survive restarts.
//!
//! The engine also exposes fault injection (refused connections, failed
//! starts, failing partition resets) and a record of the calls it
//! received, which is what the supervisor's tests drive.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use gridwarden_core::config::NodeConfiguration;
use gridwarden_core::{ClusterEvent, ClusterEventKind, NodeRef};

use crate::api::{
    AdminClient, ClientConfiguration, Engine, EngineHandle, EventListener, ListenerId,
};
use crate::error::{ClientError, ClientResult, EngineError, EngineResult};

/// Built-in administrative principal.
pub const DEFAULT_ADMIN_USER: &str = "ignite";
/// Its password until rotated.
pub const DEFAULT_ADMIN_PASSWORD: &str = "ignite";

const AUTH_FILE: &str = "auth.json";
const DEFAULT_DISCOVERY_PORT: u16 = 47500;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A `stop` call as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCall {
    pub name: String,
    pub graceful: bool,
}

#[derive(Default)]
struct Faults {
    start_failure: Mutex<Option<String>>,
    refused_connections: AtomicU32,
}

#[derive(Default)]
struct Journal {
    starts: Mutex<Vec<NodeConfiguration>>,
    stops: Mutex<Vec<StopCall>>,
    resets: Mutex<Vec<String>>,
    connects: AtomicU32,
    clients: Mutex<Vec<ClientConfiguration>>,
}

struct EngineInner {
    nodes: Mutex<HashMap<String, Arc<LocalNode>>>,
    next_instance: AtomicU64,
    faults: Faults,
    journal: Arc<Journal>,
}

/// The in-process engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct LocalEngine {
    inner: Arc<EngineInner>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                nodes: Mutex::new(HashMap::new()),
                next_instance: AtomicU64::new(1),
                faults: Faults::default(),
                journal: Arc::new(Journal::default()),
            }),
        }
    }

    /// Make the next `start` fail with `reason`.
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        *lock(&self.inner.faults.start_failure) = Some(reason.into());
    }

    /// Refuse the next `n` admin client connections.
    pub fn refuse_connections(&self, n: u32) {
        self.inner.faults.refused_connections.store(n, Ordering::SeqCst);
    }

    /// A running instance by name.
    pub fn node(&self, name: &str) -> Option<Arc<LocalNode>> {
        lock(&self.inner.nodes).get(name).cloned()
    }

    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.nodes).keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver `event` to the named instance's listeners.
    pub fn emit(&self, name: &str, event: ClusterEvent) -> bool {
        match self.node(name) {
            Some(node) => {
                node.emit(event);
                true
            }
            None => false,
        }
    }

    /// Kill an instance without going through `stop`, as if it crashed
    /// or was segmented. Peers see `NodeFailed`.
    pub fn kill(&self, name: &str) -> bool {
        let node = lock(&self.inner.nodes).remove(name);
        match node {
            Some(node) => {
                warn!(instance = %name, "instance killed");
                node.shutdown();
                self.announce(ClusterEvent::NodeFailed {
                    node: node.node_ref(),
                });
                true
            }
            None => false,
        }
    }

    /// Configurations passed to `start`, oldest first.
    pub fn started_configs(&self) -> Vec<NodeConfiguration> {
        lock(&self.inner.journal.starts).clone()
    }

    pub fn stop_calls(&self) -> Vec<StopCall> {
        lock(&self.inner.journal.stops).clone()
    }

    /// Cache names passed to `reset_lost_partitions`, in call order.
    pub fn reset_calls(&self) -> Vec<String> {
        lock(&self.inner.journal.resets).clone()
    }

    /// Number of admin connection attempts, refused ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.journal.connects.load(Ordering::SeqCst)
    }

    /// Client configurations passed to `connect_client`, oldest first.
    pub fn client_configs(&self) -> Vec<ClientConfiguration> {
        lock(&self.inner.journal.clients).clone()
    }

    fn announce(&self, event: ClusterEvent) {
        let peers: Vec<Arc<LocalNode>> = lock(&self.inner.nodes).values().cloned().collect();
        for peer in peers {
            peer.emit(event.clone());
        }
    }

    fn instance_name(&self, config: &NodeConfiguration) -> String {
        config.instance_name.clone().unwrap_or_else(|| {
            let n = self.inner.next_instance.fetch_add(1, Ordering::SeqCst);
            format!("grid-node-{n}")
        })
    }
}

#[async_trait]
impl Engine for LocalEngine {
    async fn start(&self, config: &NodeConfiguration) -> EngineResult<Arc<dyn EngineHandle>> {
        lock(&self.inner.journal.starts).push(config.clone());

        if let Some(reason) = lock(&self.inner.faults.start_failure).take() {
            return Err(EngineError::Start(reason));
        }

        if let Some(tls) = &config.tls {
            for store in [&tls.key_store, &tls.trust_store] {
                if !store.path.exists() {
                    return Err(EngineError::Start(format!(
                        "TLS store not found: {}",
                        store.path.display()
                    )));
                }
            }
        }

        let name = self.instance_name(config);
        if lock(&self.inner.nodes).contains_key(&name) {
            return Err(EngineError::AlreadyRunning(name));
        }

        let auth_file = if config.persistence_enabled() {
            std::fs::create_dir_all(&config.work_dir)
                .map_err(|e| EngineError::Start(format!("work directory: {e}")))?;
            Some(config.work_dir.join(AUTH_FILE))
        } else {
            None
        };
        let users = load_users(auth_file.as_ref())?;

        let node = LocalNode::spawn(
            name.clone(),
            config.clone(),
            users,
            auth_file,
            Arc::clone(&self.inner.journal),
        )?;

        self.announce(ClusterEvent::NodeJoined {
            node: node.node_ref(),
        });
        lock(&self.inner.nodes).insert(name.clone(), Arc::clone(&node));

        info!(
            instance = %name,
            port = node.discovery_port().unwrap_or_default(),
            persistence = config.persistence_enabled(),
            "engine instance started"
        );
        Ok(node)
    }

    async fn stop(&self, name: &str, graceful: bool) -> bool {
        lock(&self.inner.journal.stops).push(StopCall {
            name: name.to_string(),
            graceful,
        });

        let node = lock(&self.inner.nodes).remove(name);
        match node {
            Some(node) => {
                node.shutdown();
                self.announce(ClusterEvent::NodeLeft {
                    node: node.node_ref(),
                });
                info!(instance = %name, graceful, "engine instance stopped");
                true
            }
            None => {
                debug!(instance = %name, "stop requested for unknown instance");
                false
            }
        }
    }

    async fn connect_client(&self, config: &ClientConfiguration) -> ClientResult<Box<dyn AdminClient>> {
        self.inner.journal.connects.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.journal.clients).push(config.clone());

        let refused = &self.inner.faults.refused_connections;
        if refused
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClientError::ConnectionRefused(config.endpoint.clone()));
        }

        let node = {
            let nodes = lock(&self.inner.nodes);
            let mut names: Vec<&String> = nodes.keys().collect();
            names.sort();
            names.first().and_then(|n| nodes.get(*n)).cloned()
        };
        let node = node.ok_or_else(|| ClientError::ConnectionRefused(config.endpoint.clone()))?;

        let user = config.user_name.clone().unwrap_or_default();
        if node.config.authentication_enabled {
            let ok = lock(&node.users)
                .get(&user)
                .is_some_and(|pw| Some(pw) == config.password.as_ref());
            if !ok {
                return Err(ClientError::AuthenticationFailed { user });
            }
        }

        debug!(instance = %node.name, %user, "admin client connected");
        Ok(Box::new(LocalAdminClient { node }))
    }
}

fn load_users(auth_file: Option<&PathBuf>) -> EngineResult<HashMap<String, String>> {
    if let Some(path) = auth_file {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            return serde_json::from_str(&text)
                .map_err(|e| EngineError::Start(format!("corrupt {}: {e}", path.display())));
        }
    }
    Ok(HashMap::from([(
        DEFAULT_ADMIN_USER.to_string(),
        DEFAULT_ADMIN_PASSWORD.to_string(),
    )]))
}

struct Registration {
    kinds: BTreeSet<ClusterEventKind>,
    listener: Arc<dyn EventListener>,
}

type Registrations = Arc<Mutex<BTreeMap<ListenerId, Registration>>>;

/// A running in-process instance.
pub struct LocalNode {
    name: String,
    config: NodeConfiguration,
    active: AtomicBool,
    baseline: Mutex<Option<Duration>>,
    stopped_tx: watch::Sender<bool>,
    listeners: Registrations,
    next_listener: AtomicU64,
    dispatch: Mutex<Option<mpsc::Sender<ClusterEvent>>>,
    caches: Mutex<BTreeSet<String>>,
    lost: Mutex<BTreeSet<String>>,
    users: Mutex<HashMap<String, String>>,
    auth_file: Option<PathBuf>,
    journal: Arc<Journal>,
    failing_resets: AtomicBool,
}

impl LocalNode {
    fn spawn(
        name: String,
        config: NodeConfiguration,
        users: HashMap<String, String>,
        auth_file: Option<PathBuf>,
        journal: Arc<Journal>,
    ) -> EngineResult<Arc<Self>> {
        let (tx, rx) = mpsc::channel::<ClusterEvent>();
        let listeners: Registrations = Arc::new(Mutex::new(BTreeMap::new()));

        let thread_listeners = Arc::clone(&listeners);
        let thread_name = format!("engine-events-{name}");
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || dispatch_loop(rx, thread_listeners))?;

        let (stopped_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            name,
            config,
            active: AtomicBool::new(false),
            baseline: Mutex::new(None),
            stopped_tx,
            listeners,
            next_listener: AtomicU64::new(1),
            dispatch: Mutex::new(Some(tx)),
            caches: Mutex::new(BTreeSet::new()),
            lost: Mutex::new(BTreeSet::new()),
            users: Mutex::new(users),
            auth_file,
            journal,
            failing_resets: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &NodeConfiguration {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Baseline auto-adjust timeout, if enabled.
    pub fn baseline_auto_adjust(&self) -> Option<Duration> {
        *lock(&self.baseline)
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Caches with partitions currently marked lost.
    pub fn lost_caches(&self) -> Vec<String> {
        lock(&self.lost).iter().cloned().collect()
    }

    pub fn admin_password(&self, user: &str) -> Option<String> {
        lock(&self.users).get(user).cloned()
    }

    pub fn create_cache(&self, name: &str) {
        lock(&self.caches).insert(name.to_string());
    }

    /// Make every lost-partition reset on this node fail.
    pub fn set_failing_resets(&self, failing: bool) {
        self.failing_resets.store(failing, Ordering::SeqCst);
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(vec!["127.0.0.1".to_string()], vec![self.name.clone()])
    }

    /// Queue an event for the dispatch thread.
    pub fn emit(&self, event: ClusterEvent) {
        if let ClusterEvent::PartitionDataLost { cache_name, .. } = &event {
            lock(&self.caches).insert(cache_name.clone());
            lock(&self.lost).insert(cache_name.clone());
        }
        if let Some(tx) = lock(&self.dispatch).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn shutdown(&self) {
        // Dropping the sender ends the dispatch thread after it drains.
        lock(&self.dispatch).take();
        self.active.store(false, Ordering::SeqCst);
        self.stopped_tx.send_replace(true);
    }

    fn persist_users(&self) -> ClientResult<()> {
        if let Some(path) = &self.auth_file {
            let users = lock(&self.users).clone();
            let text = serde_json::to_string_pretty(&users)
                .map_err(|e| ClientError::Command(e.to_string()))?;
            std::fs::write(path, text)?;
        }
        Ok(())
    }
}

fn dispatch_loop(rx: mpsc::Receiver<ClusterEvent>, listeners: Registrations) {
    for event in rx {
        let kind = event.kind();
        let targets: Vec<Arc<dyn EventListener>> = lock(&listeners)
            .values()
            .filter(|r| r.kinds.contains(&kind))
            .map(|r| Arc::clone(&r.listener))
            .collect();
        for listener in targets {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(%kind, panic = %msg, "event listener panicked");
            }
        }
    }
}

impl EngineHandle for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_cluster_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        debug!(instance = %self.name, active, "cluster activation changed");
    }

    fn set_baseline_auto_adjust(&self, enabled: bool, timeout: Duration) {
        *lock(&self.baseline) = enabled.then_some(timeout);
        debug!(instance = %self.name, enabled, timeout = ?timeout, "baseline auto-adjust set");
    }

    fn stopped(&self) -> watch::Receiver<bool> {
        self.stopped_tx.subscribe()
    }

    fn local_listen(&self, listener: Arc<dyn EventListener>, kinds: &[ClusterEventKind]) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).insert(
            id,
            Registration {
                kinds: kinds.iter().copied().collect(),
                listener,
            },
        );
        id
    }

    fn stop_local_listen(&self, id: ListenerId) -> bool {
        lock(&self.listeners).remove(&id).is_some()
    }

    fn reset_lost_partitions(&self, cache_name: &str) -> EngineResult<()> {
        lock(&self.journal.resets).push(cache_name.to_string());

        if self.failing_resets.load(Ordering::SeqCst) {
            return Err(EngineError::ResetFailed {
                cache: cache_name.to_string(),
                reason: "partition owners unavailable".to_string(),
            });
        }
        if !lock(&self.caches).contains(cache_name) {
            return Err(EngineError::CacheNotFound(cache_name.to_string()));
        }
        lock(&self.lost).remove(cache_name);
        Ok(())
    }

    fn cache_names(&self) -> Vec<String> {
        lock(&self.caches).iter().cloned().collect()
    }

    fn discovery_port(&self) -> Option<u16> {
        Some(self.config.discovery.local_port.unwrap_or(DEFAULT_DISCOVERY_PORT))
    }
}

struct LocalAdminClient {
    node: Arc<LocalNode>,
}

impl LocalAdminClient {
    fn ensure_running(&self) -> ClientResult<()> {
        if *self.node.stopped_tx.borrow() {
            return Err(ClientError::ConnectionRefused(self.node.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl AdminClient for LocalAdminClient {
    async fn execute_admin_command(&mut self, cache_name: &str, sql: &str) -> ClientResult<()> {
        self.ensure_running()?;
        self.node.create_cache(cache_name);

        let (user, password) = parse_alter_user(sql)
            .ok_or_else(|| ClientError::Command(format!("unsupported statement: {sql}")))?;
        {
            let mut users = lock(&self.node.users);
            if !users.contains_key(&user) {
                return Err(ClientError::Command(format!("user does not exist: {user}")));
            }
            users.insert(user.clone(), password);
        }
        self.node.persist_users()?;
        info!(instance = %self.node.name, %user, "admin password changed");
        Ok(())
    }

    async fn destroy_ephemeral_cache(&mut self, cache_name: &str) -> ClientResult<()> {
        self.ensure_running()?;
        if lock(&self.node.caches).remove(cache_name) {
            Ok(())
        } else {
            Err(ClientError::CacheNotFound(cache_name.to_string()))
        }
    }
}

/// Parse `ALTER USER "name" WITH PASSWORD 'secret';`. Doubled single
/// quotes inside the password are unescaped.
fn parse_alter_user(sql: &str) -> Option<(String, String)> {
    let rest = sql.trim().strip_suffix(';').unwrap_or(sql.trim());
    let rest = rest.strip_prefix("ALTER USER ")?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let (user, rest) = rest.split_once('"')?;
    let rest = rest.trim_start().strip_prefix("WITH PASSWORD")?.trim();
    let password = rest.strip_prefix('\'')?.strip_suffix('\'')?;
    Some((user.to_string(), password.replace("''", "'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwarden_core::config::NodeConfigurationBuilder;

    struct Recorder(Mutex<Vec<ClusterEvent>>, mpsc::Sender<()>);

    impl EventListener for Recorder {
        fn on_event(&self, event: &ClusterEvent) {
            lock(&self.0).push(event.clone());
            let _ = self.1.send(());
        }
    }

    fn named(name: &str) -> NodeConfiguration {
        let mut b = NodeConfigurationBuilder::default();
        b.instance_name(name);
        b.build().unwrap()
    }

    fn lost(cache: &str) -> ClusterEvent {
        ClusterEvent::PartitionDataLost {
            cache_name: cache.to_string(),
            source_node: NodeRef::default(),
        }
    }

    #[test]
    fn parses_alter_user() {
        assert_eq!(
            parse_alter_user(r#"ALTER USER "ignite" WITH PASSWORD 's3cr''et';"#),
            Some(("ignite".to_string(), "s3cr'et".to_string()))
        );
        assert_eq!(parse_alter_user("SELECT 1;"), None);
    }

    #[tokio::test]
    async fn start_and_stop_flip_stopped_notification() {
        let engine = LocalEngine::new();
        let handle = engine.start(&named("a")).await.unwrap();
        let mut stopped = handle.stopped();
        assert!(!*stopped.borrow());
        assert_eq!(engine.running_names(), vec!["a"]);

        assert!(engine.stop("a", true).await);
        stopped.wait_for(|s| *s).await.unwrap();
        assert!(!engine.stop("a", true).await);
        assert_eq!(
            engine.stop_calls(),
            vec![
                StopCall { name: "a".into(), graceful: true },
                StopCall { name: "a".into(), graceful: true },
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_instance_name_rejected() {
        let engine = LocalEngine::new();
        engine.start(&named("a")).await.unwrap();
        let err = engine.start(&named("a")).await.err().unwrap();
        assert!(matches!(err, EngineError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn injected_start_failure_is_one_shot() {
        let engine = LocalEngine::new();
        engine.fail_next_start("bad discovery config");
        assert!(matches!(
            engine.start(&named("a")).await.err().unwrap(),
            EngineError::Start(_)
        ));
        engine.start(&named("a")).await.unwrap();
        assert_eq!(engine.started_configs().len(), 2);
    }

    #[tokio::test]
    async fn generated_names_are_unique() {
        let engine = LocalEngine::new();
        let cfg = NodeConfiguration::default();
        let a = engine.start(&cfg).await.unwrap();
        let b = engine.start(&cfg).await.unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[tokio::test]
    async fn events_reach_matching_listeners_in_order() {
        let engine = LocalEngine::new();
        let handle = engine.start(&named("a")).await.unwrap();
        let (tx, rx) = mpsc::channel();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new()), tx));
        let id = handle.local_listen(recorder.clone(), &[ClusterEventKind::PartitionDataLost]);

        engine.emit("a", lost("orders"));
        engine.emit("a", ClusterEvent::NodeJoined { node: NodeRef::default() });
        engine.emit("a", lost("payments"));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let seen = lock(&recorder.0).clone();
        assert_eq!(seen, vec![lost("orders"), lost("payments")]);

        assert!(handle.stop_local_listen(id));
        assert!(!handle.stop_local_listen(id));
    }

    #[tokio::test]
    async fn peers_see_join_and_leave() {
        let engine = LocalEngine::new();
        let a = engine.start(&named("a")).await.unwrap();
        let (tx, rx) = mpsc::channel();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new()), tx));
        a.local_listen(recorder.clone(), &ClusterEventKind::MEMBERSHIP);

        engine.start(&named("b")).await.unwrap();
        engine.stop("b", false).await;
        engine.start(&named("c")).await.unwrap();
        engine.kill("c");
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        let kinds: Vec<ClusterEventKind> = lock(&recorder.0).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ClusterEventKind::NodeJoined,
                ClusterEventKind::NodeLeft,
                ClusterEventKind::NodeJoined,
                ClusterEventKind::NodeFailed,
            ]
        );
    }

    #[tokio::test]
    async fn reset_clears_lost_partitions() {
        let engine = LocalEngine::new();
        let handle = engine.start(&named("a")).await.unwrap();
        let node = engine.node("a").unwrap();
        node.emit(lost("orders"));
        assert_eq!(node.lost_caches(), vec!["orders"]);

        handle.reset_lost_partitions("orders").unwrap();
        assert!(node.lost_caches().is_empty());
        assert!(matches!(
            handle.reset_lost_partitions("missing"),
            Err(EngineError::CacheNotFound(_))
        ));

        node.set_failing_resets(true);
        assert!(matches!(
            handle.reset_lost_partitions("orders"),
            Err(EngineError::ResetFailed { .. })
        ));
        assert_eq!(engine.reset_calls(), vec!["orders", "missing", "orders"]);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_kill_dispatch() {
        struct Boom;
        impl EventListener for Boom {
            fn on_event(&self, _: &ClusterEvent) {
                panic!("listener bug");
            }
        }

        let engine = LocalEngine::new();
        let handle = engine.start(&named("a")).await.unwrap();
        handle.local_listen(Arc::new(Boom), &[ClusterEventKind::PartitionDataLost]);
        let (tx, rx) = mpsc::channel();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new()), tx));
        handle.local_listen(recorder.clone(), &[ClusterEventKind::PartitionDataLost]);

        engine.emit("a", lost("orders"));
        engine.emit("a", lost("payments"));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(lock(&recorder.0).len(), 2);
    }

    #[tokio::test]
    async fn admin_client_rotates_password_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let engine = LocalEngine::new();
        let mut b = NodeConfigurationBuilder::default();
        b.instance_name("a").authentication(true).work_dir(dir.path());
        let cfg = b.build().unwrap();
        engine.start(&cfg).await.unwrap();

        let admin = ClientConfiguration {
            user_name: Some(DEFAULT_ADMIN_USER.into()),
            password: Some(DEFAULT_ADMIN_PASSWORD.into()),
            ..Default::default()
        };
        let mut client = engine.connect_client(&admin).await.unwrap();
        client
            .execute_admin_command("tmp", r#"ALTER USER "ignite" WITH PASSWORD 'n3w';"#)
            .await
            .unwrap();
        client.destroy_ephemeral_cache("tmp").await.unwrap();
        assert!(matches!(
            client.destroy_ephemeral_cache("tmp").await,
            Err(ClientError::CacheNotFound(_))
        ));
        drop(client);

        // The rotated password survives a restart.
        engine.stop("a", false).await;
        engine.start(&cfg).await.unwrap();
        assert!(matches!(
            engine.connect_client(&admin).await.err().unwrap(),
            ClientError::AuthenticationFailed { .. }
        ));
        assert_eq!(engine.node("a").unwrap().admin_password("ignite").as_deref(), Some("n3w"));
    }

    #[tokio::test]
    async fn refused_connections_count_down() {
        let engine = LocalEngine::new();
        engine.start(&named("a")).await.unwrap();
        engine.refuse_connections(2);
        let cfg = ClientConfiguration::default();

        assert!(matches!(
            engine.connect_client(&cfg).await.err().unwrap(),
            ClientError::ConnectionRefused(_)
        ));
        assert!(engine.connect_client(&cfg).await.is_err());
        assert!(engine.connect_client(&cfg).await.is_ok());
        assert_eq!(engine.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn no_running_node_refuses_connection() {
        let engine = LocalEngine::new();
        assert!(matches!(
            engine.connect_client(&ClientConfiguration::default()).await.err().unwrap(),
            ClientError::ConnectionRefused(_)
        ));
    }

    #[tokio::test]
    async fn missing_tls_store_fails_start() {
        use gridwarden_core::config::{ServerTls, StoreMaterial};
        let mut b = NodeConfigurationBuilder::default();
        b.server_tls(Some(ServerTls {
            key_store: StoreMaterial { path: "/nonexistent/k.jks".into(), password: None },
            trust_store: StoreMaterial { path: "/nonexistent/t.jks".into(), password: None },
            protocol: "TLSv1.2".into(),
        }));
        let err = LocalEngine::new().start(&b.build().unwrap()).await.err().unwrap();
        assert!(matches!(err, EngineError::Start(_)));
    }
}
