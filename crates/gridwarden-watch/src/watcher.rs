//! Polling credential watcher.
//!
//! Every distinct directory/filename pair gets its own poll task. A poll
//! compares the file's [`Fingerprint`] against the previous one; a new or
//! modified file sends a touch to the shared debounce task, a removed file
//! is only logged. The debounce task calls `on_change` once the touches
//! have been quiet for the whole window.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::debounce::Debouncer;
use crate::error::{WatchError, WatchResult};

/// Emitted once per settled burst of credential changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// How often each file is fingerprinted.
    pub poll_interval: Duration,
    /// Quiet period required before a reload is signalled.
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            debounce: Duration::from_secs(10),
        }
    }
}

/// Identity of a file's contents at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
    pub sha256: String,
}

impl Fingerprint {
    /// Fingerprint `path`, or `None` if it does not exist or cannot be read.
    pub fn of(path: &Path) -> Option<Self> {
        let read = std::fs::metadata(path)
            .and_then(|meta| Ok(Self::from_contents(&meta, &std::fs::read(path)?)));
        Self::or_missing(path, read)
    }

    /// [`of`](Self::of) without blocking the calling runtime worker.
    pub async fn of_async(path: &Path) -> Option<Self> {
        let read = async {
            let meta = tokio::fs::metadata(path).await?;
            let bytes = tokio::fs::read(path).await?;
            Ok::<_, io::Error>(Self::from_contents(&meta, &bytes))
        };
        Self::or_missing(path, read.await)
    }

    fn from_contents(meta: &std::fs::Metadata, bytes: &[u8]) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            sha256: hex::encode(Sha256::digest(bytes)),
        }
    }

    fn or_missing(path: &Path, read: io::Result<Self>) -> Option<Self> {
        match read {
            Ok(fp) => Some(fp),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = ?path, error = %e, "cannot read credential file");
                None
            }
        }
    }
}

/// Starts watch sessions.
#[derive(Debug, Clone, Default)]
pub struct CredentialWatcher {
    options: WatchOptions,
}

impl CredentialWatcher {
    pub fn new(options: WatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> WatchOptions {
        self.options
    }

    /// Watch `paths` until the returned guard is closed or dropped.
    ///
    /// Current contents are fingerprinted before this returns, so any
    /// write made afterwards is seen. Must be called inside a tokio runtime.
    pub fn watch<I, P, F>(&self, paths: I, on_change: F) -> WatchResult<WatchGuard>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: Fn(ReloadSignal) + Send + Sync + 'static,
    {
        let mut pairs: BTreeSet<(PathBuf, OsString)> = BTreeSet::new();
        for path in paths {
            let path = path.as_ref();
            let name = path
                .file_name()
                .ok_or_else(|| WatchError::InvalidPath(path.to_path_buf()))?;
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            pairs.insert((dir, name.to_os_string()));
        }
        if pairs.is_empty() {
            return Err(WatchError::NoPaths);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let poll_interval = self.options.poll_interval.max(Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (touch_tx, touch_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::with_capacity(pairs.len() + 1);
        let mut watched = Vec::with_capacity(pairs.len());
        for (dir, name) in pairs {
            let path = dir.join(name);
            let baseline = Fingerprint::of(&path);
            debug!(path = ?path, exists = baseline.is_some(), "watching credential file");
            tasks.push(runtime.spawn(poll_loop(
                path.clone(),
                poll_interval,
                baseline,
                touch_tx.clone(),
                shutdown_rx.clone(),
            )));
            watched.push(path);
        }
        tasks.push(runtime.spawn(debounce_loop(
            touch_rx,
            self.options.debounce,
            on_change,
            shutdown_rx,
        )));

        info!(
            files = watched.len(),
            debounce = ?self.options.debounce,
            "credential watcher started"
        );
        Ok(WatchGuard {
            shutdown_tx,
            tasks,
            paths: watched,
        })
    }
}

async fn poll_loop(
    path: PathBuf,
    every: Duration,
    mut last: Option<Fingerprint>,
    touches: mpsc::UnboundedSender<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = Fingerprint::of_async(&path).await;
                match (&last, &current) {
                    (Some(_), None) => debug!(path = ?path, "credential file removed"),
                    (None, None) => {}
                    (Some(a), Some(b)) if a == b => {}
                    (_, Some(_)) => {
                        if touches.send(path.clone()).is_err() {
                            break;
                        }
                    }
                }
                last = current;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn debounce_loop<F>(
    mut touches: mpsc::UnboundedReceiver<PathBuf>,
    window: Duration,
    on_change: F,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(ReloadSignal) + Send + Sync + 'static,
{
    let mut debouncer = Debouncer::new(window);

    loop {
        tokio::select! {
            touched = touches.recv() => match touched {
                Some(path) => {
                    debug!(path = ?path, "credential file changed");
                    debouncer.touch();
                }
                None => break,
            },
            _ = debouncer.fired() => {
                info!("credential changes settled, signalling reload");
                on_change(ReloadSignal);
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Owns the watch tasks. Dropping it stops them as well; `close` also
/// waits for them to finish.
pub struct WatchGuard {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    paths: Vec<PathBuf>,
}

impl WatchGuard {
    /// One entry per registration, after deduplication.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub async fn close(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "credential watch task panicked");
                }
            }
        }
        debug!("credential watcher closed");
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn fast() -> CredentialWatcher {
        CredentialWatcher::new(WatchOptions {
            poll_interval: Duration::from_millis(100),
            debounce: Duration::from_secs(1),
        })
    }

    fn counter() -> (Arc<AtomicU32>, impl Fn(ReloadSignal) + Send + Sync + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        (count, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_writes_signals_once() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pfx");
        std::fs::write(&cert, "v0").unwrap();
        let (count, on_change) = counter();
        let _guard = fast().watch([&cert], on_change).unwrap();

        for i in 1..=5 {
            std::fs::write(&cert, format!("v{i}")).unwrap();
            sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_writes_no_signal() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pfx");
        std::fs::write(&cert, "v0").unwrap();
        let (count, on_change) = counter();
        let _guard = fast().watch([&cert], on_change).unwrap();

        sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_signal_separately() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("node.jks");
        let trust = dir.path().join("trust.jks");
        std::fs::write(&key, "k0").unwrap();
        std::fs::write(&trust, "t0").unwrap();
        let (count, on_change) = counter();
        let _guard = fast().watch([&key, &trust], on_change).unwrap();

        std::fs::write(&key, "k1").unwrap();
        std::fs::write(&trust, "t1").unwrap();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        std::fs::write(&trust, "t2").unwrap();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn creation_triggers_deletion_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pfx");
        std::fs::write(&cert, "v0").unwrap();
        let (count, on_change) = counter();
        let _guard = fast().watch([&cert], on_change).unwrap();

        std::fs::remove_file(&cert).unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        std::fs::write(&cert, "v1").unwrap();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_is_watched_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("later.pfx");
        let (count, on_change) = counter();
        let _guard = fast().watch([&cert], on_change).unwrap();

        sleep(Duration::from_secs(2)).await;
        std::fs::write(&cert, "v1").unwrap();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_paths_share_one_registration() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jks");
        let b = dir.path().join("b.jks");
        let guard = fast().watch([&a, &a, &b], |_| {}).unwrap();
        assert_eq!(guard.paths(), &[a, b]);
        guard.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_guard_stops_watching() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pfx");
        std::fs::write(&cert, "v0").unwrap();
        let (count, on_change) = counter();
        let guard = fast().watch([&cert], on_change).unwrap();

        guard.close().await;
        std::fs::write(&cert, "v1").unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_guard_stops_watching() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("client.pfx");
        std::fs::write(&cert, "v0").unwrap();
        let (count, on_change) = counter();
        let guard = fast().watch([&cert], on_change).unwrap();

        std::fs::write(&cert, "v1").unwrap();
        sleep(Duration::from_millis(200)).await;
        drop(guard);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_bad_input() {
        let watcher = CredentialWatcher::default();
        let none: [&Path; 0] = [];
        assert!(matches!(watcher.watch(none, |_| {}), Err(WatchError::NoPaths)));
        assert!(matches!(
            watcher.watch(["/"], |_| {}),
            Err(WatchError::InvalidPath(_))
        ));
        assert!(matches!(
            watcher.watch(["/tmp/client.pfx"], |_| {}),
            Err(WatchError::NoRuntime)
        ));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("x");
        assert!(Fingerprint::of(&f).is_none());
        std::fs::write(&f, "abc").unwrap();
        let a = Fingerprint::of(&f).unwrap();
        assert_eq!(a.len, 3);
        assert_eq!(
            a.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        std::fs::write(&f, "abd").unwrap();
        assert_ne!(Fingerprint::of(&f).unwrap().sha256, a.sha256);
    }

    #[tokio::test]
    async fn async_fingerprint_matches_blocking_one() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("node.jks");
        assert!(Fingerprint::of_async(&f).await.is_none());
        std::fs::write(&f, "keystore").unwrap();
        assert_eq!(Fingerprint::of_async(&f).await, Fingerprint::of(&f));
    }
}
