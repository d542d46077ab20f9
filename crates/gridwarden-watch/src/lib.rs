//! gridwarden-watch — credential file watching for gridwarden.
//!
//! Certificate and key-store files are rotated underneath a running node.
//! The watcher polls every distinct file, fingerprints its contents and
//! folds each burst of writes into a single [`ReloadSignal`].
//!
//! ```text
//! CredentialWatcher::watch(paths)
//!   ├── one poll task per directory/filename pair
//!   │   └── Fingerprint (len, mtime, sha256) changed → touch
//!   ├── debounce task (single shared timer, re-armed by every touch)
//!   │   └── timer fires → on_change(ReloadSignal)
//!   └── WatchGuard (close().await or drop releases everything)
//! ```

pub mod debounce;
pub mod error;
pub mod watcher;

pub use debounce::Debouncer;
pub use error::{WatchError, WatchResult};
pub use watcher::{CredentialWatcher, Fingerprint, ReloadSignal, WatchGuard, WatchOptions};
