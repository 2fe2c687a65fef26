//! File Watch Subsystem
//!
//! Binds cache keys to filesystem paths. A [`WatchBackend`] turns filesystem
//! activity into path notifications on a channel; the cache drains that
//! channel and invalidates whatever keys are bound to the path.

mod manual;
mod notify_backend;

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CacheError, Result};

pub use manual::ManualWatchBackend;
pub use notify_backend::NotifyBackend;

/// Where backends report changed paths.
pub type ChangeSender = mpsc::UnboundedSender<PathBuf>;

/// Keeps an OS watch alive; dropping it releases the watch.
pub struct WatchGuard(#[allow(dead_code)] Box<dyn Any + Send>);

impl WatchGuard {
    pub fn new<G: Send + 'static>(inner: G) -> Self {
        Self(Box::new(inner))
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchGuard")
    }
}

// == Backend Port ==
pub trait WatchBackend: Send + Sync {
    /// Starts watching `path`, sending `path` itself on `changes` for every
    /// relevant change until the returned guard is dropped.
    fn watch(&self, path: &Path, changes: ChangeSender) -> Result<WatchGuard>;
}

struct WatchedPath {
    _guard: WatchGuard,
    keys: BTreeSet<String>,
}

#[derive(Default)]
struct Bindings {
    by_path: HashMap<PathBuf, WatchedPath>,
    by_key: HashMap<String, PathBuf>,
    closed: bool,
}

// == Registry ==
/// Key ↔ path bindings, one backend watch per path.
pub struct FileWatchRegistry {
    backend: Arc<dyn WatchBackend>,
    changes: ChangeSender,
    bindings: Mutex<Bindings>,
}

impl FileWatchRegistry {
    pub fn new(backend: Arc<dyn WatchBackend>, changes: ChangeSender) -> Self {
        Self {
            backend,
            changes,
            bindings: Mutex::new(Bindings::default()),
        }
    }

    /// Key used when `watch_file` is called without one.
    pub fn default_key(path: &Path) -> String {
        format!("file:{}", path.display())
    }

    // == Watch ==
    /// Binds `key` to `path`, starting a backend watch if the path has none.
    ///
    /// A key is bound to at most one path; rebinding moves it.
    pub fn watch(&self, path: &Path, key: &str) -> Result<()> {
        let mut released = None;
        let mut bindings = self.bindings.lock();
        if bindings.closed {
            return Err(CacheError::watch(path, "watcher has been shut down"));
        }
        if bindings.by_key.get(key).is_some_and(|p| p == path) {
            return Ok(());
        }

        if !bindings.by_path.contains_key(path) {
            let guard = self.backend.watch(path, self.changes.clone())?;
            bindings.by_path.insert(
                path.to_path_buf(),
                WatchedPath {
                    _guard: guard,
                    keys: BTreeSet::new(),
                },
            );
            debug!(path = %path.display(), "Watching file");
        }

        if let Some(previous) = bindings.by_key.insert(key.to_string(), path.to_path_buf()) {
            released = Self::unbind(&mut bindings, &previous, key);
        }
        if let Some(watched) = bindings.by_path.get_mut(path) {
            watched.keys.insert(key.to_string());
        }
        drop(bindings);
        drop(released);
        Ok(())
    }

    // == Unwatch ==
    /// Releases a key's binding. Returns false if the key was not bound.
    pub fn unwatch(&self, key: &str) -> bool {
        let mut bindings = self.bindings.lock();
        let Some(path) = bindings.by_key.remove(key) else {
            return false;
        };
        let released = Self::unbind(&mut bindings, &path, key);
        drop(bindings);
        drop(released);
        true
    }

    /// Keys currently bound to `path`.
    pub fn keys_for(&self, path: &Path) -> Vec<String> {
        self.bindings
            .lock()
            .by_path
            .get(path)
            .map(|w| w.keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.bindings.lock().by_key.get(key).cloned()
    }

    pub fn is_watched(&self, key: &str) -> bool {
        self.bindings.lock().by_key.contains_key(key)
    }

    /// Number of paths with a live backend watch.
    pub fn watched_paths(&self) -> usize {
        self.bindings.lock().by_path.len()
    }

    /// Drops every watch and refuses new ones. Idempotent.
    pub fn close_all(&self) {
        let released = {
            let mut bindings = self.bindings.lock();
            bindings.closed = true;
            bindings.by_key.clear();
            std::mem::take(&mut bindings.by_path)
        };
        if !released.is_empty() {
            debug!(count = released.len(), "Closing file watchers");
        }
    }

    /// Removes `key` from `path`'s key set, handing back the path's watch if
    /// no keys remain so it can be dropped outside the lock.
    fn unbind(bindings: &mut Bindings, path: &Path, key: &str) -> Option<WatchedPath> {
        let watched = bindings.by_path.get_mut(path)?;
        watched.keys.remove(key);
        if watched.keys.is_empty() {
            bindings.by_path.remove(path)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for FileWatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bindings = self.bindings.lock();
        f.debug_struct("FileWatchRegistry")
            .field("paths", &bindings.by_path.len())
            .field("keys", &bindings.by_key.len())
            .finish()
    }
}
