//! Watch backend driven by hand, for tests and embedders with their own
//! change detection.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChangeSender, WatchBackend, WatchGuard};
use crate::error::{CacheError, Result};

type Watchers = Arc<Mutex<HashMap<PathBuf, (u64, ChangeSender)>>>;

#[derive(Default)]
pub struct ManualWatchBackend {
    watchers: Watchers,
    failing: Mutex<HashSet<PathBuf>>,
    next_id: Mutex<u64>,
}

impl ManualWatchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes future `watch` calls for `path` fail as if it did not exist.
    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().insert(path.to_path_buf());
    }

    /// Reports a change to `path`. Returns false if nothing watches it.
    pub fn trigger(&self, path: &Path) -> bool {
        match self.watchers.lock().get(path) {
            Some((_, tx)) => tx.send(path.to_path_buf()).is_ok(),
            None => false,
        }
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watchers.lock().contains_key(path)
    }
}

impl WatchBackend for ManualWatchBackend {
    fn watch(&self, path: &Path, changes: ChangeSender) -> Result<WatchGuard> {
        if self.failing.lock().contains(path) {
            return Err(CacheError::watch(path, "no such file or directory"));
        }
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            *next
        };
        self.watchers
            .lock()
            .insert(path.to_path_buf(), (id, changes));
        Ok(WatchGuard::new(ManualGuard {
            path: path.to_path_buf(),
            id,
            watchers: self.watchers.clone(),
        }))
    }
}

impl std::fmt::Debug for ManualWatchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualWatchBackend")
            .field("watching", &self.watchers.lock().len())
            .finish()
    }
}

struct ManualGuard {
    path: PathBuf,
    id: u64,
    watchers: Watchers,
}

impl Drop for ManualGuard {
    fn drop(&mut self) {
        let mut watchers = self.watchers.lock();
        // A newer watch on the same path owns the slot now
        if watchers.get(&self.path).is_some_and(|(id, _)| *id == self.id) {
            watchers.remove(&self.path);
        }
    }
}
