//! Watch backend on top of the `notify` crate.
//!
//! Each file gets an OS watcher on its parent directory, filtered to events
//! naming the file. Editors that save by renaming a temporary file over the
//! original replace its inode, which would silently end a watch placed on the
//! file itself.

use std::ffi::OsStr;
use std::path::Path;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::warn;

use super::{ChangeSender, WatchBackend, WatchGuard};
use crate::error::{CacheError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Content, rename, create and remove events count; metadata-only and access
/// events do not.
fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

fn names_file(event: &Event, name: &OsStr) -> bool {
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

impl WatchBackend for NotifyBackend {
    fn watch(&self, path: &Path, changes: ChangeSender) -> Result<WatchGuard> {
        if !path.exists() {
            return Err(CacheError::watch(path, "no such file or directory"));
        }

        let Some(name) = path.file_name().map(OsStr::to_os_string) else {
            return Err(CacheError::watch(path, "not a file path"));
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let registered = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_change(&event.kind) && names_file(&event, &name) => {
                // Receiver gone means the cache is shutting down
                let _ = changes.send(registered.clone());
            }
            Ok(_) => {}
            Err(e) => warn!(path = %registered.display(), error = %e, "File watch error"),
        })
        .map_err(|e| CacheError::watch(path, e))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| CacheError::watch(path, e))?;
        Ok(WatchGuard::new(watcher))
    }
}
