//! Watch Dispatch Task
//!
//! Drains path notifications from the watch backend. Watch callbacks run on
//! the backend's own thread; routing them through a channel keeps cache
//! mutation on the runtime.

use std::path::PathBuf;
use std::sync::Weak;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Maintenance;

pub fn spawn_watch_dispatcher<M: Maintenance>(
    cache: Weak<M>,
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(path) = changes.recv().await {
            let Some(cache) = cache.upgrade() else {
                break;
            };
            debug!(path = %path.display(), "File changed");
            cache.handle_file_change(&path);
        }
        debug!("Watch dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingCache {
        changed: Mutex<Vec<PathBuf>>,
    }

    impl Maintenance for RecordingCache {
        fn sweep_expired(&self) -> usize {
            0
        }

        fn check_memory_pressure(&self) -> bool {
            false
        }

        fn handle_file_change(&self, path: &Path) {
            self.changed.lock().push(path.to_path_buf());
        }
    }

    #[tokio::test]
    async fn test_dispatches_until_sender_dropped() {
        let cache = Arc::new(RecordingCache::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_watch_dispatcher(Arc::downgrade(&cache), rx);

        tx.send(PathBuf::from("/a.ts")).unwrap();
        tx.send(PathBuf::from("/b.ts")).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(
            *cache.changed.lock(),
            vec![PathBuf::from("/a.ts"), PathBuf::from("/b.ts")]
        );
    }
}
