//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries,
//! independent of access pattern.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Maintenance;

/// Spawns a background task that periodically sweeps expired entries.
///
/// The task sleeps for `interval` between runs and exits once the cache it
/// points at has been dropped.
///
/// # Returns
/// A JoinHandle for the spawned task, aborted by `destroy`.
pub fn spawn_sweep_task<M: Maintenance>(cache: Weak<M>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Starting TTL sweep task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = cache.upgrade() else {
                debug!("Cache dropped, stopping TTL sweep task");
                return;
            };
            let removed = cache.sweep_expired();

            if removed > 0 {
                info!("TTL sweep: removed {} expired entries", removed);
            } else {
                debug!("TTL sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingCache {
        sweeps: AtomicUsize,
    }

    impl Maintenance for CountingCache {
        fn sweep_expired(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn check_memory_pressure(&self) -> bool {
            false
        }

        fn handle_file_change(&self, _path: &Path) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_every_interval() {
        let cache = Arc::new(CountingCache::default());
        let handle = spawn_sweep_task(Arc::downgrade(&cache), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(cache.sweeps.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_stops_when_cache_dropped() {
        let cache = Arc::new(CountingCache::default());
        let handle = spawn_sweep_task(Arc::downgrade(&cache), Duration::from_secs(1));
        drop(cache);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(handle.is_finished(), "Task should exit once the cache is gone");
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_aborted() {
        let cache = Arc::new(CountingCache::default());
        let handle = spawn_sweep_task(Arc::downgrade(&cache), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
