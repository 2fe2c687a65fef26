//! Memory Monitor Task
//!
//! Samples process memory on its own interval, separate from the TTL sweep.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::Maintenance;

pub fn spawn_memory_monitor<M: Maintenance>(cache: Weak<M>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Starting memory monitor with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = cache.upgrade() else {
                debug!("Cache dropped, stopping memory monitor");
                return;
            };
            cache.check_memory_pressure();
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
    struct SampledCache {
        samples: AtomicUsize,
    }

    impl Maintenance for SampledCache {
        fn sweep_expired(&self) -> usize {
            0
        }

        fn check_memory_pressure(&self) -> bool {
            self.samples.fetch_add(1, Ordering::SeqCst);
            false
        }

        fn handle_file_change(&self, _path: &Path) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_samples_on_interval() {
        let cache = Arc::new(SampledCache::default());
        let handle = spawn_memory_monitor(Arc::downgrade(&cache), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(cache.samples.load(Ordering::SeqCst), 2);
        handle.abort();
    }
}
