//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use serde::Serialize;

// == Counters ==
/// Running counters kept by the store.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub disk_hits: u64,
    /// Capacity and memory-pressure evictions
    pub evictions: u64,
    /// TTL removals, lazy or swept
    pub expirations: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_disk_hit(&mut self) {
        self.disk_hits += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Cache Stats ==
/// Point-in-time report returned by `AdaptiveCache::stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Current number of entries in memory
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Memory misses answered by the disk store
    pub disk_hits: u64,
    pub hit_rate: f64,
    /// Bytes held by stored representations
    pub memory_usage: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Bytes saved / bytes offered to the compression codec
    pub compression_ratio: f64,
    pub bytes_saved: u64,
    /// Entries currently on disk, 0 when persistence is off
    pub disk_cache_size: u64,
}
