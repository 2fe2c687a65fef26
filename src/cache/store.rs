//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking and TTL
//! expiration. The store is synchronous and does no I/O; callers wrap it in a
//! lock and run serialization, compression and persistence outside of it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;

use crate::cache::{CacheEntry, Counters, EntryInfo, LruTracker, StoredValue};

// == Lookup ==
/// Outcome of reading a key from the store.
#[derive(Debug, Clone)]
pub enum Lookup<T> {
    /// Present and fresh; recency and hit count were updated
    Hit(StoredValue<T>),
    /// Present but past its TTL; the entry has been removed
    Expired,
    /// Not present
    Miss,
}

// == Cache Store ==
/// Bounded storage with LRU eviction and TTL support.
#[derive(Debug)]
pub struct CacheStore<T> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<T>>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance counters
    counters: Counters,
    /// Maximum number of entries allowed
    max_size: usize,
    /// Sum of `size_bytes` across entries
    memory_usage: u64,
}

impl<T: Clone> CacheStore<T> {
    // == Constructor ==
    /// Creates a new CacheStore with specified capacity.
    ///
    /// # Arguments
    /// * `max_size` - Maximum number of entries the store can hold
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            counters: Counters::new(),
            max_size,
            memory_usage: 0,
        }
    }

    // == Insert ==
    /// Inserts or replaces an entry and marks it most recently used.
    ///
    /// If the store then holds more than `max_size` entries, least recently
    /// used entries are evicted until it does not.
    ///
    /// # Returns
    /// Keys evicted to make room, oldest first.
    pub fn insert(&mut self, key: String, entry: CacheEntry<T>) -> Vec<String> {
        self.memory_usage += entry.size_bytes;
        if let Some(old) = self.entries.insert(key.clone(), entry) {
            self.memory_usage -= old.size_bytes;
        }
        self.lru.touch(&key);

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_size {
            match self.lru.evict_oldest() {
                Some(oldest) => {
                    self.drop_entry(&oldest);
                    self.counters.record_eviction();
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    /// Inserts only if no fresh entry exists for `key`; an expired one is
    /// replaced.
    ///
    /// # Returns
    /// The evicted keys, or None if a fresh entry was kept.
    pub fn insert_if_absent(&mut self, key: String, entry: CacheEntry<T>) -> Option<Vec<String>> {
        if self.contains(&key) {
            return None;
        }
        Some(self.insert(key, entry))
    }

    // == Lookup ==
    /// Reads a key, applying lazy expiry.
    ///
    /// Hits refresh recency and bump the entry's hit count. Expired entries are
    /// removed and, like absent keys, counted as misses.
    pub fn lookup(&mut self, key: &str) -> Lookup<T> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            None => {
                self.counters.record_miss();
                return Lookup::Miss;
            }
            Some(entry) if !entry.is_expired_at(now) => {
                entry.hit_count += 1;
                let value = entry.value.clone();
                self.lru.touch(key);
                self.counters.record_hit();
                return Lookup::Hit(value);
            }
            Some(_) => {}
        }

        self.remove_entry(key);
        self.counters.record_expiration();
        self.counters.record_miss();
        Lookup::Expired
    }

    // == Contains ==
    /// Returns true if the key is present and fresh. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    // == Remove ==
    /// Removes an entry by key.
    ///
    /// # Returns
    /// Whether an entry was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the removed keys.
    pub fn cleanup_expired(&mut self) -> Vec<String> {
        let now = Instant::now();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove_entry(key);
            self.counters.record_expiration();
        }
        expired_keys
    }

    // == Evict Down To ==
    /// Evicts entries in access order, oldest first, until at most `target`
    /// remain.
    ///
    /// Returns the evicted keys.
    pub fn evict_down_to(&mut self, target: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > target {
            match self.lru.evict_oldest() {
                Some(oldest) => {
                    self.drop_entry(&oldest);
                    self.counters.record_eviction();
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    // == Replace Compressed ==
    /// Swaps a raw entry's value for its compressed form.
    ///
    /// Only applies if the entry still holds the value identified by
    /// `content_hash`; a concurrent overwrite wins. Recency is not touched.
    pub fn replace_compressed(&mut self, key: &str, content_hash: &str, bytes: Arc<[u8]>) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.content_hash != content_hash || entry.compressed() {
            return false;
        }
        let new_size = bytes.len() as u64;
        self.memory_usage = self.memory_usage - entry.size_bytes + new_size;
        entry.size_bytes = new_size;
        entry.value = StoredValue::Compressed(bytes);
        true
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.lru.clear();
        self.memory_usage = 0;
        count
    }

    pub fn info(&self, key: &str) -> Option<EntryInfo> {
        self.entries.get(key).map(CacheEntry::info)
    }

    /// Borrows a stored entry without touching recency.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        self.lru.iter_oldest_first().cloned().collect()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.drop_entry(key)
    }

    /// Removes from the map only; the caller already handled the tracker.
    fn drop_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.memory_usage -= entry.size_bytes;
                true
            }
            None => false,
        }
    }
}
