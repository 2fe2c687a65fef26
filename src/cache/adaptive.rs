//! Adaptive Cache
//!
//! The public cache handle. Wraps the synchronous [`CacheStore`] in a mutex
//! and layers the compression codec, the persistence layer, file watching and
//! the memory monitor around it. Anything slow (serialization of the value,
//! disk I/O, compressing very large payloads) happens outside the store lock,
//! and notifications are dispatched only after the lock is released.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStats, CacheStore, EntryInfo, Lookup, StoredValue};
use crate::compression::{self, CompressionCodec, Compressor};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, CacheObserver, EventBus, EvictionReason};
use crate::memory::{emergency_target, MemoryMonitor, MemoryProbe, ProcessMemoryProbe};
use crate::persistence::{DiskBackend, DiskRecord, PersistenceBackend, PersistenceLayer, RecordHeader};
use crate::tasks::{self, Maintenance};
use crate::watch::{FileWatchRegistry, NotifyBackend, WatchBackend};

/// Values the cache can hold: serializable for sizing, hashing, compression
/// and disk, cloneable for returning hits.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

// == Builder ==
/// Configures ports before starting a cache.
///
/// Unset ports fall back to the real implementations: [`DiskBackend`] under
/// the configured path, [`NotifyBackend`] and [`ProcessMemoryProbe`].
pub struct AdaptiveCacheBuilder<T> {
    config: CacheConfig,
    persistence: Option<Arc<dyn PersistenceBackend>>,
    watch: Option<Arc<dyn WatchBackend>>,
    probe: Option<Arc<dyn MemoryProbe>>,
    compressor: Option<Arc<dyn Compressor>>,
    _value: PhantomData<fn() -> T>,
}

impl<T: CacheValue> AdaptiveCacheBuilder<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            persistence: None,
            watch: None,
            probe: None,
            compressor: None,
            _value: PhantomData,
        }
    }

    /// Storage used when `persist_to_disk` is on.
    pub fn persistence_backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.persistence = Some(backend);
        self
    }

    /// Change source used when `enable_file_watch` is on.
    pub fn watch_backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.watch = Some(backend);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Algorithm used when `enable_compression` is on. Defaults to gzip.
    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    // == Build ==
    /// Validates the configuration and starts the background tasks.
    ///
    /// Must be called from within a Tokio runtime. Configuration problems are
    /// the only errors this cache ever returns from construction.
    pub fn build(self) -> Result<AdaptiveCache<T>> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CacheError::InvalidConfig(
                "AdaptiveCache must be built inside a Tokio runtime".to_string(),
            ));
        }

        let config = self.config;
        let events = Arc::new(EventBus::new());

        let compressor = self.compressor;
        let codec = config.enable_compression.then(|| {
            let codec = CompressionCodec::new(config.compression_threshold, config.min_compression_savings);
            Arc::new(match compressor {
                Some(compressor) => codec.with_compressor(compressor),
                None => codec,
            })
        });

        let (persistence, writer) = if config.persist_to_disk {
            let backend: Arc<dyn PersistenceBackend> = match self.persistence {
                Some(backend) => backend,
                None => Arc::new(DiskBackend::new(config.resolved_disk_path())?),
            };
            let (layer, handle) = PersistenceLayer::start(backend, events.clone());
            (Some(layer), Some(handle))
        } else {
            (None, None)
        };

        let (watcher, changes) = if config.enable_file_watch {
            let backend = self
                .watch
                .unwrap_or_else(|| Arc::new(NotifyBackend::new()));
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(FileWatchRegistry::new(backend, tx)), Some(rx))
        } else {
            (None, None)
        };

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcessMemoryProbe::new()));

        let shared = Arc::new(Shared {
            store: Mutex::new(CacheStore::new(config.max_size)),
            monitor: MemoryMonitor::new(probe, config.max_memory_bytes()),
            config,
            events,
            codec,
            persistence,
            watcher,
            tasks: Mutex::new(Vec::new()),
            writer: Mutex::new(writer),
            invalidations: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&shared);
        let mut handles = vec![
            tasks::spawn_sweep_task(weak.clone(), shared.config.check_interval()),
            tasks::spawn_memory_monitor(weak.clone(), shared.config.memory_check_interval()),
        ];
        if let Some(rx) = changes {
            handles.push(tasks::spawn_watch_dispatcher(weak, rx));
        }
        shared.tasks.lock().extend(handles);

        info!(
            max_size = shared.config.max_size,
            ttl_ms = shared.config.ttl_ms,
            compression = shared.codec.is_some(),
            persistence = shared.persistence.is_some(),
            file_watch = shared.watcher.is_some(),
            "Adaptive cache started"
        );
        Ok(AdaptiveCache { shared })
    }
}

// == Adaptive Cache ==
/// Cloneable handle to a cache instance. Clones share the same store.
pub struct AdaptiveCache<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AdaptiveCache<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Non-owning handle, for observers registered on the cache itself.
pub struct WeakAdaptiveCache<T> {
    shared: Weak<Shared<T>>,
}

impl<T> WeakAdaptiveCache<T> {
    pub fn upgrade(&self) -> Option<AdaptiveCache<T>> {
        self.shared.upgrade().map(|shared| AdaptiveCache { shared })
    }
}

impl<T: CacheValue> AdaptiveCache<T> {
    /// Starts a cache with the default ports.
    pub fn new(config: CacheConfig) -> Result<Self> {
        AdaptiveCacheBuilder::new(config).build()
    }

    pub fn builder(config: CacheConfig) -> AdaptiveCacheBuilder<T> {
        AdaptiveCacheBuilder::new(config)
    }

    pub fn downgrade(&self) -> WeakAdaptiveCache<T> {
        WeakAdaptiveCache {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    // == Get ==
    /// Returns a fresh value from memory, falling back to the disk store.
    ///
    /// A disk hit is promoted back into memory for whatever remains of the
    /// TTL it was stored with. Never fails: every degraded path reports a miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        if let Some(value) = self.get_cached(key) {
            return Some(value);
        }
        let persistence = self.shared.persistence.clone()?;

        let epoch = self.shared.invalidations.load(Ordering::SeqCst);
        let record = persistence.load(key).await?;
        let value = self.shared.decode_record(key, &record)?;

        self.shared.store.lock().counters_mut().record_disk_hit();
        self.shared.promote(key, value.clone(), &record, epoch);
        Some(value)
    }

    /// Memory-only variant of [`get`](Self::get).
    pub fn get_cached(&self, key: &str) -> Option<T> {
        let lookup = self.shared.store.lock().lookup(key);
        match lookup {
            Lookup::Hit(StoredValue::Raw(value)) => Some(value),
            Lookup::Hit(StoredValue::Compressed(bytes)) => self.shared.decode_compressed(key, &bytes),
            Lookup::Expired => {
                self.shared.events.emit(CacheEvent::Eviction {
                    key: key.to_string(),
                    reason: EvictionReason::Expired,
                });
                None
            }
            Lookup::Miss => None,
        }
    }

    // == Set ==
    /// Stores a value, replacing any previous one for the key.
    ///
    /// Uses the configured TTL when `ttl` is None. The in-memory store is
    /// updated before this returns; the disk write is queued.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        self.shared.set(key.into(), value, ttl, true);
    }

    /// True if the key is in memory and not expired.
    pub fn has(&self, key: &str) -> bool {
        self.shared.store.lock().contains(key)
    }

    // == Delete ==
    /// Removes a key from memory and queues removal of its disk copy.
    ///
    /// Returns whether an in-memory entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.shared.delete(key)
    }

    /// Removes every entry from memory and disk. File bindings are kept.
    pub fn clear(&self) {
        let count = {
            let mut store = self.shared.store.lock();
            self.shared.invalidations.fetch_add(1, Ordering::SeqCst);
            store.clear()
        };
        if let Some(persistence) = &self.shared.persistence {
            persistence.enqueue_clear();
        }
        debug!(count, "Cache cleared");
    }

    // == Watch File ==
    /// Deletes `key` (default `file:{path}`) whenever `path` changes.
    ///
    /// Failure is also reported as a `WatchError` event.
    pub fn watch_file(&self, path: impl AsRef<Path>, key: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| FileWatchRegistry::default_key(path));

        let result = match &self.shared.watcher {
            Some(registry) => registry.watch(path, &key),
            None => Err(CacheError::watch(path, "file watching is disabled")),
        };
        if let Err(e) = &result {
            warn!(path = %path.display(), key = %key, error = %e, "Cannot watch file");
            self.shared.events.emit(CacheEvent::WatchError {
                path: path.to_path_buf(),
                key,
                message: e.to_string(),
            });
        }
        result
    }

    /// Releases a key's file binding. Returns false if it had none.
    pub fn unwatch_file(&self, key: &str) -> bool {
        self.shared
            .watcher
            .as_ref()
            .is_some_and(|registry| registry.unwatch(key))
    }

    pub fn is_watched(&self, key: &str) -> bool {
        self.shared
            .watcher
            .as_ref()
            .is_some_and(|registry| registry.is_watched(key))
    }

    /// Runs one memory sample now; returns whether emergency cleanup ran.
    pub fn check_memory_pressure(&self) -> bool {
        self.shared.check_memory_pressure()
    }

    /// Removes expired entries now; returns how many.
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep_expired()
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        let mut stats = {
            let store = self.shared.store.lock();
            let counters = store.counters();
            CacheStats {
                size: store.len(),
                hits: counters.hits,
                misses: counters.misses,
                disk_hits: counters.disk_hits,
                hit_rate: counters.hit_rate(),
                memory_usage: store.memory_usage(),
                evictions: counters.evictions,
                expirations: counters.expirations,
                ..CacheStats::default()
            }
        };
        if let Some(codec) = &self.shared.codec {
            stats.compression_ratio = codec.compression_ratio();
            stats.bytes_saved = codec.bytes_saved();
        }
        if let Some(persistence) = &self.shared.persistence {
            stats.disk_cache_size = persistence.entry_count().await;
        }
        stats
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.shared.store.lock().info(key)
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        self.shared.store.lock().keys()
    }

    pub fn len(&self) -> usize {
        self.shared.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.store.lock().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.shared.events.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        self.shared.events.add_observer(observer);
    }

    // == Destroy ==
    /// Stops background work, closes file watchers and empties the store.
    ///
    /// Queued disk writes still run. Idempotent.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.stop_background();
        {
            let mut store = self.shared.store.lock();
            self.shared.invalidations.fetch_add(1, Ordering::SeqCst);
            store.clear();
        }
        info!("Adaptive cache destroyed");
    }

    /// Waits for queued disk work to finish. Only meaningful after `destroy`.
    pub async fn flush(&self) {
        let writer = self.shared.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Disk writer ended abnormally");
            }
        }
    }
}

impl<T> std::fmt::Debug for AdaptiveCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveCache")
            .field("config", &self.shared.config)
            .field("destroyed", &self.shared.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

// == Shared State ==
struct Shared<T> {
    config: CacheConfig,
    store: Mutex<CacheStore<T>>,
    events: Arc<EventBus>,
    codec: Option<Arc<CompressionCodec>>,
    persistence: Option<Arc<PersistenceLayer>>,
    watcher: Option<FileWatchRegistry>,
    monitor: MemoryMonitor,
    /// Sweep, monitor and dispatcher; aborted on destroy
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Disk writer; left to drain on destroy
    writer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped under the store lock by every delete and clear, so a disk read
    /// can tell it raced with one
    invalidations: AtomicU64,
    destroyed: AtomicBool,
}

impl<T> Shared<T> {
    fn stop_background(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        if let Some(registry) = &self.watcher {
            registry.close_all();
        }
        if let Some(persistence) = &self.persistence {
            persistence.close();
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.stop_background();
    }
}

/// The serialized form of a value as it will be stored.
struct Encoded<T> {
    stored: StoredValue<T>,
    /// Bytes for the disk record, identical to the stored bytes
    payload: Vec<u8>,
    content_hash: String,
    /// Compression still to run on a blocking worker
    deferred: Option<Vec<u8>>,
}

/// An entry built outside the lock, plus what is needed after inserting it.
struct Prepared<T> {
    entry: CacheEntry<T>,
    header: RecordHeader,
    payload: Vec<u8>,
    deferred: Option<Vec<u8>>,
}

impl<T: CacheValue> Shared<T> {
    fn set(self: &Arc<Self>, key: String, value: T, ttl: Option<Duration>, persist: bool) {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl());
        let Some(prepared) = self.prepare(&key, value, ttl) else {
            return;
        };
        let Prepared {
            entry,
            header,
            payload,
            deferred,
        } = prepared;

        let evicted = self.store.lock().insert(key.clone(), entry);
        self.finish_insert(key, evicted, header, payload, deferred, persist);
    }

    fn prepare(&self, key: &str, value: T, ttl: Duration) -> Option<Prepared<T>> {
        let encoded = self.encode(key, value)?;
        let size_bytes = encoded.payload.len() as u64;
        let compressed = encoded.stored.is_compressed();
        let entry = CacheEntry::new(encoded.stored, size_bytes, encoded.content_hash.clone(), ttl);
        let header = RecordHeader {
            compressed,
            content_hash: encoded.content_hash,
            expires_at: entry.expires_at(),
        };
        Some(Prepared {
            entry,
            header,
            payload: encoded.payload,
            deferred: encoded.deferred,
        })
    }

    /// Emits eviction and set events, then hands the payload to background
    /// compression or the disk writer.
    fn finish_insert(
        self: &Arc<Self>,
        key: String,
        evicted: Vec<String>,
        header: RecordHeader,
        payload: Vec<u8>,
        deferred: Option<Vec<u8>>,
        persist: bool,
    ) {
        for evicted_key in evicted {
            debug!(key = %evicted_key, "Evicted least recently used entry");
            self.events.emit(CacheEvent::Eviction {
                key: evicted_key,
                reason: EvictionReason::Capacity,
            });
        }
        self.events.emit(CacheEvent::Set {
            key: key.clone(),
            size_bytes: payload.len() as u64,
            compressed: header.compressed,
        });

        if let Some(raw) = deferred {
            self.compress_in_background(key, raw, header, persist);
        } else if persist {
            if let Some(persistence) = &self.persistence {
                persistence.enqueue_write(&key, DiskRecord { header, payload });
            }
        }
    }

    /// Serializes, hashes and (for ordinary sizes) compresses a value.
    ///
    /// Returns None only if the value cannot be serialized; the value is then
    /// not cached at all.
    fn encode(&self, key: &str, value: T) -> Option<Encoded<T>> {
        let raw = match serde_json::to_vec(&value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Value is not serializable, not caching");
                return None;
            }
        };
        let content_hash = hex::encode(Sha256::digest(&raw));

        let Some(codec) = &self.codec else {
            return Some(Encoded {
                stored: StoredValue::Raw(value),
                payload: raw,
                content_hash,
                deferred: None,
            });
        };

        if codec.should_attempt(raw.len()) && raw.len() > self.config.background_compression_bytes {
            return Some(Encoded {
                stored: StoredValue::Raw(value),
                payload: raw.clone(),
                content_hash,
                deferred: Some(raw),
            });
        }

        let stored = match codec.encode(&raw) {
            Ok(Some(bytes)) => {
                return Some(Encoded {
                    stored: StoredValue::Compressed(Arc::from(bytes.as_slice())),
                    payload: bytes,
                    content_hash,
                    deferred: None,
                });
            }
            Ok(None) => StoredValue::Raw(value),
            Err(e) => {
                self.report_compression_error(key, &e);
                StoredValue::Raw(value)
            }
        };
        Some(Encoded {
            stored,
            payload: raw,
            content_hash,
            deferred: None,
        })
    }

    fn compress_in_background(self: &Arc<Self>, key: String, raw: Vec<u8>, header: RecordHeader, persist: bool) {
        let Some(codec) = self.codec.clone() else {
            return;
        };
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                let result = codec.encode(&raw);
                (raw, result)
            })
            .await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let (raw, result) = match outcome {
                Ok(pair) => pair,
                Err(e) => {
                    shared.report_compression_error(&key, &CacheError::Compression(e.to_string()));
                    return;
                }
            };

            let (payload, compressed) = match result {
                Ok(Some(bytes)) => {
                    let swapped = shared.store.lock().replace_compressed(
                        &key,
                        &header.content_hash,
                        Arc::from(bytes.as_slice()),
                    );
                    if !swapped {
                        // Overwritten or removed while compressing
                        return;
                    }
                    debug!(key = %key, raw = raw.len(), compressed = bytes.len(), "Compressed large entry");
                    (bytes, true)
                }
                Ok(None) => (raw, false),
                Err(e) => {
                    shared.report_compression_error(&key, &e);
                    (raw, false)
                }
            };

            if persist {
                let still_current = shared
                    .store
                    .lock()
                    .entry(&key)
                    .is_some_and(|entry| entry.content_hash == header.content_hash);
                if let (true, Some(persistence)) = (still_current, &shared.persistence) {
                    persistence.enqueue_write(
                        &key,
                        DiskRecord {
                            header: RecordHeader { compressed, ..header },
                            payload,
                        },
                    );
                }
            }
        });
    }

    fn delete(&self, key: &str) -> bool {
        let removed = {
            let mut store = self.store.lock();
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            store.remove(key)
        };
        if let Some(persistence) = &self.persistence {
            persistence.enqueue_remove(key);
        }
        removed
    }

    /// Inserts a value read from disk without writing it back, keeping the
    /// expiry it was stored with.
    ///
    /// Skipped when the record has already run out, when a delete or clear
    /// happened since `epoch` was read, or when a newer value is in memory.
    fn promote(self: &Arc<Self>, key: &str, value: T, record: &DiskRecord, epoch: u64) {
        let remaining = (record.header.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return;
        }
        let Some(prepared) = self.prepare(key, value, remaining) else {
            return;
        };
        let Prepared {
            entry,
            header,
            payload,
            deferred,
        } = prepared;

        let evicted = {
            let mut store = self.store.lock();
            if self.invalidations.load(Ordering::SeqCst) != epoch {
                return;
            }
            match store.insert_if_absent(key.to_string(), entry) {
                Some(evicted) => evicted,
                None => return,
            }
        };
        debug!(key, ttl_ms = remaining.as_millis() as u64, "Promoted disk entry");
        self.finish_insert(key.to_string(), evicted, header, payload, deferred, false);
    }

    fn decode_record(&self, key: &str, record: &DiskRecord) -> Option<T> {
        let raw = if record.header.compressed {
            match self.inflate(&record.payload) {
                Ok(raw) => raw,
                Err(e) => {
                    self.report_compression_error(key, &e);
                    return None;
                }
            }
        } else {
            record.payload.clone()
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = CacheError::from(e);
                warn!(key, error = %err, "Unreadable disk entry");
                self.events.emit(CacheEvent::DiskError {
                    key: Some(key.to_string()),
                    message: err.to_string(),
                });
                None
            }
        }
    }

    /// Inflates a compressed hit. A payload that cannot be decoded is dropped
    /// from the store and reported as a miss.
    fn decode_compressed(&self, key: &str, bytes: &[u8]) -> Option<T> {
        let decoded = self
            .inflate(bytes)
            .and_then(|raw| serde_json::from_slice(&raw).map_err(CacheError::from));
        match decoded {
            Ok(value) => Some(value),
            Err(e) => {
                self.store.lock().remove(key);
                self.report_compression_error(key, &e);
                None
            }
        }
    }

    fn inflate(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match &self.codec {
            Some(codec) => codec.decode(bytes),
            None => compression::decompress(bytes),
        }
    }

    fn report_compression_error(&self, key: &str, error: &CacheError) {
        warn!(key, error = %error, "Compression failed, keeping raw value");
        self.events.emit(CacheEvent::CompressionError {
            key: key.to_string(),
            message: error.to_string(),
        });
    }
}

impl<T: CacheValue> Maintenance for Shared<T> {
    fn sweep_expired(&self) -> usize {
        let expired = self.store.lock().cleanup_expired();
        let count = expired.len();
        self.events.emit_all(expired.into_iter().map(|key| CacheEvent::Eviction {
            key,
            reason: EvictionReason::Expired,
        }));
        count
    }

    fn check_memory_pressure(&self) -> bool {
        let Some(used_bytes) = self.monitor.over_limit() else {
            return false;
        };

        let (entries_before, evicted) = {
            let mut store = self.store.lock();
            let before = store.len();
            (before, store.evict_down_to(emergency_target(before)))
        };
        let entries_after = entries_before - evicted.len();
        info!(
            used_bytes,
            limit_bytes = self.monitor.limit_bytes(),
            entries_before,
            entries_after,
            "Memory pressure, emergency cleanup"
        );

        self.events.emit(CacheEvent::MemoryPressure {
            used_bytes,
            limit_bytes: self.monitor.limit_bytes(),
            entries_before,
            entries_after,
        });
        self.events.emit_all(evicted.into_iter().map(|key| CacheEvent::Eviction {
            key,
            reason: EvictionReason::MemoryPressure,
        }));
        true
    }

    fn handle_file_change(&self, path: &Path) {
        let Some(registry) = &self.watcher else {
            return;
        };
        for key in registry.keys_for(path) {
            self.delete(&key);
            info!(path = %path.display(), key = %key, "File changed, invalidated");
            self.events.emit(CacheEvent::FileChanged {
                path: path.to_path_buf(),
                key,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedMemoryProbe;
    use crate::watch::ManualWatchBackend;

    fn config() -> CacheConfig {
        CacheConfig {
            max_size: 100,
            enable_file_watch: false,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = AdaptiveCache::<String>::new(CacheConfig {
            max_size: 0,
            ..config()
        });
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_build_outside_runtime_is_config_error() {
        let result = AdaptiveCache::<String>::new(config());
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = AdaptiveCache::new(config()).unwrap();
        cache.set("k", vec![1u32, 2, 3], None);

        assert_eq!(cache.get("k").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.entry_info("k").unwrap().hit_count, 1);
    }

    #[tokio::test]
    async fn test_content_hash_is_stable() {
        let cache = AdaptiveCache::new(config()).unwrap();
        cache.set("a", "same".to_string(), None);
        cache.set("b", "same".to_string(), None);

        let a = cache.entry_info("a").unwrap().content_hash;
        let b = cache.entry_info("b").unwrap().content_hash;
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_undecodable_compressed_entry_is_a_miss() {
        let cache: AdaptiveCache<String> = AdaptiveCache::new(config()).unwrap();
        let mut rx = cache.subscribe();
        cache.shared.store.lock().insert(
            "bad".to_string(),
            CacheEntry::new(
                StoredValue::Compressed(Arc::from(&b"not gzip"[..])),
                8,
                "h".to_string(),
                Duration::from_secs(60),
            ),
        );

        assert_eq!(cache.get_cached("bad"), None);
        assert!(!cache.has("bad"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::CompressionError { key, .. } if key == "bad"
        ));
    }

    #[tokio::test]
    async fn test_large_payload_compresses_in_background() {
        let cache = AdaptiveCache::new(CacheConfig {
            background_compression_bytes: 4096,
            ..config()
        })
        .unwrap();
        let big = "abcdefgh".repeat(2048);

        cache.set("big", big.clone(), None);
        // Committed raw first
        assert_eq!(cache.get_cached("big"), Some(big.clone()));

        for _ in 0..100 {
            if cache.entry_info("big").is_some_and(|i| i.compressed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let info = cache.entry_info("big").unwrap();
        assert!(info.compressed);
        assert!(info.size_bytes < big.len() as u64);
        assert_eq!(cache.get_cached("big"), Some(big));
    }

    fn disk_record(value: &str, expires_in: chrono::Duration) -> DiskRecord {
        DiskRecord {
            header: RecordHeader {
                compressed: false,
                content_hash: "x".to_string(),
                expires_at: Utc::now() + expires_in,
            },
            payload: serde_json::to_vec(value).unwrap(),
        }
    }

    fn epoch<T>(cache: &AdaptiveCache<T>) -> u64 {
        cache.shared.invalidations.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_promotion_skipped_when_key_set_concurrently() {
        let cache = AdaptiveCache::new(config()).unwrap();
        let read_at = epoch(&cache);

        cache.set("k", "memory".to_string(), None);
        let record = disk_record("disk", chrono::Duration::minutes(1));
        cache.shared.promote("k", "disk".to_string(), &record, read_at);

        assert_eq!(cache.get_cached("k"), Some("memory".to_string()));
    }

    #[tokio::test]
    async fn test_promotion_skipped_after_delete() {
        let cache = AdaptiveCache::new(config()).unwrap();
        cache.set("k", "memory".to_string(), None);
        let read_at = epoch(&cache);

        cache.delete("k");
        let record = disk_record("disk", chrono::Duration::minutes(1));
        cache.shared.promote("k", "disk".to_string(), &record, read_at);

        assert!(!cache.has("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_keeps_remaining_ttl() {
        let cache: AdaptiveCache<String> = AdaptiveCache::new(config()).unwrap();
        let record = disk_record("disk", chrono::Duration::seconds(2));

        cache.shared.promote("k", "disk".to_string(), &record, epoch(&cache));

        let info = cache.entry_info("k").unwrap();
        assert!(info.ttl_remaining_ms > 0);
        assert!(info.ttl_remaining_ms <= 2000);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get_cached("k"), None);
    }

    #[tokio::test]
    async fn test_promotion_skipped_for_expired_record() {
        let cache: AdaptiveCache<String> = AdaptiveCache::new(config()).unwrap();
        let record = disk_record("disk", chrono::Duration::seconds(-1));

        cache.shared.promote("k", "disk".to_string(), &record, epoch(&cache));

        assert!(!cache.has("k"));
    }

    struct FailingCompressor;

    impl Compressor for FailingCompressor {
        fn compress(&self, _data: &[u8]) -> Result<Vec<u8>> {
            Err(CacheError::Compression("encoder unavailable".to_string()))
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
            compression::decompress(data)
        }
    }

    async fn next_compression_error(rx: &mut broadcast::Receiver<CacheEvent>) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let CacheEvent::CompressionError { key, .. } = rx.recv().await.unwrap() {
                    return key;
                }
            }
        })
        .await
        .expect("no compression error reported")
    }

    #[tokio::test]
    async fn test_compression_failure_stores_raw_value() {
        let cache = AdaptiveCache::builder(config())
            .compressor(Arc::new(FailingCompressor))
            .build()
            .unwrap();
        let mut rx = cache.subscribe();
        let value = "a".repeat(2000);

        cache.set("k", value.clone(), None);

        assert_eq!(next_compression_error(&mut rx).await, "k");
        let info = cache.entry_info("k").unwrap();
        assert!(!info.compressed);
        assert_eq!(info.size_bytes, 2002);
        assert_eq!(cache.get_cached("k"), Some(value));
        assert_eq!(cache.stats().await.bytes_saved, 0);
    }

    #[tokio::test]
    async fn test_background_compression_failure_keeps_raw_value() {
        let cache = AdaptiveCache::builder(CacheConfig {
            background_compression_bytes: 4096,
            ..config()
        })
        .compressor(Arc::new(FailingCompressor))
        .build()
        .unwrap();
        let mut rx = cache.subscribe();
        let big = "abcdefgh".repeat(2048);

        cache.set("big", big.clone(), None);

        assert_eq!(next_compression_error(&mut rx).await, "big");
        assert!(!cache.entry_info("big").unwrap().compressed);
        assert_eq!(cache.get_cached("big"), Some(big));
    }

    #[tokio::test]
    async fn test_memory_pressure_under_limit_is_noop() {
        let probe = Arc::new(FixedMemoryProbe::new(1));
        let cache = AdaptiveCache::builder(config())
            .memory_probe(probe)
            .build()
            .unwrap();
        cache.set("a", 1u8, None);

        assert!(!cache.check_memory_pressure());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_disabled_reports_watch_error() {
        let cache: AdaptiveCache<u8> = AdaptiveCache::new(config()).unwrap();
        let mut rx = cache.subscribe();

        assert!(cache.watch_file("/tmp/f.ts", Some("k")).is_err());
        assert!(matches!(rx.recv().await.unwrap(), CacheEvent::WatchError { .. }));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_stops_watchers() {
        let backend = Arc::new(ManualWatchBackend::new());
        let cache = AdaptiveCache::builder(CacheConfig {
            enable_file_watch: true,
            ..config()
        })
        .watch_backend(backend.clone())
        .build()
        .unwrap();
        cache.set("k", 1u8, None);
        cache.watch_file("/tmp/f.ts", Some("k")).unwrap();

        cache.destroy();
        cache.destroy();

        assert!(cache.is_empty());
        assert!(!backend.is_watching(Path::new("/tmp/f.ts")));
        assert!(cache.shared.tasks.lock().is_empty());
    }
}
