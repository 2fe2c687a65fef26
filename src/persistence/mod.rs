//! Persistence Layer
//!
//! Best-effort secondary store for cache values. Writes and removals go
//! through a single background writer so they land in call order; reads run
//! on the caller's task. Failures become [`CacheEvent::DiskError`] events and
//! never reach the caller.

mod disk;
mod memory;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

/// Extension of on-disk entry files.
pub const RECORD_EXTENSION: &str = "cache";

/// Hex SHA-256 of a cache key, used as its on-disk name.
pub fn key_hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

// == Disk Record ==
/// Metadata line written ahead of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Payload is gzip-compressed
    pub compressed: bool,
    /// Hex SHA-256 of the serialized raw value
    pub content_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// A persisted value: the same bytes and `compressed` flag held in memory.
///
/// Encoded as one JSON header line followed by the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl DiskRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec(&self.header)?;
        out.push(b'\n');
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parses a record read from `path`; `path` only labels the error.
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let corrupt = |reason: String| CacheError::CorruptRecord {
            path: path.to_path_buf(),
            reason,
        };
        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| corrupt("missing header line".to_string()))?;
        let header: RecordHeader =
            serde_json::from_slice(&bytes[..split]).map_err(|e| corrupt(e.to_string()))?;
        Ok(Self {
            header,
            payload: bytes[split + 1..].to_vec(),
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.header.expires_at
    }
}

// == Backend Port ==
/// Storage behind the persistence layer, addressed by [`key_hash`].
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn read(&self, hash: &str) -> Result<Option<DiskRecord>>;
    async fn write(&self, hash: &str, record: &DiskRecord) -> Result<()>;
    /// Removing an absent record succeeds.
    async fn remove(&self, hash: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn entry_count(&self) -> Result<u64>;
}

#[derive(Debug)]
enum DiskOp {
    Write { key: String, record: DiskRecord },
    Remove { key: String },
    Clear,
}

// == Persistence Layer ==
pub struct PersistenceLayer {
    backend: Arc<dyn PersistenceBackend>,
    queue: Mutex<Option<mpsc::UnboundedSender<DiskOp>>>,
    /// Queued removals per key hash; reads skip these keys
    pending_removals: Arc<Mutex<HashMap<String, usize>>>,
    /// Queued clears; reads skip the disk entirely while non-zero
    pending_clears: Arc<AtomicUsize>,
    events: Arc<EventBus>,
}

impl PersistenceLayer {
    // == Start ==
    /// Creates the layer and spawns its writer task.
    ///
    /// The writer exits once [`close`](Self::close) has been called and the
    /// queue is drained.
    pub fn start(
        backend: Arc<dyn PersistenceBackend>,
        events: Arc<EventBus>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let layer = Arc::new(Self {
            backend,
            queue: Mutex::new(Some(tx)),
            pending_removals: Arc::new(Mutex::new(HashMap::new())),
            pending_clears: Arc::new(AtomicUsize::new(0)),
            events,
        });
        let handle = tokio::spawn(run_writer(layer.clone(), rx));
        (layer, handle)
    }

    /// Queues a write. Returns immediately.
    pub fn enqueue_write(&self, key: &str, record: DiskRecord) {
        self.enqueue(DiskOp::Write {
            key: key.to_string(),
            record,
        });
    }

    /// Queues removal of a key's record.
    pub fn enqueue_remove(&self, key: &str) {
        *self
            .pending_removals
            .lock()
            .entry(key_hash(key))
            .or_insert(0) += 1;
        if !self.enqueue(DiskOp::Remove {
            key: key.to_string(),
        }) {
            self.finish_removal(key);
        }
    }

    /// Queues removal of every record.
    pub fn enqueue_clear(&self) {
        self.pending_clears.fetch_add(1, Ordering::SeqCst);
        if !self.enqueue(DiskOp::Clear) {
            self.pending_clears.fetch_sub(1, Ordering::SeqCst);
        }
    }

    // == Load ==
    /// Reads a key's record, or None on absence, expiry, queued removal or
    /// failure.
    pub async fn load(&self, key: &str) -> Option<DiskRecord> {
        let hash = key_hash(key);
        if self.pending_clears.load(Ordering::SeqCst) > 0
            || self.pending_removals.lock().contains_key(&hash)
        {
            return None;
        }

        match self.backend.read(&hash).await {
            Ok(Some(record)) if record.is_expired() => {
                debug!(key, "Discarding expired disk record");
                self.enqueue_remove(key);
                None
            }
            Ok(record) => record,
            Err(e) => {
                self.report(Some(key), &e);
                None
            }
        }
    }

    /// Number of records on disk; 0 if the backend cannot tell.
    pub async fn entry_count(&self) -> u64 {
        match self.backend.entry_count().await {
            Ok(count) => count,
            Err(e) => {
                self.report(None, &e);
                0
            }
        }
    }

    /// Stops accepting work. Already queued operations still run.
    pub fn close(&self) {
        self.queue.lock().take();
    }

    fn enqueue(&self, op: DiskOp) -> bool {
        match self.queue.lock().as_ref() {
            Some(tx) => tx.send(op).is_ok(),
            None => false,
        }
    }

    fn finish_removal(&self, key: &str) {
        let hash = key_hash(key);
        let mut pending = self.pending_removals.lock();
        if let Some(count) = pending.get_mut(&hash) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&hash);
            }
        }
    }

    fn report(&self, key: Option<&str>, error: &CacheError) {
        warn!(key = key.unwrap_or("*"), error = %error, "Disk cache operation failed");
        self.events.emit(CacheEvent::DiskError {
            key: key.map(str::to_string),
            message: error.to_string(),
        });
    }
}

impl std::fmt::Debug for PersistenceLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceLayer")
            .field("open", &self.queue.lock().is_some())
            .field("pending_removals", &self.pending_removals.lock().len())
            .finish()
    }
}

async fn run_writer(layer: Arc<PersistenceLayer>, mut rx: mpsc::UnboundedReceiver<DiskOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            DiskOp::Write { key, record } => {
                if let Err(e) = layer.backend.write(&key_hash(&key), &record).await {
                    layer.report(Some(&key), &e);
                }
            }
            DiskOp::Remove { key } => {
                if let Err(e) = layer.backend.remove(&key_hash(&key)).await {
                    layer.report(Some(&key), &e);
                }
                layer.finish_removal(&key);
            }
            DiskOp::Clear => {
                if let Err(e) = layer.backend.clear().await {
                    layer.report(None, &e);
                }
                layer.pending_clears.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
    debug!("Disk writer stopped");
}
