//! In-memory backend for tests and for callers that want overflow without disk.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DiskRecord, PersistenceBackend};
use crate::error::{CacheError, Result};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, DiskRecord>>,
    /// Makes every operation fail, to simulate an unavailable disk
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Direct access to a stored record, bypassing failure simulation.
    pub fn get(&self, hash: &str) -> Option<DiskRecord> {
        self.records.lock().get(hash).cloned()
    }

    pub fn insert(&self, hash: &str, record: DiskRecord) {
        self.records.lock().insert(hash.to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn check(&self, hash: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::io(
                format!("memory://{}", hash),
                std::io::Error::new(ErrorKind::Other, "simulated disk failure"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn read(&self, hash: &str) -> Result<Option<DiskRecord>> {
        self.check(hash)?;
        Ok(self.get(hash))
    }

    async fn write(&self, hash: &str, record: &DiskRecord) -> Result<()> {
        self.check(hash)?;
        self.insert(hash, record.clone());
        Ok(())
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        self.check(hash)?;
        self.records.lock().remove(hash);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check("*")?;
        self.records.lock().clear();
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        self.check("*")?;
        Ok(self.records.lock().len() as u64)
    }
}
