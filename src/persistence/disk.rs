//! Filesystem backend: one `{hash}.cache` file per key under a root directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{DiskRecord, PersistenceBackend, RECORD_EXTENSION};
use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    /// Opens (creating if needed) the cache directory.
    ///
    /// Runs at construction time, so failure is a configuration error.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            CacheError::InvalidConfig(format!(
                "cannot create disk cache directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{}.{}", hash, RECORD_EXTENSION))
    }

    fn is_record(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
    }
}

#[async_trait]
impl PersistenceBackend for DiskBackend {
    async fn read(&self, hash: &str) -> Result<Option<DiskRecord>> {
        let path = self.path_for(hash);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        DiskRecord::decode(&bytes, &path).map(Some)
    }

    async fn write(&self, hash: &str, record: &DiskRecord) -> Result<()> {
        let path = self.path_for(hash);
        let tmp = path.with_extension("tmp");
        let bytes = record.encode()?;

        // The directory may have been removed underneath us
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| CacheError::io(&path, e))
    }

    async fn remove(&self, hash: &str) -> Result<()> {
        let path = self.path_for(hash);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            let path = entry.path();
            if Self::is_record(&path) {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(path, e)),
                }
            }
        }
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };
        let mut count = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            if Self::is_record(&entry.path()) {
                count += 1;
            }
        }
        Ok(count)
    }
}
