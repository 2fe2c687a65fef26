//! Configuration Module
//!
//! Construction options for [`crate::AdaptiveCache`], with defaults and an
//! environment-variable overlay.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Cache configuration parameters.
///
/// Durations are expressed in milliseconds so the struct can be loaded from
/// plain JSON or environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction
    pub max_size: usize,
    /// Default time-to-live per entry, in milliseconds
    pub ttl_ms: u64,
    /// TTL sweep frequency, in milliseconds
    pub check_interval_ms: u64,
    /// Process memory threshold for emergency eviction, in megabytes
    pub max_memory_mb: u64,
    /// Memory sampling frequency, in milliseconds
    pub memory_check_interval_ms: u64,
    /// Enables `watch_file` and change invalidation
    pub enable_file_watch: bool,
    /// Enables the compression codec
    pub enable_compression: bool,
    /// Enables the disk-backed secondary store
    pub persist_to_disk: bool,
    /// Root directory for on-disk entries
    pub disk_cache_path: Option<PathBuf>,
    /// Serialized size above which compression is attempted, in bytes
    pub compression_threshold: usize,
    /// Minimum fraction a compressed form must save to be kept
    pub min_compression_savings: f64,
    /// Serialized size above which compression runs on a blocking worker
    pub background_compression_bytes: usize,
}

impl CacheConfig {
    /// Creates a new CacheConfig by overlaying environment variables on the
    /// defaults.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Maximum entries (default: 1000)
    /// - `CACHE_TTL_MS` - Default TTL in ms (default: 300000)
    /// - `CACHE_CHECK_INTERVAL_MS` - Sweep frequency in ms (default: 60000)
    /// - `CACHE_MAX_MEMORY_MB` - Memory threshold in MB (default: 512)
    /// - `CACHE_MEMORY_CHECK_INTERVAL_MS` - Sampling frequency in ms (default: 30000)
    /// - `CACHE_ENABLE_FILE_WATCH` - `true`/`false` (default: true)
    /// - `CACHE_ENABLE_COMPRESSION` - `true`/`false` (default: true)
    /// - `CACHE_PERSIST_TO_DISK` - `true`/`false` (default: false)
    /// - `CACHE_DISK_PATH` - Disk cache directory (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: env_parse("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            ttl_ms: env_parse("CACHE_TTL_MS").unwrap_or(defaults.ttl_ms),
            check_interval_ms: env_parse("CACHE_CHECK_INTERVAL_MS")
                .unwrap_or(defaults.check_interval_ms),
            max_memory_mb: env_parse("CACHE_MAX_MEMORY_MB").unwrap_or(defaults.max_memory_mb),
            memory_check_interval_ms: env_parse("CACHE_MEMORY_CHECK_INTERVAL_MS")
                .unwrap_or(defaults.memory_check_interval_ms),
            enable_file_watch: env_parse("CACHE_ENABLE_FILE_WATCH")
                .unwrap_or(defaults.enable_file_watch),
            enable_compression: env_parse("CACHE_ENABLE_COMPRESSION")
                .unwrap_or(defaults.enable_compression),
            persist_to_disk: env_parse("CACHE_PERSIST_TO_DISK")
                .unwrap_or(defaults.persist_to_disk),
            disk_cache_path: env::var("CACHE_DISK_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            ..defaults
        }
    }

    // == Validate ==
    /// Rejects settings the cache cannot run with.
    ///
    /// This is the only place a configuration problem is reported as an error;
    /// everything after construction degrades instead of failing.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size must be greater than zero".to_string(),
            ));
        }
        if self.ttl_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "ttl_ms must be greater than zero".to_string(),
            ));
        }
        if self.check_interval_ms == 0 || self.memory_check_interval_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "check intervals must be greater than zero".to_string(),
            ));
        }
        if self.max_memory_mb == 0 {
            return Err(CacheError::InvalidConfig(
                "max_memory_mb must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.min_compression_savings) {
            return Err(CacheError::InvalidConfig(format!(
                "min_compression_savings must be in [0, 1), got {}",
                self.min_compression_savings
            )));
        }
        if self.persist_to_disk {
            let path = self.resolved_disk_path();
            if path.exists() && !path.is_dir() {
                return Err(CacheError::InvalidConfig(format!(
                    "disk_cache_path {} is not a directory",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Directory used for on-disk entries, falling back to the system temp dir.
    pub fn resolved_disk_path(&self) -> PathBuf {
        self.disk_cache_path
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("adaptive-cache"))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms)
    }

    /// Memory threshold in bytes.
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_ms: 300_000,
            check_interval_ms: 60_000,
            max_memory_mb: 512,
            memory_check_interval_ms: 30_000,
            enable_file_watch: true,
            enable_compression: true,
            persist_to_disk: false,
            disk_cache_path: None,
            compression_threshold: 1024,
            min_compression_savings: 0.2,
            background_compression_bytes: 256 * 1024,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.ttl_ms, 300_000);
        assert_eq!(config.check_interval_ms, 60_000);
        assert_eq!(config.max_memory_mb, 512);
        assert!(config.enable_file_watch);
        assert!(config.enable_compression);
        assert!(!config.persist_to_disk);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        env::remove_var("CACHE_MAX_SIZE");
        env::remove_var("CACHE_TTL_MS");
        env::remove_var("CACHE_PERSIST_TO_DISK");
        env::remove_var("CACHE_DISK_PATH");

        let config = CacheConfig::from_env();
        assert_eq!(config.max_size, 1000);
        assert_eq!(config.ttl_ms, 300_000);
        assert!(!config.persist_to_disk);
        assert!(config.disk_cache_path.is_none());
    }

    #[test]
    fn test_config_rejects_zero_max_size() {
        let config = CacheConfig {
            max_size: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_zero_ttl() {
        let config = CacheConfig {
            ttl_ms: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_file_as_disk_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = CacheConfig {
            persist_to_disk: true,
            disk_cache_path: Some(file.path().to_path_buf()),
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"max_size": 2, "ttl_ms": 50}"#).unwrap();
        assert_eq!(config.max_size, 2);
        assert_eq!(config.ttl(), Duration::from_millis(50));
        assert_eq!(config.check_interval_ms, 60_000);
    }
}
