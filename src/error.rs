//! Error types for the cache
//!
//! Provides unified error handling using thiserror. Only `InvalidConfig` is
//! ever returned from construction; the other variants describe degraded
//! sub-components and are reported through [`crate::events::CacheEvent`]
//! instead of failing hot-path calls.

use std::path::PathBuf;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Construction-time misconfiguration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Disk read or write failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed on-disk record
    #[error("Corrupt disk record {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    /// Compression or decompression failure
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Value could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File watch could not be established
    #[error("Cannot watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },
}

impl CacheError {
    /// Builds an `Io` variant for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a `Watch` variant for the given path.
    pub fn watch(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CacheError::Watch {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_path() {
        let err = CacheError::io(
            "/var/cache/x.cache",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/var/cache/x.cache"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_watch_error_display() {
        let err = CacheError::watch("/tmp/missing.ts", "no such file");
        assert_eq!(err.to_string(), "Cannot watch /tmp/missing.ts: no such file");
    }
}
