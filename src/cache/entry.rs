//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

// == Stored Value ==
/// The in-memory representation of a cached value.
#[derive(Debug, Clone)]
pub enum StoredValue<T> {
    /// The value itself, returned by clone on hit
    Raw(T),
    /// Gzip-compressed serialized value, decoded on hit
    Compressed(Arc<[u8]>),
}

impl<T> StoredValue<T> {
    pub fn is_compressed(&self) -> bool {
        matches!(self, StoredValue::Compressed(_))
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The stored value
    pub value: StoredValue<T>,
    /// Monotonic insertion instant, used for expiry
    pub inserted_at: Instant,
    /// Wall-clock insertion time, used for reporting and disk records
    pub created_at: DateTime<Utc>,
    /// Successful reads since insertion
    pub hit_count: u64,
    /// Size of the stored representation in bytes
    pub size_bytes: u64,
    /// Hex SHA-256 of the serialized raw value
    pub content_hash: String,
    /// Time-to-live measured from `inserted_at`
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    // == Constructor ==
    /// Creates a new cache entry stamped with the current time.
    pub fn new(value: StoredValue<T>, size_bytes: u64, content_hash: String, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            created_at: Utc::now(),
            hit_count: 0,
            size_bytes,
            content_hash,
            ttl,
        }
    }

    pub fn compressed(&self) -> bool {
        self.value.is_compressed()
    }

    // == Is Expired ==
    /// Checks if the entry has outlived its TTL.
    ///
    /// An entry is expired once its age is strictly greater than the TTL.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        self.ttl
            .saturating_sub(Instant::now().saturating_duration_since(self.inserted_at))
    }

    /// Wall-clock instant after which the entry is expired.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Metadata snapshot without the value.
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            hit_count: self.hit_count,
            size_bytes: self.size_bytes,
            compressed: self.compressed(),
            content_hash: self.content_hash.clone(),
            created_at: self.created_at,
            ttl_remaining_ms: self.ttl_remaining().as_millis() as u64,
        }
    }
}

// == Entry Info ==
/// Read-only view of an entry's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    pub hit_count: u64,
    pub size_bytes: u64,
    pub compressed: bool,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub ttl_remaining_ms: u64,
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn raw_entry(ttl: Duration) -> CacheEntry<String> {
        CacheEntry::new(
            StoredValue::Raw("test_value".to_string()),
            12,
            "abc".to_string(),
            ttl,
        )
    }

    #[test]
    fn test_entry_creation() {
        let entry = raw_entry(Duration::from_secs(60));

        assert!(matches!(&entry.value, StoredValue::Raw(v) if v == "test_value"));
        assert_eq!(entry.hit_count, 0);
        assert!(!entry.compressed());
        assert!(!entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expiration() {
        let entry = raw_entry(Duration::from_millis(50));

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_boundary_condition() {
        let entry = raw_entry(Duration::from_millis(50));

        // Age equal to the TTL is still fresh; expiry needs strictly greater
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_remaining() {
        let entry = raw_entry(Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(entry.ttl_remaining(), Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(entry.ttl_remaining(), Duration::ZERO);
    }

    #[test]
    fn test_expires_at_follows_created_at() {
        let entry = raw_entry(Duration::from_secs(90));
        let delta = entry.expires_at() - entry.created_at;
        assert_eq!(delta.num_seconds(), 90);
    }

    #[test]
    fn test_compressed_flag_follows_representation() {
        let entry: CacheEntry<String> = CacheEntry::new(
            StoredValue::Compressed(Arc::from(vec![1u8, 2, 3])),
            3,
            "h".to_string(),
            Duration::from_secs(1),
        );
        assert!(entry.compressed());
        assert!(entry.info().compressed);
    }
}
