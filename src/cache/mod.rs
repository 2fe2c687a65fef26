//! Cache Module
//!
//! In-memory storage with TTL expiration and LRU eviction, and the
//! [`AdaptiveCache`] handle that layers compression, persistence, file
//! watching and memory-pressure handling on top of it.

mod adaptive;
mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use adaptive::{AdaptiveCache, AdaptiveCacheBuilder, CacheValue, WeakAdaptiveCache};
pub use entry::{CacheEntry, EntryInfo, StoredValue};
pub use lru::LruTracker;
pub use stats::{CacheStats, Counters};
pub use store::{CacheStore, Lookup};
