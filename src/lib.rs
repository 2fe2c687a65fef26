//! Adaptive Cache - A bounded in-process cache with adaptive eviction
//!
//! Provides TTL expiration and LRU eviction, emergency eviction under memory
//! pressure, transparent compression, an optional disk-backed second tier,
//! file-change invalidation and dependency-graph cascade invalidation for
//! source-derived data.

pub mod cache;
pub mod compression;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod persistence;
pub mod symbols;
pub mod tasks;
pub mod watch;

pub use cache::{AdaptiveCache, AdaptiveCacheBuilder, CacheStats, CacheValue, EntryInfo};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use events::{CacheEvent, CacheObserver, EvictionReason};
pub use symbols::{DependencyGraph, SymbolCache};
