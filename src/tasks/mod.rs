//! Background Tasks Module
//!
//! Periodic and event-driven work that runs alongside caller operations.
//!
//! # Tasks
//! - TTL Sweep: removes expired entries every `check_interval`
//! - Memory Monitor: samples process memory and triggers emergency cleanup
//! - Watch Dispatch: turns file-change notifications into invalidations
//!
//! Tasks hold a weak reference to the cache and stop once it is dropped.

mod memory_monitor;
mod sweep;
mod watch_dispatch;

use std::path::Path;

pub use memory_monitor::spawn_memory_monitor;
pub use sweep::spawn_sweep_task;
pub use watch_dispatch::spawn_watch_dispatcher;

/// The cache operations background tasks call back into.
pub trait Maintenance: Send + Sync + 'static {
    /// Removes every expired entry; returns how many were removed.
    fn sweep_expired(&self) -> usize;

    /// Samples memory and sheds entries if over the limit; returns whether
    /// cleanup ran.
    fn check_memory_pressure(&self) -> bool;

    /// Invalidates the keys bound to a changed path.
    fn handle_file_change(&self, path: &Path);
}
