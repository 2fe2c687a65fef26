//! Memory Monitor
//!
//! Samples process memory and decides when the cache must shed entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Emergency cleanup keeps this many tenths of the entries.
const EMERGENCY_RETAIN_TENTHS: usize = 7;

/// Entry count to shrink to under memory pressure (70%, rounded down).
pub fn emergency_target(len: usize) -> usize {
    len * EMERGENCY_RETAIN_TENTHS / 10
}

// == Memory Probe ==
/// Source of the process memory figure.
pub trait MemoryProbe: Send + Sync {
    /// Current memory use in bytes, or None if it cannot be read.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads this process's resident set size through `sysinfo`.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|process| process.memory())
    }
}

/// Reports whatever value it was last given.
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    bytes: AtomicU64,
}

impl FixedMemoryProbe {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }
}

// == Memory Monitor ==
pub struct MemoryMonitor {
    probe: Arc<dyn MemoryProbe>,
    limit_bytes: u64,
}

impl MemoryMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>, limit_bytes: u64) -> Self {
        Self { probe, limit_bytes }
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Takes one sample; returns the reading if it exceeds the limit.
    pub fn over_limit(&self) -> Option<u64> {
        self.probe
            .resident_bytes()
            .filter(|used| *used > self.limit_bytes)
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("limit_bytes", &self.limit_bytes)
            .finish()
    }
}
