//! Cache Notifications
//!
//! Everything observable about the cache that is not a return value: evictions,
//! writes, memory pressure, file invalidation and degraded-mode failures.
//! Events reach synchronous [`CacheObserver`]s first and then a broadcast
//! channel for async subscribers.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel; slow subscribers observe `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// == Eviction Reason ==
/// Why an entry left the cache without being deleted by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Store exceeded `max_size`
    Capacity,
    /// TTL elapsed
    Expired,
    /// Emergency cleanup under memory pressure
    MemoryPressure,
}

// == Cache Event ==
/// A notification emitted by the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEvent {
    Set {
        key: String,
        size_bytes: u64,
        compressed: bool,
    },
    Eviction {
        key: String,
        reason: EvictionReason,
    },
    MemoryPressure {
        used_bytes: u64,
        limit_bytes: u64,
        entries_before: usize,
        entries_after: usize,
    },
    FileChanged {
        path: PathBuf,
        key: String,
    },
    DiskError {
        key: Option<String>,
        message: String,
    },
    CompressionError {
        key: String,
        message: String,
    },
    WatchError {
        path: PathBuf,
        key: String,
        message: String,
    },
}

// == Observer ==
/// Receives every event synchronously, after the store lock is released.
///
/// Observers may call back into the cache.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheObserver for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event)
    }
}

// == Event Bus ==
/// Observer registry plus broadcast channel.
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            observers: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Registers an observer for all future events.
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        self.observers.write().push(observer);
    }

    /// Returns a receiver for all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: CacheEvent) {
        // Snapshot so observers can register further observers without deadlock
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_event(&event);
        }
        // No receivers is not an error
        let _ = self.sender.send(event);
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = CacheEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.read().len())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_observer_receives_events_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.add_observer(Arc::new(move |event: &CacheEvent| {
            sink.lock().push(event.clone());
        }));

        bus.emit(CacheEvent::Eviction {
            key: "a".to_string(),
            reason: EvictionReason::Capacity,
        });
        bus.emit(CacheEvent::Set {
            key: "b".to_string(),
            size_bytes: 3,
            compressed: false,
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], CacheEvent::Eviction { key, .. } if key == "a"));
        assert!(matches!(&seen[1], CacheEvent::Set { key, .. } if key == "b"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_broadcast() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(CacheEvent::FileChanged {
            path: PathBuf::from("/tmp/f.ts"),
            key: "k".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            CacheEvent::FileChanged {
                path: PathBuf::from("/tmp/f.ts"),
                key: "k".to_string(),
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(CacheEvent::DiskError {
            key: None,
            message: "nobody listening".to_string(),
        });
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let json = serde_json::to_value(CacheEvent::Eviction {
            key: "a".to_string(),
            reason: EvictionReason::MemoryPressure,
        })
        .unwrap();
        assert_eq!(json["kind"], "eviction");
        assert_eq!(json["reason"], "memory_pressure");
    }
}
