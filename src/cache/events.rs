//! Eviction Events
//!
//! Observer list notified synchronously whenever an entry leaves the cache
//! without being explicitly removed. Listeners run after the removal has been
//! accounted; a panicking listener is isolated and logged.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::warn;

use super::entry::CacheEntry;

// == Eviction Reason ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionReason {
    /// Entry cap reached
    Capacity,
    /// Byte budget exceeded
    Memory,
    /// TTL elapsed
    TtlExpired,
    /// Limits lowered at runtime
    ConfigShrink,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Capacity => "capacity",
            EvictionReason::Memory => "memory",
            EvictionReason::TtlExpired => "ttl-expired",
            EvictionReason::ConfigShrink => "config-shrink",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Eviction Event ==
/// Payload delivered to eviction listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionEvent<V> {
    /// Always `"eviction"`
    #[serde(rename = "type")]
    pub event_type: &'static str,
    /// The entry that was removed
    pub entry: CacheEntry<V>,
    pub reason: EvictionReason,
    /// When the removal happened (Unix milliseconds)
    pub timestamp: u64,
}

impl<V> EvictionEvent<V> {
    pub fn new(entry: CacheEntry<V>, reason: EvictionReason, timestamp: u64) -> Self {
        Self {
            event_type: "eviction",
            entry,
            reason,
            timestamp,
        }
    }
}

/// Handle returned by `on_eviction`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked for each eviction.
pub type EvictionListener<V> = Box<dyn Fn(&EvictionEvent<V>) + Send + Sync>;

// == Listener Registry ==
/// Registered eviction listeners in subscription order.
pub struct EvictionListeners<V> {
    listeners: Vec<(ListenerId, EvictionListener<V>)>,
    next_id: u64,
}

impl<V> Default for EvictionListeners<V> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<V> EvictionListeners<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn add(&mut self, listener: EvictionListener<V>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Unregisters a listener. Returns false for unknown ids.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers an event to every listener. Returns how many listeners panicked.
    pub fn notify(&self, event: &EvictionEvent<V>) -> usize {
        let mut failures = 0;
        for (id, listener) in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                failures += 1;
                warn!(
                    "Eviction listener {:?} panicked while handling '{}' ({})",
                    id, event.entry.key, event.reason
                );
            }
        }
        failures
    }
}
