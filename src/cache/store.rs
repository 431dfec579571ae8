//! Volatile LRU Cache
//!
//! Tier 1: in-process table combining a HashMap index with an arena-backed
//! access-order list. Every operation is O(1) except `cleanup`, `keys`,
//! `stats` and `verify_integrity`, which scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::clock::{system_clock, SharedClock};
use crate::cache::events::{
    EvictionEvent, EvictionListener, EvictionListeners, EvictionReason, ListenerId,
};
use crate::cache::size::{estimate_entry_size, FALLBACK_ENTRY_SIZE};
use crate::cache::{CacheEntry, CacheStats, LruList};
use crate::config::{VolatileConfig, VolatileConfigUpdate};

// == Volatile LRU Cache ==
/// In-memory cache with LRU eviction, byte accounting and TTL support.
pub struct VolatileLruCache<V> {
    /// Key -> handle into `lru`
    index: HashMap<String, usize>,
    /// Entries ordered from most to least recently used
    lru: LruList<CacheEntry<V>>,
    /// Performance statistics
    stats: CacheStats,
    config: VolatileConfig,
    /// Sum of `size_bytes` over live entries
    memory_usage: usize,
    listeners: EvictionListeners<V>,
    clock: SharedClock,
}

impl<V> VolatileLruCache<V>
where
    V: Clone + Serialize,
{
    // == Constructor ==
    /// Creates a cache using the system clock.
    pub fn new(config: VolatileConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Creates a cache reading time from `clock`.
    pub fn with_clock(config: VolatileConfig, clock: SharedClock) -> Self {
        Self {
            index: HashMap::new(),
            lru: LruList::new(),
            stats: CacheStats::new(),
            config,
            memory_usage: 0,
            listeners: EvictionListeners::new(),
            clock,
        }
    }

    // == Get ==
    /// Retrieves a value by key and promotes it to most recently used.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let started = Instant::now();
        let now = self.clock.now_ms();

        let Some(&idx) = self.index.get(key) else {
            self.stats.record_miss();
            return None;
        };

        let expired = self.lru.get(idx).map_or(true, |e| e.is_expired(now));
        if expired {
            self.expire(idx, now);
            self.stats.record_miss();
            return None;
        }

        let value = match self.lru.get_mut(idx) {
            Some(entry) => {
                entry.touch(now);
                entry.value.clone()
            }
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        self.lru.move_to_front(idx);
        self.stats.record_hit();
        self.stats.record_access_time(started.elapsed());
        Some(value)
    }

    // == Peek ==
    /// Returns a live value without promoting it or touching statistics.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let now = self.clock.now_ms();
        let entry = self.lru.get(*self.index.get(key)?)?;
        (!entry.is_expired(now)).then_some(&entry.value)
    }

    // == Set ==
    /// Stores a value with an optional TTL in milliseconds.
    ///
    /// Evicts least recently used entries until the value fits. Returns false
    /// without touching existing entries when the value can never fit.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl_ms: Option<u64>) -> bool {
        let key = key.into();
        let now = self.clock.now_ms();

        let size = match estimate_entry_size(&key, &value) {
            Ok(size) => size,
            Err(e) => {
                warn!("Size estimation failed, using fallback: {}", e);
                self.stats.record_size_estimation_failure(e.to_string());
                key.len() + FALLBACK_ENTRY_SIZE
            }
        };

        if self.config.max_entries == 0 || size > self.config.max_memory_bytes {
            warn!(
                "Rejecting '{}': {} bytes against a budget of {} bytes",
                key, size, self.config.max_memory_bytes
            );
            self.stats.record_rejection();
            return false;
        }

        let ttl_ms = ttl_ms.unwrap_or(self.config.default_ttl_ms);

        // Overwrite in place
        if let Some(&idx) = self.index.get(&key) {
            let old_size = self.lru.get(idx).map_or(0, |e| e.size_bytes);
            while self.memory_usage - old_size + size > self.config.max_memory_bytes {
                if !self.evict_lru(EvictionReason::Memory, Some(idx)) {
                    break;
                }
            }
            if let Some(entry) = self.lru.get_mut(idx) {
                entry.value = value;
                entry.created_at = now;
                entry.last_accessed_at = now;
                entry.ttl_ms = ttl_ms;
                entry.size_bytes = size;
            }
            self.memory_usage = self.memory_usage - old_size + size;
            self.lru.move_to_front(idx);
            debug!("Updated '{}' ({} -> {} bytes)", key, old_size, size);
            return true;
        }

        if self.index.len() >= self.config.max_entries {
            self.evict_lru(EvictionReason::Capacity, None);
        }
        while self.memory_usage + size > self.config.max_memory_bytes {
            if !self.evict_lru(EvictionReason::Memory, None) {
                break;
            }
        }

        let idx = self
            .lru
            .push_front(CacheEntry::new(key.clone(), value, now, ttl_ms, size));
        self.index.insert(key, idx);
        self.memory_usage += size;
        true
    }

    // == Remove ==
    /// Removes an entry by key. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(idx) => {
                if let Some(entry) = self.lru.remove(idx) {
                    self.memory_usage -= entry.size_bytes;
                }
                true
            }
            None => false,
        }
    }

    // == Has ==
    /// Checks for a live entry. Expired entries are removed.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let Some(&idx) = self.index.get(key) else {
            return false;
        };
        if self.lru.get(idx).map_or(true, |e| e.is_expired(now)) {
            self.expire(idx, now);
            return false;
        }
        true
    }

    // == Clear ==
    /// Drops every entry. Lifetime counters are kept.
    pub fn clear(&mut self) {
        let count = self.index.len();
        self.index.clear();
        self.lru.clear();
        self.memory_usage = 0;
        info!("Cleared {} entries from volatile cache", count);
    }

    // == Keys ==
    /// Returns keys from most to least recently used, expired ones included
    /// until they are observed.
    pub fn keys(&self) -> Vec<String> {
        self.lru.iter().map(|(_, e)| e.key.clone()).collect()
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, emitting a `ttl-expired` event for each.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<usize> = self
            .lru
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(idx, _)| idx)
            .collect();

        let count = expired.len();
        for idx in expired {
            self.expire(idx, now);
        }
        if count > 0 {
            debug!("Volatile cleanup removed {} expired entries", count);
        }
        count
    }

    // == Stats ==
    /// Returns a copy of the current statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.current_entries = self.index.len();
        stats.max_entries = self.config.max_entries;
        stats.memory_usage = self.memory_usage;
        stats.max_memory_usage = self.config.max_memory_bytes;
        stats.set_entry_span(self.lru.iter().map(|(_, e)| e.created_at));
        stats
    }

    /// Zeroes hit, miss, eviction and error counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset_counters();
    }

    // == Configuration ==
    pub fn config(&self) -> &VolatileConfig {
        &self.config
    }

    /// Applies a partial config change, evicting down to lowered limits.
    ///
    /// Returns the number of entries evicted.
    pub fn update_config(&mut self, update: &VolatileConfigUpdate) -> usize {
        update.apply(&mut self.config);

        let mut evicted = 0;
        while self.index.len() > self.config.max_entries
            || self.memory_usage > self.config.max_memory_bytes
        {
            if !self.evict_lru(EvictionReason::ConfigShrink, None) {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            info!("Config change evicted {} entries", evicted);
        }
        evicted
    }

    // == Events ==
    /// Subscribes to eviction and expiry events.
    pub fn on_eviction(&mut self, listener: EvictionListener<V>) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Unsubscribes a listener. Returns false for unknown ids.
    pub fn off_eviction(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    // == Integrity ==
    /// Recomputes entry count and byte usage by full scan and repairs drift.
    ///
    /// Returns true when the tracked values had drifted.
    pub fn verify_integrity(&mut self) -> bool {
        let scanned: usize = self.lru.iter().map(|(_, e)| e.size_bytes).sum();
        let orphans: Vec<String> = self
            .index
            .iter()
            .filter(|(_, idx)| self.lru.get(**idx).is_none())
            .map(|(k, _)| k.clone())
            .collect();

        let drifted = scanned != self.memory_usage || !orphans.is_empty();
        for key in orphans {
            self.index.remove(&key);
        }
        if drifted {
            warn!(
                "Volatile cache accounting drift: tracked {} bytes, scanned {} bytes",
                self.memory_usage, scanned
            );
            self.memory_usage = scanned;
        }
        drifted
    }

    // == Internal ==
    /// Evicts the least recently used entry, skipping `protect`.
    fn evict_lru(&mut self, reason: EvictionReason, protect: Option<usize>) -> bool {
        let mut candidate = self.lru.back();
        if candidate.is_some() && candidate == protect {
            candidate = candidate.and_then(|idx| self.lru.prev(idx));
        }
        let Some(idx) = candidate else {
            return false;
        };

        let Some(entry) = self.detach(idx) else {
            return false;
        };
        self.stats.record_eviction();
        debug!("Evicted '{}' ({})", entry.key, reason);
        self.emit(entry, reason);
        true
    }

    /// Removes an expired entry and emits its event.
    fn expire(&mut self, idx: usize, now: u64) {
        if let Some(entry) = self.detach(idx) {
            self.stats.record_expiration();
            debug!("Expired '{}' at {}", entry.key, now);
            self.emit(entry, EvictionReason::TtlExpired);
        }
    }

    /// Unlinks an entry and updates accounting.
    fn detach(&mut self, idx: usize) -> Option<CacheEntry<V>> {
        let entry = self.lru.remove(idx)?;
        self.index.remove(&entry.key);
        self.memory_usage -= entry.size_bytes;
        Some(entry)
    }

    fn emit(&self, entry: CacheEntry<V>, reason: EvictionReason) {
        if self.listeners.is_empty() {
            return;
        }
        let event = EvictionEvent::new(entry, reason, self.clock.now_ms());
        self.listeners.notify(&event);
    }
}

impl<V> VolatileLruCache<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Wraps the cache for sharing between tasks.
    pub fn into_shared(self) -> Arc<tokio::sync::RwLock<Self>> {
        Arc::new(tokio::sync::RwLock::new(self))
    }
}
