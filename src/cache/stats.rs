//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//! The same normalized snapshot is reported by every tier; tier-specific
//! statistics wrap it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// == Cache Stats ==
/// Tracks cache performance metrics.
///
/// Values handed to callers are always copies; a snapshot never changes after
/// it has been returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// hits / (hits + misses) as a percentage in 0..=100
    pub hit_rate: f64,
    /// Entries removed to satisfy a capacity, memory or quota limit
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Current number of entries in the cache
    pub current_entries: usize,
    /// Configured entry cap
    pub max_entries: usize,
    /// Sum of `size_bytes` over live entries
    pub memory_usage: usize,
    /// Configured byte budget
    pub max_memory_usage: usize,
    /// Creation time of the oldest live entry
    pub oldest_entry: Option<u64>,
    /// Creation time of the newest live entry
    pub newest_entry: Option<u64>,
    /// Mean latency of successful reads in milliseconds
    pub average_access_time: f64,
    /// Writes rejected because they could not fit
    pub rejected_writes: u64,
    /// Values whose size could not be estimated
    pub size_estimation_failures: u64,
    /// Internal errors observed (serialization, medium, decoding)
    pub error_count: u64,
    /// Message of the most recent internal error
    pub last_error: Option<String>,
    #[serde(skip)]
    access_time_total_ms: f64,
    #[serde(skip)]
    access_samples: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate as a percentage.
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }

    // == Record Hit ==
    /// Increments the hit counter.
    pub fn record_hit(&mut self) {
        self.hits += 1;
        self.hit_rate = self.hit_rate();
    }

    // == Record Miss ==
    /// Increments the miss counter.
    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.hit_rate = self.hit_rate();
    }

    // == Record Eviction ==
    /// Increments the eviction counter.
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Increments the expiration counter.
    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    /// Increments the rejected write counter.
    pub fn record_rejection(&mut self) {
        self.rejected_writes += 1;
    }

    /// Records a value whose size could not be estimated.
    pub fn record_size_estimation_failure(&mut self, message: impl Into<String>) {
        self.size_estimation_failures += 1;
        self.record_error(message);
    }

    // == Record Error ==
    /// Increments the error counter and remembers the message.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }

    // == Access Time ==
    /// Adds a read latency sample.
    pub fn record_access_time(&mut self, elapsed: Duration) {
        self.access_time_total_ms += elapsed.as_secs_f64() * 1000.0;
        self.access_samples += 1;
        self.average_access_time = self.access_time_total_ms / self.access_samples as f64;
    }

    // == Reset ==
    /// Zeroes the lifetime counters (hits, misses, evictions, errors).
    pub fn reset_counters(&mut self) {
        *self = Self {
            current_entries: self.current_entries,
            max_entries: self.max_entries,
            memory_usage: self.memory_usage,
            max_memory_usage: self.max_memory_usage,
            oldest_entry: self.oldest_entry,
            newest_entry: self.newest_entry,
            ..Self::default()
        };
    }

    /// Fills `oldest_entry`/`newest_entry` from a set of creation times.
    pub fn set_entry_span<I>(&mut self, created: I)
    where
        I: IntoIterator<Item = u64>,
    {
        let mut oldest: Option<u64> = None;
        let mut newest: Option<u64> = None;
        for ts in created {
            oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
        self.oldest_entry = oldest;
        self.newest_entry = newest;
    }
}
