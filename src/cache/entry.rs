//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    /// Unique key
    pub key: String,
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last successful read or write (Unix milliseconds)
    pub last_accessed_at: u64,
    /// Time-to-live measured from `created_at`
    pub ttl_ms: u64,
    /// Number of successful reads
    pub access_count: u64,
    /// Estimated serialized size, fixed at write time
    pub size_bytes: usize,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry written at `now`.
    pub fn new(key: String, value: V, now: u64, ttl_ms: u64, size_bytes: usize) -> Self {
        Self {
            key,
            value,
            created_at: now,
            last_accessed_at: now,
            ttl_ms,
            access_count: 0,
            size_bytes,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is live while `now - created_at <= ttl_ms`; it becomes absent
    /// strictly after the TTL has elapsed.
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_ms
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        let expires_at = self.created_at.saturating_add(self.ttl_ms);
        expires_at.saturating_sub(now)
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}
