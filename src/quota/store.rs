//! Quota Compressed Cache
//!
//! Tier 2: cache over a synchronous, quota-limited medium that other
//! consumers may also write to. Payloads above a size threshold are offered
//! to a codec and stored transformed when that saves space. Eviction is by
//! oldest `last_accessed_at` and runs before a write once medium usage
//! crosses the trigger ratio.
//!
//! Every record this cache owns lives under `<prefix>k:<key>`; aggregate
//! statistics live under `<prefix>stats` so they survive restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::clock::{system_clock, SharedClock};
use crate::cache::CacheStats;
use crate::config::{QuotaConfig, QuotaConfigUpdate};
use crate::error::{CacheError, Result};
use crate::quota::codec::{self, CompressionAlgorithm};
use crate::quota::record::{IndexEntry, StoredRecord};
use crate::quota::stats::{PersistedStats, QuotaCacheStats};
use crate::quota::storage::QuotaStorage;

const ENTRY_NAMESPACE: &str = "k:";
const STATS_KEY: &str = "stats";

/// Reads between two statistics writes when no mutation happens.
const STATS_FLUSH_EVERY: u32 = 16;

// == Quota Compressed Cache ==
pub struct QuotaCompressedCache {
    storage: Arc<dyn QuotaStorage>,
    config: QuotaConfig,
    /// Unprefixed key -> metadata of the stored record
    index: HashMap<String, IndexEntry>,
    /// Sum of `size_bytes` over indexed records
    total_size: usize,
    persisted: PersistedStats,
    unflushed_reads: u32,
    next_seq: u64,
    clock: SharedClock,
}

impl QuotaCompressedCache {
    // == Constructor ==
    /// Opens the cache over `storage`, restoring statistics and rebuilding
    /// the index from the records already in the medium.
    pub fn open(storage: Arc<dyn QuotaStorage>, config: QuotaConfig) -> Self {
        Self::open_with_clock(storage, config, system_clock())
    }

    pub fn open_with_clock(
        storage: Arc<dyn QuotaStorage>,
        config: QuotaConfig,
        clock: SharedClock,
    ) -> Self {
        let mut cache = Self {
            storage,
            config,
            index: HashMap::new(),
            total_size: 0,
            persisted: PersistedStats::default(),
            unflushed_reads: 0,
            next_seq: 0,
            clock,
        };
        cache.load_stats();
        cache.repair();
        info!(
            "Quota cache opened: {} entries, {} bytes",
            cache.index.len(),
            cache.total_size
        );
        cache
    }

    // == Get ==
    /// Retrieves and decodes a value.
    ///
    /// Expired, undecodable or foreign-shaped records count as misses; the
    /// latter two are deleted so they cannot poison later reads.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let started = Instant::now();
        let now = self.clock.now_ms();
        let full_key = self.entry_key(key);

        let mut record = match self.load_record(&full_key) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.forget(key);
                return self.miss();
            }
            Err(e) => {
                self.handle_read_error(key, e);
                return self.miss();
            }
        };

        if record.is_expired(now) {
            self.delete_expired(key);
            return self.miss();
        }

        let value = codec::decode(record.codec, &record.payload).and_then(|json| {
            serde_json::from_str::<T>(&json).map_err(|e| CacheError::Decode(e.to_string()))
        });
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                self.discard(key, e);
                return self.miss();
            }
        };

        record.touch(now);
        match serde_json::to_string(&record) {
            Ok(text) => {
                if let Err(e) = self.storage.set_item(&full_key, &text) {
                    debug!("Access metadata for '{}' not persisted: {}", key, e);
                }
            }
            Err(e) => debug!("Access metadata for '{}' not encoded: {}", key, e),
        }
        self.track(key, IndexEntry::from(&record));

        self.persisted.stats.record_hit();
        self.persisted.stats.record_access_time(started.elapsed());
        self.note_read();
        Some(value)
    }

    // == Set ==
    /// Serializes, optionally compresses and stores a value.
    ///
    /// Returns false when the value cannot be encoded or cannot fit even
    /// after eviction.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T, ttl_ms: Option<u64>) -> bool {
        let now = self.clock.now_ms();
        let full_key = self.entry_key(key);

        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cannot serialize value for '{}': {}", key, e);
                self.persisted.stats.record_error(format!("serialize '{}': {}", key, e));
                self.flush_quietly();
                return false;
            }
        };

        let original_size = json.len();
        let (codec, payload) = self.compress(json);
        let size = full_key.len() + payload.len();

        if self.config.max_entries == 0
            || size > self.config.max_memory_bytes
            || size > self.storage.quota_bytes()
        {
            warn!("Rejecting '{}': {} bytes cannot fit", key, size);
            self.persisted.stats.record_rejection();
            self.flush_quietly();
            return false;
        }

        let record = StoredRecord {
            created_at: now,
            last_accessed_at: now,
            ttl_ms: ttl_ms.unwrap_or(self.config.default_ttl_ms),
            access_count: 0,
            size_bytes: size,
            original_size_bytes: original_size,
            compressed_size_bytes: payload.len(),
            codec,
            payload,
        };
        let text = match serde_json::to_string(&record) {
            Ok(text) => text,
            Err(e) => {
                self.persisted.stats.record_error(e.to_string());
                return false;
            }
        };

        self.make_room(key, size);
        self.relieve_quota(key, full_key.len() + text.len());

        if let Err(e) = self.write_with_retry(key, &full_key, &text) {
            warn!("Write of '{}' failed: {}", key, e);
            self.persisted.stats.record_error(e.to_string());
            self.persisted.stats.record_rejection();
            self.flush_quietly();
            return false;
        }

        if record.compression_applied() {
            self.persisted
                .record_ratio(codec::compression_ratio(original_size, record.compressed_size_bytes));
        }
        self.track(key, IndexEntry::from(&record));
        self.flush_quietly();
        true
    }

    // == Remove ==
    /// Removes an entry. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let full_key = self.entry_key(key);
        let existed = self.index.contains_key(key)
            || matches!(self.storage.get_item(&full_key), Ok(Some(_)));

        if let Err(e) = self.storage.remove_item(&full_key) {
            self.persisted.stats.record_error(e.to_string());
            return false;
        }
        self.forget(key);
        self.flush_quietly();
        existed
    }

    // == Has ==
    /// Checks for a live record, deleting it when expired or unreadable.
    pub fn has(&mut self, key: &str) -> bool {
        let now = self.clock.now_ms();
        match self.load_record(&self.entry_key(key)) {
            Ok(Some(record)) if record.is_expired(now) => {
                self.delete_expired(key);
                false
            }
            Ok(Some(record)) => {
                self.track(key, IndexEntry::from(&record));
                true
            }
            Ok(None) => {
                self.forget(key);
                false
            }
            Err(e) => {
                self.handle_read_error(key, e);
                false
            }
        }
    }

    // == Clear ==
    /// Removes every record owned by this cache. Foreign keys are untouched.
    pub fn clear(&mut self) {
        let prefix = self.entry_prefix();
        let keys: Vec<String> = match self.storage.keys() {
            Ok(keys) => keys.into_iter().filter(|k| k.starts_with(&prefix)).collect(),
            Err(e) => {
                self.persisted.stats.record_error(e.to_string());
                self.index.keys().map(|k| self.entry_key(k)).collect()
            }
        };

        for full_key in &keys {
            if let Err(e) = self.storage.remove_item(full_key) {
                self.persisted.stats.record_error(e.to_string());
            }
        }
        self.index.clear();
        self.total_size = 0;
        self.flush_quietly();
        info!("Cleared {} records from quota cache", keys.len());
    }

    // == Keys ==
    /// Keys currently present in the medium under this cache's namespace.
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.entry_prefix();
        let mut keys: Vec<String> = match self.storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                .collect(),
            Err(_) => self.index.keys().cloned().collect(),
        };
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // == Cleanup ==
    /// Deletes expired records. Returns the number removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .index
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            self.delete_expired(key);
        }
        if !expired.is_empty() {
            debug!("Quota cleanup removed {} expired records", expired.len());
            self.flush_quietly();
        }
        expired.len()
    }

    // == Stats ==
    pub fn stats(&self) -> QuotaCacheStats {
        let cache = self.cache_stats();
        let quota = self.storage.quota_bytes();
        let used = self.storage.used_bytes();
        QuotaCacheStats {
            cache,
            compression_ratio: self.persisted.compression_ratio(),
            compressed_entries: self.index.values().filter(|e| e.compressed).count(),
            quota_usage_percent: if quota == 0 {
                100.0
            } else {
                used as f64 * 100.0 / quota as f64
            },
            quota_bytes: quota,
            medium_used_bytes: used,
        }
    }

    /// Writes the aggregate statistics, size totals included, to the medium.
    pub fn flush(&mut self) -> Result<()> {
        self.persisted.stats = self.cache_stats();
        let json = serde_json::to_string(&self.persisted)?;
        self.storage.set_item(&self.stats_key(), &json)?;
        self.unflushed_reads = 0;
        Ok(())
    }

    // == Configuration ==
    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Applies a partial config change, evicting down to lowered limits.
    pub fn update_config(&mut self, update: &QuotaConfigUpdate) -> usize {
        update.apply(&mut self.config);

        let mut evicted = 0;
        while self.index.len() > self.config.max_entries
            || self.total_size > self.config.max_memory_bytes
        {
            if self.evict_oldest(None).is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            info!("Quota config change evicted {} records", evicted);
            self.flush_quietly();
        }
        evicted
    }

    // == Repair ==
    /// Rebuilds the index and size totals from the medium.
    ///
    /// Unreadable records are deleted and counted as errors; expired records
    /// are deleted. Returns the number of records dropped.
    pub fn repair(&mut self) -> usize {
        let now = self.clock.now_ms();
        let prefix = self.entry_prefix();
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cannot list medium keys: {}", e);
                self.persisted.stats.record_error(e.to_string());
                return 0;
            }
        };

        self.index.clear();
        self.total_size = 0;
        let mut dropped = 0;

        for full_key in keys {
            let Some(key) = full_key.strip_prefix(&prefix).map(str::to_string) else {
                continue;
            };
            match self.load_record(&full_key) {
                Ok(Some(record)) if record.is_expired(now) => {
                    let _ = self.storage.remove_item(&full_key);
                    self.persisted.stats.record_expiration();
                    dropped += 1;
                }
                Ok(Some(record)) => self.track(&key, IndexEntry::from(&record)),
                Ok(None) => {}
                Err(e) => {
                    self.discard(&key, e);
                    dropped += 1;
                }
            }
        }
        dropped
    }

    // == Internal ==
    /// Lifetime counters merged with the current index totals.
    fn cache_stats(&self) -> CacheStats {
        let mut cache = self.persisted.stats.clone();
        cache.current_entries = self.index.len();
        cache.max_entries = self.config.max_entries;
        cache.memory_usage = self.total_size;
        cache.max_memory_usage = self.config.max_memory_bytes;
        cache.set_entry_span(self.index.values().map(|e| e.created_at));
        cache
    }

    fn entry_prefix(&self) -> String {
        format!("{}{}", self.config.key_prefix, ENTRY_NAMESPACE)
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}{}{}", self.config.key_prefix, ENTRY_NAMESPACE, key)
    }

    fn stats_key(&self) -> String {
        format!("{}{}", self.config.key_prefix, STATS_KEY)
    }

    fn load_stats(&mut self) {
        let key = self.stats_key();
        match self.storage.get_item(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedStats>(&raw) {
                Ok(persisted) => self.persisted = persisted,
                Err(e) => {
                    warn!("Discarding corrupt statistics payload: {}", e);
                    let _ = self.storage.remove_item(&key);
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!("Cannot read statistics: {}", e);
                self.persisted.stats.record_error(e.to_string());
            }
        }
    }

    fn load_record(&self, full_key: &str) -> Result<Option<StoredRecord>> {
        match self.storage.get_item(full_key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Decode(format!("record '{}': {}", full_key, e))),
            None => Ok(None),
        }
    }

    fn compress(&self, json: String) -> (CompressionAlgorithm, String) {
        if !self.config.compression_enabled || json.len() < self.config.compression_threshold_bytes
        {
            return (CompressionAlgorithm::None, json);
        }
        match codec::encode(self.config.compression_algorithm, &json) {
            Some(encoded) => (self.config.compression_algorithm, encoded),
            None => (CompressionAlgorithm::None, json),
        }
    }

    /// Medium errors are recorded; decoding errors also delete the record.
    fn handle_read_error(&mut self, key: &str, err: CacheError) {
        match err {
            CacheError::Decode(_) => self.discard(key, err),
            other => {
                warn!("Medium read of '{}' failed: {}", key, other);
                self.persisted.stats.record_error(other.to_string());
            }
        }
    }

    fn discard(&mut self, key: &str, err: CacheError) {
        warn!("Dropping unreadable record '{}': {}", key, err);
        self.persisted.stats.record_error(err.to_string());
        if let Err(e) = self.storage.remove_item(&self.entry_key(key)) {
            debug!("Could not delete '{}': {}", key, e);
        }
        self.forget(key);
    }

    fn delete_expired(&mut self, key: &str) {
        if let Err(e) = self.storage.remove_item(&self.entry_key(key)) {
            self.persisted.stats.record_error(e.to_string());
        }
        self.forget(key);
        self.persisted.stats.record_expiration();
    }

    fn track(&mut self, key: &str, mut entry: IndexEntry) {
        match self.index.get(key) {
            Some(old) if old.last_accessed_at == entry.last_accessed_at => entry.seq = old.seq,
            _ => {
                entry.seq = self.next_seq;
                self.next_seq += 1;
            }
        }
        if let Some(old) = self.index.insert(key.to_string(), entry) {
            self.total_size -= old.size_bytes;
        }
        self.total_size += entry.size_bytes;
    }

    fn forget(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.index.remove(key)?;
        self.total_size -= entry.size_bytes;
        Some(entry)
    }

    fn miss<T>(&mut self) -> Option<T> {
        self.persisted.stats.record_miss();
        self.note_read();
        None
    }

    fn note_read(&mut self) {
        self.unflushed_reads += 1;
        if self.unflushed_reads >= STATS_FLUSH_EVERY {
            self.flush_quietly();
        }
    }

    fn flush_quietly(&mut self) {
        if let Err(e) = self.flush() {
            debug!("Statistics not persisted: {}", e);
        }
    }

    /// Evicts the record with the oldest access time, never `protect`.
    /// Returns the bytes released from the index.
    fn evict_oldest(&mut self, protect: Option<&str>) -> Option<usize> {
        let victim = self
            .index
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != protect)
            .min_by(|a, b| {
                a.1.last_accessed_at
                    .cmp(&b.1.last_accessed_at)
                    .then(a.1.seq.cmp(&b.1.seq))
            })
            .map(|(k, _)| k.clone())?;

        if let Err(e) = self.storage.remove_item(&self.entry_key(&victim)) {
            warn!("Could not evict '{}': {}", victim, e);
            self.persisted.stats.record_error(e.to_string());
            return None;
        }
        let entry = self.forget(&victim)?;
        self.persisted.stats.record_eviction();
        debug!("Evicted '{}' ({} bytes)", victim, entry.size_bytes);
        Some(entry.size_bytes)
    }

    /// Enforces this cache's own entry cap and byte budget for a write of
    /// `size` bytes under `key`.
    fn make_room(&mut self, key: &str, size: usize) {
        let existing = self.index.get(key).map(|e| e.size_bytes);

        if existing.is_none() {
            while self.index.len() >= self.config.max_entries {
                if self.evict_oldest(Some(key)).is_none() {
                    break;
                }
            }
        }
        let replaced = existing.unwrap_or(0);
        while self.total_size - replaced + size > self.config.max_memory_bytes {
            if self.evict_oldest(Some(key)).is_none() {
                break;
            }
        }
    }

    /// Frees medium space ahead of a write of `incoming` bytes when usage is
    /// above the trigger ratio or the write would not fit.
    fn relieve_quota(&mut self, key: &str, incoming: usize) {
        let quota = self.storage.quota_bytes();
        let used = self.storage.used_bytes();
        let trigger = (quota as f64 * self.config.eviction_trigger_ratio) as usize;
        if used <= trigger && used + incoming <= quota {
            return;
        }

        let target = ((quota as f64 * self.config.eviction_target_ratio) as usize).max(incoming);
        let mut evicted = 0;
        while used.saturating_sub(self.storage.used_bytes()) < target {
            if self.evict_oldest(Some(key)).is_none() {
                break;
            }
            evicted += 1;
        }
        info!(
            "Quota pressure: {} of {} bytes used, evicted {} records",
            used, quota, evicted
        );
    }

    fn write_with_retry(&mut self, key: &str, full_key: &str, text: &str) -> Result<()> {
        match self.storage.set_item(full_key, text) {
            Err(CacheError::QuotaExceeded(msg)) => {
                debug!("Quota exceeded writing '{}': {}", key, msg);
                let needed = full_key.len() + text.len();
                let quota = self.storage.quota_bytes();
                while self.storage.used_bytes() + needed > quota {
                    if self.evict_oldest(Some(key)).is_none() {
                        break;
                    }
                }
                self.storage.set_item(full_key, text)
            }
            other => other,
        }
    }
}

impl Drop for QuotaCompressedCache {
    fn drop(&mut self) {
        self.flush_quietly();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::quota::storage::MemoryQuotaStorage;
    use serde_json::{json, Value};
    use std::collections::HashMap as StdHashMap;

    fn setup_with(
        quota: usize,
        config: QuotaConfig,
    ) -> (QuotaCompressedCache, MemoryQuotaStorage, ManualClock) {
        let storage = MemoryQuotaStorage::new(quota);
        let clock = ManualClock::new(1_700_000_000_000);
        let cache = QuotaCompressedCache::open_with_clock(
            Arc::new(storage.clone()),
            config,
            Arc::new(clock.clone()),
        );
        (cache, storage, clock)
    }

    fn setup() -> (QuotaCompressedCache, MemoryQuotaStorage, ManualClock) {
        setup_with(1024 * 1024, QuotaConfig::default())
    }

    fn candles(n: usize) -> Value {
        Value::Array(
            (0..n)
                .map(|i| {
                    json!({
                        "symbol": "MSFT",
                        "timestamp": 1_700_000_000u64 + i as u64 * 60,
                        "open": 410.5,
                        "high": 412.0,
                        "low": 409.8,
                        "close": 411.2,
                        "volume": 25_000 + i,
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn test_roundtrip_small_value_uncompressed() {
        let (mut cache, _, _) = setup();

        assert!(cache.set("quote:AAPL", &json!({"price": 189.2}), None));
        let value: Option<Value> = cache.get("quote:AAPL");

        assert_eq!(value, Some(json!({"price": 189.2})));
        assert_eq!(cache.stats().compressed_entries, 0);
    }

    #[test]
    fn test_roundtrip_dictionary_compressed() {
        let (mut cache, _, _) = setup();
        let payload = candles(30);

        assert!(cache.set("candles:MSFT", &payload, None));
        assert_eq!(cache.get::<Value>("candles:MSFT"), Some(payload));

        let stats = cache.stats();
        assert_eq!(stats.compressed_entries, 1);
        assert!(stats.compression_ratio < 1.0);
    }

    #[test]
    fn test_roundtrip_lz4_compressed() {
        let config = QuotaConfig {
            compression_algorithm: CompressionAlgorithm::Lz4,
            ..QuotaConfig::default()
        };
        let (mut cache, _, _) = setup_with(1024 * 1024, config);
        let payload = candles(30);

        assert!(cache.set("candles:MSFT", &payload, None));
        assert_eq!(cache.get::<Value>("candles:MSFT"), Some(payload));
        assert_eq!(cache.stats().compressed_entries, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let (mut cache, storage, clock) = setup();

        cache.set("k", "v", Some(100));
        assert_eq!(cache.get::<String>("k"), Some("v".to_string()));

        clock.advance(150);
        assert_eq!(cache.get::<String>("k"), None);
        assert!(!cache.has("k"));
        assert_eq!(storage.get_item("tc:k:k").unwrap(), None);
        assert_eq!(cache.stats().cache.expirations, 1);
    }

    #[test]
    fn test_hit_rate_accounting() {
        let (mut cache, _, _) = setup();

        cache.set("k", "v", None);
        cache.get::<String>("k");
        cache.get::<String>("absent");

        let stats = cache.stats().cache;
        assert_eq!((stats.hits, stats.misses, stats.hit_rate), (1, 1, 50.0));
    }

    #[test]
    fn test_entry_cap_evicts_oldest_access() {
        let config = QuotaConfig {
            max_entries: 2,
            ..QuotaConfig::default()
        };
        let (mut cache, _, clock) = setup_with(1024 * 1024, config);

        cache.set("a", "1", None);
        clock.advance(1);
        cache.set("b", "2", None);
        clock.advance(1);
        cache.get::<String>("a");
        clock.advance(1);
        cache.set("c", "3", None);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.stats().cache.evictions, 1);
    }

    #[test]
    fn test_proactive_quota_eviction() {
        let config = QuotaConfig {
            compression_enabled: false,
            ..QuotaConfig::default()
        };
        let (mut cache, storage, clock) = setup_with(4000, config);
        let body = "x".repeat(200);

        for i in 0..100 {
            assert!(cache.set(&format!("key{:02}", i), &body, None));
            clock.advance(1);
            if storage.used_bytes() > 3600 {
                break;
            }
        }
        let before = cache.stats();
        let used_before = storage.used_bytes();

        assert!(cache.set("fresh", &body, None));

        let after = cache.stats();
        let evicted = after.cache.evictions - before.cache.evictions;
        assert!(evicted >= 2);
        assert_eq!(
            after.cache.current_entries,
            before.cache.current_entries + 1 - evicted as usize
        );
        assert!(!cache.has("key00"));
        assert!(!cache.has("key01"));
        assert!(cache.has("fresh"));
        assert!(storage.used_bytes() < used_before);
    }

    #[test]
    fn test_write_rejected_when_foreign_data_fills_quota() {
        let (mut cache, storage, _) = setup_with(1000, QuotaConfig::default());
        let foreign = storage.clone();
        foreign.set_item("other-app", &"z".repeat(950)).unwrap();

        assert!(!cache.set("k", &"x".repeat(100), None));

        let stats = cache.stats().cache;
        assert_eq!(stats.rejected_writes, 1);
        assert!(stats.error_count >= 1);
        assert!(foreign.get_item("other-app").unwrap().is_some());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let config = QuotaConfig {
            max_memory_bytes: 64,
            compression_enabled: false,
            ..QuotaConfig::default()
        };
        let (mut cache, _, _) = setup_with(1024 * 1024, config);

        assert!(cache.set("small", "v", None));
        assert!(!cache.set("big", &"x".repeat(100), None));
        assert!(cache.has("small"));
    }

    #[test]
    fn test_memory_budget_respected() {
        let config = QuotaConfig {
            max_memory_bytes: 200,
            compression_enabled: false,
            ..QuotaConfig::default()
        };
        let (mut cache, _, clock) = setup_with(1024 * 1024, config);

        for i in 0..20 {
            cache.set(&format!("k{}", i), &"y".repeat(30), None);
            clock.advance(1);
            assert!(cache.stats().cache.memory_usage <= 200);
        }
        assert!(cache.has("k19"));
    }

    #[test]
    fn test_corrupt_record_is_miss_and_deleted() {
        let (mut cache, storage, _) = setup();
        storage.set_item("tc:k:bad", "{oops").unwrap();

        assert_eq!(cache.get::<Value>("bad"), None);
        assert_eq!(storage.get_item("tc:k:bad").unwrap(), None);

        let stats = cache.stats().cache;
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_corrupt_compressed_payload_is_deleted() {
        let (mut cache, storage, _) = setup();
        let record = StoredRecord {
            created_at: 1_700_000_000_000,
            last_accessed_at: 1_700_000_000_000,
            ttl_ms: 60_000,
            access_count: 0,
            size_bytes: 10,
            original_size_bytes: 20,
            compressed_size_bytes: 3,
            codec: CompressionAlgorithm::Dictionary,
            payload: "\u{1}~".to_string(),
        };
        storage
            .set_item("tc:k:broken", &serde_json::to_string(&record).unwrap())
            .unwrap();

        assert_eq!(cache.get::<Value>("broken"), None);
        assert!(!cache.has("broken"));
        assert_eq!(storage.get_item("tc:k:broken").unwrap(), None);
    }

    #[test]
    fn test_open_repairs_index_from_medium() {
        let storage = MemoryQuotaStorage::new(1024 * 1024);
        storage.set_item("tc:k:junk", "not a record").unwrap();
        let clock = ManualClock::new(1_700_000_000_000);

        {
            let mut cache = QuotaCompressedCache::open_with_clock(
                Arc::new(storage.clone()),
                QuotaConfig::default(),
                Arc::new(clock.clone()),
            );
            assert!(cache.set("a", "1", None));
            assert_eq!(cache.get::<String>("a"), Some("1".to_string()));
        }

        let reopened = QuotaCompressedCache::open_with_clock(
            Arc::new(storage.clone()),
            QuotaConfig::default(),
            Arc::new(clock),
        );
        let stats = reopened.stats().cache;
        assert_eq!(stats.current_entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(storage.get_item("tc:k:junk").unwrap(), None);
    }

    #[test]
    fn test_corrupt_statistics_are_reset() {
        let storage = MemoryQuotaStorage::new(1024 * 1024);
        storage.set_item("tc:stats", "][").unwrap();

        let mut cache = QuotaCompressedCache::open(Arc::new(storage.clone()), QuotaConfig::default());
        assert_eq!(cache.stats().cache.hits, 0);
        assert!(cache.set("k", "v", None));
        assert_eq!(cache.get::<String>("k"), Some("v".to_string()));
    }

    #[test]
    fn test_external_removal_is_observed() {
        let (mut cache, storage, _) = setup();
        cache.set("a", "1", None);

        storage.remove_item("tc:k:a").unwrap();

        assert_eq!(cache.get::<String>("a"), None);
        assert_eq!(cache.stats().cache.current_entries, 0);
        assert_eq!(cache.stats().cache.memory_usage, 0);
    }

    #[test]
    fn test_clear_leaves_foreign_keys() {
        let (mut cache, storage, _) = setup();
        storage.set_item("other-app", "keep me").unwrap();
        cache.set("a", "1", None);
        cache.set("b", "2", None);

        cache.clear();

        assert!(cache.keys().is_empty());
        assert_eq!(cache.stats().cache.current_entries, 0);
        assert_eq!(storage.get_item("other-app").unwrap(), Some("keep me".to_string()));
    }

    #[test]
    fn test_update_config_shrink() {
        let (mut cache, _, clock) = setup();
        for key in ["a", "b", "c"] {
            cache.set(key, key, None);
            clock.advance(1);
        }

        let evicted = cache.update_config(&QuotaConfigUpdate {
            max_entries: Some(1),
            ..Default::default()
        });

        assert_eq!(evicted, 2);
        assert_eq!(cache.keys(), vec!["c".to_string()]);
    }

    #[test]
    fn test_unserializable_value_records_error() {
        let (mut cache, _, _) = setup();
        let mut bad = StdHashMap::new();
        bad.insert((1u8, 2u8), 3u8);

        assert!(!cache.set("bad", &bad, None));
        assert!(cache.set("good", "ok", None));
        assert_eq!(cache.get::<String>("good"), Some("ok".to_string()));
        assert_eq!(cache.stats().cache.error_count, 1);
    }

    #[test]
    fn test_medium_failure_is_soft() {
        let (mut cache, storage, _) = setup();
        cache.set("a", "1", None);

        storage.set_failing(true);
        assert_eq!(cache.get::<String>("a"), None);
        assert!(!cache.set("b", "2", None));
        assert!(cache.stats().cache.error_count >= 2);

        storage.set_failing(false);
        assert_eq!(cache.get::<String>("a"), Some("1".to_string()));
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let (mut cache, _, clock) = setup();
        cache.set("short", "1", Some(10));
        cache.set("long", "2", Some(10_000));
        clock.advance(50);

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.keys(), vec!["long".to_string()]);
    }

    #[test]
    fn test_flushed_stats_carry_size_totals() {
        let (mut cache, storage, _) = setup();
        assert!(cache.set("quote:AAPL", &1, None));
        assert!(cache.set("quote:MSFT", &2, None));
        cache.flush().unwrap();

        let raw = storage.get_item("tc:stats").unwrap().unwrap();
        let stored: Value = serde_json::from_str(&raw).unwrap();
        let live = cache.stats().cache;

        assert_eq!(stored["stats"]["currentEntries"], 2);
        assert_eq!(stored["stats"]["memoryUsage"], live.memory_usage as u64);
        assert!(live.memory_usage > 0);
    }

    #[test]
    fn test_equal_access_times_evict_first_written() {
        let config = QuotaConfig {
            max_entries: 2,
            ..QuotaConfig::default()
        };
        let (mut cache, _, _) = setup_with(1024 * 1024, config);

        cache.set("z", "1", None);
        cache.set("m", "2", None);
        cache.set("a", "3", None);

        assert!(!cache.has("z"));
        assert!(cache.has("m"));
        assert!(cache.has("a"));
    }

    #[test]
    fn test_remove() {
        let (mut cache, _, _) = setup();
        cache.set("a", "1", None);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.stats().cache.memory_usage, 0);
    }
}
