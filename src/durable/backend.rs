//! Durable Store Backends
//!
//! Asynchronous, transactional key-value stores behind the durable cache.
//! Stores make no ordering promise across concurrent calls; the cache only
//! ever issues one call at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::record::{CorruptRecord, DurableRecord};
use crate::error::{CacheError, Result};

/// Outcome of decoding one record during a scan.
pub type ScanItem = std::result::Result<DurableRecord, CorruptRecord>;

// == Store Trait ==
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Opens (or reopens) the store. Calls on a store that is not open fail
    /// with [`CacheError::Unavailable`].
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Loads a record; an undecodable record fails with [`CacheError::Decode`].
    async fn get(&self, key: &str) -> Result<Option<DurableRecord>>;

    async fn put(&self, record: &DurableRecord) -> Result<()>;

    /// Deletes a record. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    /// Reads every record, reporting undecodable ones instead of failing.
    async fn scan(&self) -> Result<Vec<ScanItem>>;
}

pub(crate) fn decode_record(key: &str, bytes: &[u8]) -> std::result::Result<DurableRecord, CorruptRecord> {
    serde_json::from_slice::<DurableRecord>(bytes).map_err(|e| CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// == Memory Store ==
#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, Vec<u8>>,
    open: bool,
    failing_opens: u32,
    failing_scans: u32,
    latency: Duration,
}

/// In-process store holding encoded records.
///
/// Clones share state, which lets tests keep a handle for fault injection
/// after handing the store to a cache.
#[derive(Debug, Clone, Default)]
pub struct MemoryDurableStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.state.lock().failing_opens = n;
    }

    /// Makes the next `n` calls to `scan` fail with a storage error.
    pub fn fail_next_scans(&self, n: u32) {
        self.state.lock().failing_scans = n;
    }

    /// Stores raw bytes under `key`, bypassing record encoding.
    pub fn insert_raw(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.state.lock().records.insert(key.into(), bytes.into());
    }

    /// Delay applied before every call completes.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Drops the open state as if the underlying connection was lost.
    pub fn disconnect(&self) {
        self.state.lock().open = false;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().open {
            Ok(())
        } else {
            Err(CacheError::Unavailable("store is not open".to_string()))
        }
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn open(&self) -> Result<()> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(CacheError::Unavailable("open refused".to_string()));
        }
        state.open = true;
        debug!("Memory store opened with {} records", state.records.len());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().open = false;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DurableRecord>> {
        self.delay().await;
        self.ensure_open()?;
        let state = self.state.lock();
        match state.records.get(key) {
            Some(bytes) => decode_record(key, bytes)
                .map(Some)
                .map_err(|c| CacheError::Decode(c.reason)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &DurableRecord) -> Result<()> {
        self.delay().await;
        self.ensure_open()?;
        let bytes = serde_json::to_vec(record)?;
        self.state.lock().records.insert(record.key.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.delay().await;
        self.ensure_open()?;
        Ok(self.state.lock().records.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.delay().await;
        self.ensure_open()?;
        self.state.lock().records.clear();
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ScanItem>> {
        self.delay().await;
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.failing_scans > 0 {
            state.failing_scans -= 1;
            return Err(CacheError::Storage("scan aborted".to_string()));
        }
        Ok(state
            .records
            .iter()
            .map(|(key, bytes)| decode_record(key, bytes))
            .collect())
    }
}
