//! Operation Queue Worker
//!
//! A single task owns the store handle and the in-memory index and drains a
//! FIFO channel of commands, so at most one store call is in flight at a
//! time. Every store call is raced against the operation timeout.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::DurableStore;
use super::record::DurableRecord;
use super::stats::{group_add, group_sub, DurableState};
use crate::cache::clock::SharedClock;
use crate::config::{DurableConfig, DurableConfigUpdate};
use crate::error::{CacheError, Result};

// == Reports ==
/// Outcome of a background sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
    pub corrupt: usize,
}

/// Outcome of a maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub entries: usize,
    pub size_bytes: usize,
    pub expired: usize,
    pub corrupt: usize,
}

// == Shared ==
/// State readable by cache handles without going through the queue.
#[derive(Debug)]
pub(crate) struct Shared {
    pub state: Mutex<DurableState>,
    pub config: Mutex<DurableConfig>,
    pub queue_depth: AtomicUsize,
}

impl Shared {
    pub fn new(config: DurableConfig) -> Self {
        Self {
            state: Mutex::new(DurableState::default()),
            config: Mutex::new(config),
            queue_depth: AtomicUsize::new(0),
        }
    }
}

// == Commands ==
/// Typed value produced by a [`Decoder`].
pub(crate) type Decoded = Box<dyn Any + Send>;

/// Turns a stored payload into the caller's type, or explains why it cannot.
pub(crate) type Decoder = Box<dyn FnOnce(&str) -> std::result::Result<Decoded, String> + Send>;

pub(crate) enum Command {
    Get {
        key: String,
        decode: Decoder,
        reply: oneshot::Sender<Option<Decoded>>,
    },
    Set {
        key: String,
        payload: String,
        ttl_ms: Option<u64>,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    Has {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Keys {
        reply: oneshot::Sender<Vec<String>>,
    },
    UpdateConfig {
        update: DurableConfigUpdate,
        reply: oneshot::Sender<usize>,
    },
    Sweep {
        reply: oneshot::Sender<SweepReport>,
    },
    Maintenance {
        reply: oneshot::Sender<MaintenanceReport>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Query,
    Write,
}

#[derive(Debug, Clone)]
struct IndexMeta {
    created_at: u64,
    last_accessed_at: u64,
    ttl_ms: u64,
    size_bytes: usize,
    category: String,
    symbol: Option<String>,
}

impl IndexMeta {
    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_ms
    }
}

impl From<&DurableRecord> for IndexMeta {
    fn from(record: &DurableRecord) -> Self {
        Self {
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
            ttl_ms: record.ttl_ms,
            size_bytes: record.size_bytes,
            category: record.category.clone(),
            symbol: record.symbol.clone(),
        }
    }
}

// == Worker ==
pub(crate) struct Worker {
    store: Arc<dyn DurableStore>,
    config: DurableConfig,
    index: HashMap<String, IndexMeta>,
    total_size: usize,
    opened: bool,
    /// Set after a failed open or a lost store; cleared by the next open
    needs_recovery: bool,
    /// Index not yet rebuilt since the last open
    index_stale: bool,
    shared: Arc<Shared>,
    clock: SharedClock,
}

impl Worker {
    pub fn new(
        store: Arc<dyn DurableStore>,
        config: DurableConfig,
        shared: Arc<Shared>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            config,
            index: HashMap::new(),
            total_size: 0,
            opened: false,
            needs_recovery: false,
            index_stale: true,
            shared,
            clock,
        }
    }

    /// Drains commands until `Close` arrives or every handle is dropped.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        if let Err(e) = self.ensure_open().await {
            warn!("Durable store not available at startup: {}", e);
        }
        self.publish();

        loop {
            let Some(command) = rx.recv().await else {
                debug!("Every durable cache handle dropped");
                self.shutdown().await;
                break;
            };
            self.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
            match command {
                Command::Close { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                other => self.dispatch(other).await,
            }
        }

        // Commands queued behind Close resolve as closed
        rx.close();
        while let Ok(command) = rx.try_recv() {
            self.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
            drop(command);
        }
        info!("Durable cache worker stopped");
    }

    async fn dispatch(&mut self, command: Command) {
        match command {
            Command::Get { key, decode, reply } => {
                let value = self.get(&key, decode).await;
                self.publish();
                let _ = reply.send(value);
            }
            Command::Set {
                key,
                payload,
                ttl_ms,
                reply,
            } => {
                let stored = self.set(key, payload, ttl_ms).await;
                self.publish();
                let _ = reply.send(stored);
            }
            Command::Remove { key, reply } => {
                let existed = self.remove(&key).await;
                self.publish();
                let _ = reply.send(existed);
            }
            Command::Has { key, reply } => {
                let present = self.has(&key).await;
                self.publish();
                let _ = reply.send(present);
            }
            Command::Clear { reply } => {
                self.clear().await;
                self.publish();
                let _ = reply.send(());
            }
            Command::Keys { reply } => {
                let _ = reply.send(self.keys());
            }
            Command::UpdateConfig { update, reply } => {
                let evicted = self.update_config(&update).await;
                self.publish();
                let _ = reply.send(evicted);
            }
            Command::Sweep { reply } => {
                let report = self.sweep().await;
                self.publish();
                let _ = reply.send(report);
            }
            Command::Maintenance { reply } => {
                let report = self.maintenance().await;
                self.publish();
                let _ = reply.send(report);
            }
            Command::Close { reply } => {
                self.shutdown().await;
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    // == Store Calls ==
    /// Runs one store call under the operation timeout.
    async fn call<T, F>(&mut self, kind: CallKind, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = Duration::from_millis(self.config.operation_timeout_ms);
        let started = Instant::now();

        match tokio::time::timeout(limit, fut).await {
            Ok(result) => {
                let elapsed = started.elapsed();
                {
                    let mut state = self.shared.state.lock();
                    match kind {
                        CallKind::Query => state.performance.record_query(elapsed),
                        CallKind::Write => state.performance.record_write(elapsed),
                    }
                }
                if let Err(CacheError::Unavailable(msg)) = &result {
                    warn!("Durable store lost: {}", msg);
                    self.opened = false;
                    self.needs_recovery = true;
                }
                result
            }
            Err(_) => {
                warn!(
                    "Durable store call exceeded {}ms",
                    self.config.operation_timeout_ms
                );
                self.shared.state.lock().performance.record_timeout();
                Err(CacheError::Timeout(self.config.operation_timeout_ms))
            }
        }
    }

    /// Opens the store if needed and rebuilds the index until a rebuild
    /// succeeds. Every operation goes through here first.
    async fn ensure_open(&mut self) -> Result<()> {
        if !self.opened {
            let store = Arc::clone(&self.store);
            if let Err(e) = self.call(CallKind::Write, store.open()).await {
                self.needs_recovery = true;
                self.record_error(format!("open failed: {}", e));
                return Err(e);
            }

            self.opened = true;
            self.index_stale = true;
            if self.needs_recovery {
                self.needs_recovery = false;
                self.shared.state.lock().recovery_count += 1;
                info!("Durable store reopened after failure");
            }
        }

        if !self.index_stale {
            return Ok(());
        }
        match self.rebuild().await {
            Ok(report) => {
                self.index_stale = false;
                info!(
                    "Durable store ready: {} entries, {} bytes",
                    report.entries, report.size_bytes
                );
                Ok(())
            }
            Err(e) => {
                self.record_error(format!("index rebuild failed: {}", e));
                Err(e)
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.opened {
            let store = Arc::clone(&self.store);
            if let Err(e) = self.call(CallKind::Write, store.close()).await {
                warn!("Durable store close failed: {}", e);
            }
            self.opened = false;
        }
    }

    // == Operations ==
    /// A payload `decode` rejects counts as a miss and an error; the record
    /// itself stays.
    async fn get(&mut self, key: &str, decode: Decoder) -> Option<Decoded> {
        let started = Instant::now();
        if self.ensure_open().await.is_err() {
            self.shared.state.lock().stats.record_miss();
            return None;
        }

        let store = Arc::clone(&self.store);
        let now = self.clock.now_ms();
        match self.call(CallKind::Query, store.get(key)).await {
            Ok(Some(record)) if record.is_expired(now) => {
                self.delete_quietly(key).await;
                self.account_remove(key);
                let mut state = self.shared.state.lock();
                state.stats.record_expiration();
                state.stats.record_miss();
                None
            }
            Ok(Some(mut record)) => {
                let value = match decode(&record.payload) {
                    Ok(value) => value,
                    Err(reason) => {
                        self.account_insert(key, IndexMeta::from(&record));
                        self.record_error(format!("decode '{}': {}", key, reason));
                        self.shared.state.lock().stats.record_miss();
                        return None;
                    }
                };

                record.touch(now);
                if let Err(e) = self.call(CallKind::Write, store.put(&record)).await {
                    debug!("Access time for '{}' not persisted: {}", key, e);
                }
                self.account_insert(key, IndexMeta::from(&record));
                let mut state = self.shared.state.lock();
                state.stats.record_hit();
                state.stats.record_access_time(started.elapsed());
                Some(value)
            }
            Ok(None) => {
                self.account_remove(key);
                self.shared.state.lock().stats.record_miss();
                None
            }
            Err(CacheError::Decode(reason)) => {
                self.discard_corrupt(key, &reason).await;
                self.shared.state.lock().stats.record_miss();
                None
            }
            Err(e) => {
                self.record_error(format!("get '{}': {}", key, e));
                self.shared.state.lock().stats.record_miss();
                None
            }
        }
    }

    async fn set(&mut self, key: String, payload: String, ttl_ms: Option<u64>) -> bool {
        if self.ensure_open().await.is_err() {
            return false;
        }

        let now = self.clock.now_ms();
        let ttl_ms = ttl_ms.unwrap_or(self.config.default_ttl_ms);
        let record = DurableRecord::new(key.clone(), payload, now, ttl_ms);
        let size = record.size_bytes;

        if self.config.max_entries == 0 || size > self.config.max_memory_bytes {
            warn!("Rejecting '{}': {} bytes cannot fit", key, size);
            self.shared.state.lock().stats.record_rejection();
            return false;
        }

        let (excess_entries, excess_bytes) = self.excess_for(&key, size);
        if excess_entries > 0 || excess_bytes > 0 {
            let target_bytes = (excess_bytes as f64 * self.config.sweep_safety_margin).ceil() as usize;
            self.evict_lru(excess_entries, target_bytes, Some(&key)).await;

            if self.excess_for(&key, size) != (0, 0) {
                warn!("Rejecting '{}': eviction could not make room", key);
                self.shared.state.lock().stats.record_rejection();
                return false;
            }
        }

        let store = Arc::clone(&self.store);
        match self.call(CallKind::Write, store.put(&record)).await {
            Ok(()) => {
                self.account_insert(&key, IndexMeta::from(&record));
                debug!("Stored '{}' ({} bytes)", key, size);
                true
            }
            Err(e) => {
                self.record_error(format!("set '{}': {}", key, e));
                false
            }
        }
    }

    async fn remove(&mut self, key: &str) -> bool {
        if self.ensure_open().await.is_err() {
            return false;
        }

        let store = Arc::clone(&self.store);
        match self.call(CallKind::Write, store.delete(key)).await {
            Ok(existed) => {
                self.account_remove(key);
                existed
            }
            Err(e) => {
                self.record_error(format!("remove '{}': {}", key, e));
                false
            }
        }
    }

    async fn has(&mut self, key: &str) -> bool {
        if self.ensure_open().await.is_err() {
            return false;
        }

        let store = Arc::clone(&self.store);
        let now = self.clock.now_ms();
        match self.call(CallKind::Query, store.get(key)).await {
            Ok(Some(record)) if record.is_expired(now) => {
                self.delete_quietly(key).await;
                self.account_remove(key);
                self.shared.state.lock().stats.record_expiration();
                false
            }
            Ok(Some(record)) => {
                self.account_insert(key, IndexMeta::from(&record));
                true
            }
            Ok(None) => {
                self.account_remove(key);
                false
            }
            Err(CacheError::Decode(reason)) => {
                self.discard_corrupt(key, &reason).await;
                false
            }
            Err(e) => {
                self.record_error(format!("has '{}': {}", key, e));
                false
            }
        }
    }

    async fn clear(&mut self) {
        if self.ensure_open().await.is_err() {
            return;
        }

        let store = Arc::clone(&self.store);
        match self.call(CallKind::Write, store.clear()).await {
            Ok(()) => {
                let removed = self.index.len();
                self.reset_index();
                info!("Cleared {} records from durable cache", removed);
            }
            Err(e) => self.record_error(format!("clear: {}", e)),
        }
    }

    fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .index
            .iter()
            .filter(|(_, meta)| !meta.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn update_config(&mut self, update: &DurableConfigUpdate) -> usize {
        update.apply(&mut self.config);
        *self.shared.config.lock() = self.config.clone();
        info!("Durable config updated: {:?}", self.config);

        let excess_entries = self.index.len().saturating_sub(self.config.max_entries);
        let excess_bytes = self.total_size.saturating_sub(self.config.max_memory_bytes);
        if excess_entries == 0 && excess_bytes == 0 {
            return 0;
        }
        self.evict_lru(excess_entries, excess_bytes, None).await
    }

    // == Background Work ==
    async fn sweep(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.ensure_open().await.is_err() {
            return report;
        }

        let store = Arc::clone(&self.store);
        let items = match self.call(CallKind::Query, store.scan()).await {
            Ok(items) => items,
            Err(e) => {
                self.record_error(format!("sweep scan: {}", e));
                return report;
            }
        };

        let now = self.clock.now_ms();
        for item in items {
            match item {
                Ok(record) if record.is_expired(now) => {
                    self.delete_quietly(&record.key).await;
                    self.account_remove(&record.key);
                    self.shared.state.lock().stats.record_expiration();
                    report.expired += 1;
                }
                Ok(record) => {
                    if !self.index.contains_key(&record.key) {
                        debug!("Sweep indexed unknown record '{}'", record.key);
                        self.account_insert(&record.key, IndexMeta::from(&record));
                    }
                }
                Err(corrupt) => {
                    self.discard_corrupt(&corrupt.key, &corrupt.reason).await;
                    report.corrupt += 1;
                }
            }
        }

        let excess_entries = self.index.len().saturating_sub(self.config.max_entries);
        let excess_bytes = self.total_size.saturating_sub(self.config.max_memory_bytes);
        if excess_entries > 0 || excess_bytes > 0 {
            report.evicted = self.evict_lru(excess_entries, excess_bytes, None).await;
        }

        self.shared.state.lock().last_sweep_at = Some(now);
        info!(
            "Durable sweep: {} expired, {} evicted, {} corrupt",
            report.expired, report.evicted, report.corrupt
        );
        report
    }

    async fn maintenance(&mut self) -> MaintenanceReport {
        if self.ensure_open().await.is_err() {
            return MaintenanceReport::default();
        }

        match self.rebuild().await {
            Ok(report) => {
                self.shared.state.lock().last_maintenance_at = Some(self.clock.now_ms());
                info!(
                    "Durable maintenance: {} entries, {} bytes, {} expired, {} corrupt",
                    report.entries, report.size_bytes, report.expired, report.corrupt
                );
                report
            }
            Err(e) => {
                self.record_error(format!("maintenance: {}", e));
                MaintenanceReport::default()
            }
        }
    }

    /// Rebuilds the index, totals and aggregates from a full scan, deleting
    /// expired and undecodable records on the way.
    async fn rebuild(&mut self) -> Result<MaintenanceReport> {
        let store = Arc::clone(&self.store);
        let items = self.call(CallKind::Query, store.scan()).await?;
        let now = self.clock.now_ms();
        let mut report = MaintenanceReport::default();

        self.reset_index();
        for item in items {
            match item {
                Ok(record) if record.is_expired(now) => {
                    self.delete_quietly(&record.key).await;
                    self.shared.state.lock().stats.record_expiration();
                    report.expired += 1;
                }
                Ok(record) => self.account_insert(&record.key, IndexMeta::from(&record)),
                Err(corrupt) => {
                    self.discard_corrupt(&corrupt.key, &corrupt.reason).await;
                    report.corrupt += 1;
                }
            }
        }

        report.entries = self.index.len();
        report.size_bytes = self.total_size;
        Ok(report)
    }

    // == Eviction ==
    /// Entries and bytes over the limits if `key` were stored with `size`.
    fn excess_for(&self, key: &str, size: usize) -> (usize, usize) {
        let existing = self.index.get(key).map(|m| m.size_bytes);
        let entries = self.index.len() + usize::from(existing.is_none());
        let bytes = self.total_size.saturating_sub(existing.unwrap_or(0)) + size;
        (
            entries.saturating_sub(self.config.max_entries),
            bytes.saturating_sub(self.config.max_memory_bytes),
        )
    }

    /// Deletes least recently accessed records in batches until at least
    /// `entries` records and `bytes` bytes are freed. Returns the count.
    async fn evict_lru(&mut self, entries: usize, bytes: usize, protect: Option<&str>) -> usize {
        let mut candidates: Vec<(String, u64, u64, usize)> = self
            .index
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != protect)
            .map(|(k, m)| (k.clone(), m.last_accessed_at, m.created_at, m.size_bytes))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));

        let batch_size = self.config.sweep_batch_size.max(1);
        let mut removed = 0;
        let mut freed = 0;

        'sweep: for batch in candidates.chunks(batch_size) {
            for (key, _, _, size) in batch {
                if removed >= entries && freed >= bytes {
                    break 'sweep;
                }
                let store = Arc::clone(&self.store);
                match self.call(CallKind::Write, store.delete(key)).await {
                    Ok(_) => {
                        self.account_remove(key);
                        self.shared.state.lock().stats.record_eviction();
                        removed += 1;
                        freed += size;
                    }
                    Err(e) => {
                        self.record_error(format!("evict '{}': {}", key, e));
                        if !self.opened {
                            break 'sweep;
                        }
                    }
                }
            }
            debug!("LRU sweep batch: {} removed, {} bytes freed", removed, freed);
        }

        if removed > 0 {
            info!("LRU sweep evicted {} records ({} bytes)", removed, freed);
        }
        removed
    }

    // == Bookkeeping ==
    async fn delete_quietly(&mut self, key: &str) {
        let store = Arc::clone(&self.store);
        if let Err(e) = self.call(CallKind::Write, store.delete(key)).await {
            debug!("Could not delete '{}': {}", key, e);
        }
    }

    async fn discard_corrupt(&mut self, key: &str, reason: &str) {
        self.record_error(format!("corrupt record '{}': {}", key, reason));
        self.delete_quietly(key).await;
        self.account_remove(key);
    }

    fn account_insert(&mut self, key: &str, meta: IndexMeta) {
        let mut state = self.shared.state.lock();
        if let Some(old) = self.index.get(key) {
            self.total_size -= old.size_bytes;
            group_sub(&mut state.by_category, &old.category, old.size_bytes);
            if let Some(symbol) = &old.symbol {
                group_sub(&mut state.by_symbol, symbol, old.size_bytes);
            }
        }

        self.total_size += meta.size_bytes;
        group_add(&mut state.by_category, &meta.category, meta.size_bytes);
        if let Some(symbol) = &meta.symbol {
            group_add(&mut state.by_symbol, symbol, meta.size_bytes);
        }
        self.index.insert(key.to_string(), meta);
    }

    fn account_remove(&mut self, key: &str) {
        let Some(old) = self.index.remove(key) else {
            return;
        };
        self.total_size -= old.size_bytes;
        let mut state = self.shared.state.lock();
        group_sub(&mut state.by_category, &old.category, old.size_bytes);
        if let Some(symbol) = &old.symbol {
            group_sub(&mut state.by_symbol, symbol, old.size_bytes);
        }
    }

    fn reset_index(&mut self) {
        self.index.clear();
        self.total_size = 0;
        let mut state = self.shared.state.lock();
        state.by_category.clear();
        state.by_symbol.clear();
    }

    fn record_error(&self, message: String) {
        warn!("{}", message);
        self.shared.state.lock().stats.record_error(message);
    }

    fn publish(&self) {
        let mut state = self.shared.state.lock();
        state.stats.current_entries = self.index.len();
        state.stats.max_entries = self.config.max_entries;
        state.stats.memory_usage = self.total_size;
        state.stats.max_memory_usage = self.config.max_memory_bytes;
        state
            .stats
            .set_entry_span(self.index.values().map(|m| m.created_at));
    }
}
