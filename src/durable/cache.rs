//! Async Durable Cache
//!
//! Tier 3: cheap-to-clone handle over the operation queue. Every operation
//! is submitted to the worker and resolves once the worker has run it.
//! Store failures never surface as errors; they show up in the statistics
//! and as misses or `false`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::backend::DurableStore;
use super::health::{assess, HealthInputs, HealthReport};
use super::stats::DurableCacheStats;
use super::worker::{Command, Decoded, Decoder, MaintenanceReport, Shared, SweepReport, Worker};
use crate::cache::clock::{system_clock, SharedClock};
use crate::config::{DurableConfig, DurableConfigUpdate};

// == Async Durable Cache ==
#[derive(Clone)]
pub struct AsyncDurableCache {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl AsyncDurableCache {
    // == Constructor ==
    /// Spawns the worker on the current runtime. The store is opened by the
    /// worker; a failed open is retried by the next operation.
    pub fn spawn(store: Arc<dyn DurableStore>, config: DurableConfig) -> Self {
        Self::spawn_with_clock(store, config, system_clock())
    }

    pub fn spawn_with_clock(
        store: Arc<dyn DurableStore>,
        config: DurableConfig,
        clock: SharedClock,
    ) -> Self {
        let shared = Arc::new(Shared::new(config.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(store, config, Arc::clone(&shared), clock);
        tokio::spawn(worker.run(rx));
        info!("Durable cache worker started");
        Self { tx, shared }
    }

    /// Queues a command and waits for its reply. `None` once the cache is closed.
    async fn submit<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.shared.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(build(reply)).is_err() {
            self.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
            debug!("Durable cache is closed");
            return None;
        }
        rx.await.ok()
    }

    // == Get ==
    /// Reads and decodes a value. A stored value that does not decode as `T`
    /// is a miss.
    pub async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Option<T> {
        let decode: Decoder = Box::new(|payload: &str| {
            serde_json::from_str::<T>(payload)
                .map(|value| Box::new(value) as Decoded)
                .map_err(|e| e.to_string())
        });

        let value = self
            .submit(|reply| Command::Get {
                key: key.to_string(),
                decode,
                reply,
            })
            .await
            .flatten()?;
        value.downcast::<T>().ok().map(|value| *value)
    }

    // == Set ==
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_ms: Option<u64>) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cannot serialize value for '{}': {}", key, e);
                self.shared
                    .state
                    .lock()
                    .stats
                    .record_error(format!("serialize '{}': {}", key, e));
                return false;
            }
        };

        self.submit(|reply| Command::Set {
            key: key.to_string(),
            payload,
            ttl_ms,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.submit(|reply| Command::Remove {
            key: key.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn has(&self, key: &str) -> bool {
        self.submit(|reply| Command::Has {
            key: key.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn clear(&self) {
        self.submit(|reply| Command::Clear { reply }).await;
    }

    pub async fn keys(&self) -> Vec<String> {
        self.submit(|reply| Command::Keys { reply })
            .await
            .unwrap_or_default()
    }

    // == Configuration ==
    pub fn config(&self) -> DurableConfig {
        self.shared.config.lock().clone()
    }

    /// Applies a partial config change once queued work ahead of it is done.
    /// Returns the number of records evicted to honour lowered limits.
    pub async fn update_config(&self, update: DurableConfigUpdate) -> usize {
        self.submit(|reply| Command::UpdateConfig { update, reply })
            .await
            .unwrap_or(0)
    }

    // == Background Work ==
    /// Removes expired and corrupt records and enforces the limits.
    pub async fn sweep(&self) -> SweepReport {
        self.submit(|reply| Command::Sweep { reply })
            .await
            .unwrap_or_default()
    }

    /// Rebuilds the index and per-category aggregates from a full scan.
    pub async fn maintenance(&self) -> MaintenanceReport {
        self.submit(|reply| Command::Maintenance { reply })
            .await
            .unwrap_or_default()
    }

    // == Stats ==
    pub fn stats(&self) -> DurableCacheStats {
        let depth = self.shared.queue_depth.load(Ordering::SeqCst);
        self.shared.state.lock().snapshot(depth)
    }

    pub fn health_check(&self) -> HealthReport {
        let stats = self.stats();
        assess(&HealthInputs {
            entries: stats.cache.current_entries,
            max_entries: stats.cache.max_entries,
            size_bytes: stats.cache.memory_usage,
            max_size_bytes: stats.cache.max_memory_usage,
            avg_query_ms: stats.performance.recent_query_ms,
            hits: stats.cache.hits,
            misses: stats.cache.misses,
        })
    }

    // == Lifecycle ==
    /// Runs everything queued so far, closes the store and stops the worker.
    /// Later operations resolve to misses.
    pub async fn close(&self) {
        if self.submit(|reply| Command::Close { reply }).await.is_some() {
            info!("Durable cache closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A handle that does not keep the worker alive.
    pub fn downgrade(&self) -> WeakDurableCache {
        WeakDurableCache {
            tx: self.tx.downgrade(),
            shared: Arc::clone(&self.shared),
        }
    }
}

// == Weak Handle ==
/// Non-owning handle for background tasks. Once every
/// [`AsyncDurableCache`] is dropped the worker closes the store and
/// [`upgrade`](Self::upgrade) returns `None`.
#[derive(Clone)]
pub struct WeakDurableCache {
    tx: mpsc::WeakUnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl WeakDurableCache {
    pub fn upgrade(&self) -> Option<AsyncDurableCache> {
        let tx = self.tx.upgrade()?;
        if tx.is_closed() {
            return None;
        }
        Some(AsyncDurableCache {
            tx,
            shared: Arc::clone(&self.shared),
        })
    }
}
