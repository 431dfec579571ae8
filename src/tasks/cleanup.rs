//! TTL Cleanup Task
//!
//! Background task that periodically removes expired entries from the
//! synchronous tiers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::VolatileLruCache;
use crate::quota::QuotaCompressedCache;

/// A tier whose expired entries can be purged in one pass.
pub trait ExpiringTier: Send + Sync + 'static {
    fn tier_name(&self) -> &'static str;

    /// Removes expired entries and returns how many were removed.
    fn purge_expired(&mut self) -> usize;
}

impl<V> ExpiringTier for VolatileLruCache<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    fn tier_name(&self) -> &'static str {
        "memory"
    }

    fn purge_expired(&mut self) -> usize {
        self.cleanup()
    }
}

impl ExpiringTier for QuotaCompressedCache {
    fn tier_name(&self) -> &'static str {
        "quota"
    }

    fn purge_expired(&mut self) -> usize {
        self.cleanup()
    }
}

/// Spawns a background task that purges expired entries every
/// `interval_ms` milliseconds.
///
/// The returned handle is aborted on shutdown.
///
/// # Example
/// ```ignore
/// let cache = VolatileLruCache::<Value>::new(VolatileConfig::default()).into_shared();
/// let handle = spawn_cleanup_task(cache.clone(), 60_000);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task<C: ExpiringTier>(cache: Arc<RwLock<C>>, interval_ms: u64) -> JoinHandle<()> {
    let interval = Duration::from_millis(interval_ms.max(1));

    tokio::spawn(async move {
        let tier = cache.read().await.tier_name();
        info!(
            "Starting {} TTL cleanup task with interval of {}ms",
            tier, interval_ms
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = {
                let mut guard = cache.write().await;
                guard.purge_expired()
            };

            if removed > 0 {
                info!("{} TTL cleanup: removed {} expired entries", tier, removed);
            } else {
                debug!("{} TTL cleanup: no expired entries found", tier);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuotaConfig, VolatileConfig};
    use crate::quota::MemoryQuotaStorage;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let cache = VolatileLruCache::<Value>::new(VolatileConfig::default()).into_shared();
        cache.write().await.set("expire_soon", json!("value"), Some(20));
        cache.write().await.set("long_lived", json!("value"), Some(3_600_000));

        let handle = spawn_cleanup_task(cache.clone(), 30);
        tokio::time::sleep(Duration::from_millis(150)).await;

        {
            let guard = cache.read().await;
            assert_eq!(guard.keys(), vec!["long_lived".to_string()]);
            assert_eq!(guard.stats().expirations, 1);
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_purges_quota_tier() {
        let storage = Arc::new(MemoryQuotaStorage::new(64 * 1024));
        let cache = Arc::new(RwLock::new(QuotaCompressedCache::open(
            storage,
            QuotaConfig::default(),
        )));
        cache.write().await.set("short", "v", Some(20));
        cache.write().await.set("long", "v", None);

        let handle = spawn_cleanup_task(cache.clone(), 30);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.read().await.keys(), vec!["long".to_string()]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let cache = VolatileLruCache::<Value>::new(VolatileConfig::default()).into_shared();

        let handle = spawn_cleanup_task(cache, 1_000);
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
