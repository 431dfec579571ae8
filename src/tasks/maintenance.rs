//! Durable Maintenance Scheduler
//!
//! Queues a sweep on the durable cache every `cleanup_interval_ms` and a
//! maintenance pass once per day, on the first tick at or after the
//! configured UTC hour. Both go through the cache's operation queue, so they
//! never run alongside a foreground write.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::durable::AsyncDurableCache;

/// Whether the daily maintenance pass should run at `now`.
pub fn maintenance_due(now: DateTime<Utc>, hour: u32, last_run: Option<NaiveDate>) -> bool {
    now.hour() >= hour && last_run != Some(now.date_naive())
}

/// Spawns the sweep and daily maintenance loop for `cache`.
///
/// The task only holds a weak handle between ticks; it ends once the cache
/// is closed or every other handle is dropped.
pub fn spawn_maintenance_task(cache: AsyncDurableCache) -> JoinHandle<()> {
    let weak = cache.downgrade();
    let mut interval_ms = cache.config().cleanup_interval_ms;
    drop(cache);

    tokio::spawn(async move {
        info!("Starting durable maintenance scheduler");
        let mut last_maintenance: Option<NaiveDate> = None;

        loop {
            tokio::time::sleep(Duration::from_millis(interval_ms.max(1))).await;
            let Some(cache) = weak.upgrade() else {
                break;
            };
            let config = cache.config();
            interval_ms = config.cleanup_interval_ms;

            let report = cache.sweep().await;
            debug!("Scheduled sweep finished: {:?}", report);

            let now = Utc::now();
            if maintenance_due(now, config.maintenance_hour, last_maintenance) {
                let report = cache.maintenance().await;
                info!(
                    "Daily maintenance finished: {} entries, {} bytes",
                    report.entries, report.size_bytes
                );
                last_maintenance = Some(now.date_naive());
            }
        }

        info!("Durable maintenance scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurableConfig;
    use crate::durable::MemoryDurableStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[test]
    fn test_maintenance_due() {
        let before = Utc.with_ymd_and_hms(2024, 3, 4, 2, 59, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 3, 5, 3, 1, 0).unwrap();

        assert!(!maintenance_due(before, 3, None));
        assert!(maintenance_due(at, 3, None));
        assert!(!maintenance_due(later, 3, Some(at.date_naive())));
        assert!(maintenance_due(next_day, 3, Some(at.date_naive())));
    }

    #[tokio::test]
    async fn test_scheduler_sweeps_and_maintains() {
        let cache = AsyncDurableCache::spawn(
            Arc::new(MemoryDurableStore::new()),
            DurableConfig {
                cleanup_interval_ms: 20,
                maintenance_hour: 0,
                ..DurableConfig::default()
            },
        );
        cache.set("short", &1, Some(1)).await;

        let handle = spawn_maintenance_task(cache.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = cache.stats();
        assert!(stats.last_sweep_at.is_some());
        assert!(stats.last_maintenance_at.is_some());
        assert!(cache.keys().await.is_empty());

        cache.close().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should stop after close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_stops_when_handles_dropped() {
        let store = MemoryDurableStore::new();
        let cache = AsyncDurableCache::spawn(
            Arc::new(store.clone()),
            DurableConfig {
                cleanup_interval_ms: 10,
                ..DurableConfig::default()
            },
        );
        assert!(cache.set("k", &1, None).await);

        let handle = spawn_maintenance_task(cache.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(cache);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should stop once the cache is dropped")
            .unwrap();
        // The worker closes the store on its way out
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.is_open());
    }
}
