//! Durable cache statistics.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheStats;

/// Store queries averaged into `recent_query_ms`.
pub const RECENT_QUERY_WINDOW: usize = 50;

// == Performance ==
/// Latency and throughput of store calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub avg_query_ms: f64,
    pub avg_write_ms: f64,
    pub slowest_query_ms: f64,
    /// Mean over the last [`RECENT_QUERY_WINDOW`] queries
    pub recent_query_ms: f64,
    pub total_operations: u64,
    /// Store calls abandoned after the operation timeout
    pub timeouts: u64,
    #[serde(skip)]
    query_total_ms: f64,
    #[serde(skip)]
    queries: u64,
    #[serde(skip)]
    write_total_ms: f64,
    #[serde(skip)]
    writes: u64,
    #[serde(skip)]
    recent: VecDeque<f64>,
}

impl PerformanceStats {
    pub fn record_query(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.total_operations += 1;
        self.queries += 1;
        self.query_total_ms += ms;
        self.avg_query_ms = self.query_total_ms / self.queries as f64;
        self.slowest_query_ms = self.slowest_query_ms.max(ms);

        if self.recent.len() == RECENT_QUERY_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ms);
        self.recent_query_ms = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
    }

    pub fn record_write(&mut self, elapsed: Duration) {
        self.total_operations += 1;
        self.writes += 1;
        self.write_total_ms += elapsed.as_secs_f64() * 1000.0;
        self.avg_write_ms = self.write_total_ms / self.writes as f64;
    }

    pub fn record_timeout(&mut self) {
        self.total_operations += 1;
        self.timeouts += 1;
    }
}

// == Aggregates ==
/// Entries and bytes held for one category or symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub entries: usize,
    pub size_bytes: usize,
}

pub(crate) fn group_add(groups: &mut BTreeMap<String, GroupStats>, name: &str, size: usize) {
    let group = groups.entry(name.to_string()).or_default();
    group.entries += 1;
    group.size_bytes += size;
}

pub(crate) fn group_sub(groups: &mut BTreeMap<String, GroupStats>, name: &str, size: usize) {
    if let Some(group) = groups.get_mut(name) {
        group.entries = group.entries.saturating_sub(1);
        group.size_bytes = group.size_bytes.saturating_sub(size);
        if group.entries == 0 {
            groups.remove(name);
        }
    }
}

// == Snapshot ==
/// Snapshot reported by the durable cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableCacheStats {
    #[serde(flatten)]
    pub cache: CacheStats,
    pub performance: PerformanceStats,
    /// Successful store reopens after a failure
    pub recovery_count: u64,
    pub by_category: BTreeMap<String, GroupStats>,
    pub by_symbol: BTreeMap<String, GroupStats>,
    pub last_sweep_at: Option<u64>,
    pub last_maintenance_at: Option<u64>,
    /// Operations submitted but not yet picked up by the worker
    pub queue_depth: usize,
}

/// Counters shared between the worker and cache handles.
#[derive(Debug, Clone, Default)]
pub(crate) struct DurableState {
    pub stats: CacheStats,
    pub performance: PerformanceStats,
    pub recovery_count: u64,
    pub by_category: BTreeMap<String, GroupStats>,
    pub by_symbol: BTreeMap<String, GroupStats>,
    pub last_sweep_at: Option<u64>,
    pub last_maintenance_at: Option<u64>,
}

impl DurableState {
    pub fn snapshot(&self, queue_depth: usize) -> DurableCacheStats {
        DurableCacheStats {
            cache: self.stats.clone(),
            performance: self.performance.clone(),
            recovery_count: self.recovery_count,
            by_category: self.by_category.clone(),
            by_symbol: self.by_symbol.clone(),
            last_sweep_at: self.last_sweep_at,
            last_maintenance_at: self.last_maintenance_at,
            queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_averages() {
        let mut perf = PerformanceStats::default();
        perf.record_query(Duration::from_millis(10));
        perf.record_query(Duration::from_millis(30));
        perf.record_write(Duration::from_millis(4));
        perf.record_timeout();

        assert!((perf.avg_query_ms - 20.0).abs() < 1e-6);
        assert!((perf.slowest_query_ms - 30.0).abs() < 1e-6);
        assert!((perf.avg_write_ms - 4.0).abs() < 1e-6);
        assert_eq!(perf.total_operations, 4);
        assert_eq!(perf.timeouts, 1);
        assert!((perf.recent_query_ms - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_recent_latency_forgets_old_queries() {
        let mut perf = PerformanceStats::default();
        for _ in 0..RECENT_QUERY_WINDOW {
            perf.record_query(Duration::from_millis(900));
        }
        for _ in 0..RECENT_QUERY_WINDOW {
            perf.record_query(Duration::from_millis(2));
        }

        assert!((perf.recent_query_ms - 2.0).abs() < 1e-6);
        assert!((perf.avg_query_ms - 451.0).abs() < 1e-6);
    }

    #[test]
    fn test_group_accounting() {
        let mut groups = BTreeMap::new();
        group_add(&mut groups, "quote", 10);
        group_add(&mut groups, "quote", 5);
        group_sub(&mut groups, "quote", 10);

        assert_eq!(
            groups["quote"],
            GroupStats {
                entries: 1,
                size_bytes: 5
            }
        );

        group_sub(&mut groups, "quote", 5);
        assert!(groups.is_empty());
    }
}
