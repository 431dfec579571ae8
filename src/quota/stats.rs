//! Quota cache statistics.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// Snapshot reported by the quota-bound cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCacheStats {
    #[serde(flatten)]
    pub cache: CacheStats,
    /// Mean `compressed / original` over compressed writes, 1.0 when none
    pub compression_ratio: f64,
    /// Live entries stored in transformed form
    pub compressed_entries: usize,
    /// Actual medium usage over its quota, in percent
    pub quota_usage_percent: f64,
    pub quota_bytes: usize,
    pub medium_used_bytes: usize,
}

/// Aggregate statistics kept in the medium under a reserved key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PersistedStats {
    pub stats: CacheStats,
    pub ratio_sum: f64,
    pub ratio_samples: u64,
}

impl PersistedStats {
    pub fn compression_ratio(&self) -> f64 {
        if self.ratio_samples == 0 {
            1.0
        } else {
            self.ratio_sum / self.ratio_samples as f64
        }
    }

    pub fn record_ratio(&mut self, ratio: f64) {
        self.ratio_sum += ratio;
        self.ratio_samples += 1;
    }
}
