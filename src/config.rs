//! Configuration Module
//!
//! Handles loading and managing configuration from environment variables.
//! Each tier owns an independently mutable config struct; the `*Update`
//! structs carry partial changes applied at runtime.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::quota::CompressionAlgorithm;

const MIB: usize = 1024 * 1024;

// == Tier 1 ==
/// Limits for the volatile in-process cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatileConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Byte budget over the sum of entry sizes
    pub max_memory_bytes: usize,
    /// TTL applied when `set` is called without one
    pub default_ttl_ms: u64,
    /// Period of the background expiry sweep
    pub cleanup_interval_ms: u64,
}

impl Default for VolatileConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: 50 * MIB,
            default_ttl_ms: 300_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Partial update for [`VolatileConfig`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatileConfigUpdate {
    pub max_entries: Option<usize>,
    pub max_memory_bytes: Option<usize>,
    pub default_ttl_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
}

impl VolatileConfigUpdate {
    pub fn apply(&self, config: &mut VolatileConfig) {
        if let Some(v) = self.max_entries {
            config.max_entries = v;
        }
        if let Some(v) = self.max_memory_bytes {
            config.max_memory_bytes = v;
        }
        if let Some(v) = self.default_ttl_ms {
            config.default_ttl_ms = v;
        }
        if let Some(v) = self.cleanup_interval_ms {
            config.cleanup_interval_ms = v;
        }
    }
}

// == Tier 2 ==
/// Limits and compression knobs for the quota-bound cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfig {
    pub max_entries: usize,
    /// Budget over this cache's own records (the medium quota is separate)
    pub max_memory_bytes: usize,
    pub default_ttl_ms: u64,
    pub cleanup_interval_ms: u64,
    pub compression_enabled: bool,
    /// Serialized payloads at or above this size are offered to the codec
    pub compression_threshold_bytes: usize,
    pub compression_algorithm: CompressionAlgorithm,
    /// Medium usage fraction above which eviction runs before a write
    pub eviction_trigger_ratio: f64,
    /// Fraction of the quota freed by a proactive eviction pass
    pub eviction_target_ratio: f64,
    /// Namespace for keys owned by this cache in the shared medium
    pub key_prefix: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_memory_bytes: 4 * MIB,
            default_ttl_ms: 3_600_000,
            cleanup_interval_ms: 300_000,
            compression_enabled: true,
            compression_threshold_bytes: 1024,
            compression_algorithm: CompressionAlgorithm::Dictionary,
            eviction_trigger_ratio: 0.9,
            eviction_target_ratio: 0.2,
            key_prefix: "tc:".to_string(),
        }
    }
}

/// Partial update for [`QuotaConfig`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfigUpdate {
    pub max_entries: Option<usize>,
    pub max_memory_bytes: Option<usize>,
    pub default_ttl_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
    pub compression_enabled: Option<bool>,
    pub compression_threshold_bytes: Option<usize>,
    pub compression_algorithm: Option<CompressionAlgorithm>,
}

impl QuotaConfigUpdate {
    pub fn apply(&self, config: &mut QuotaConfig) {
        if let Some(v) = self.max_entries {
            config.max_entries = v;
        }
        if let Some(v) = self.max_memory_bytes {
            config.max_memory_bytes = v;
        }
        if let Some(v) = self.default_ttl_ms {
            config.default_ttl_ms = v;
        }
        if let Some(v) = self.cleanup_interval_ms {
            config.cleanup_interval_ms = v;
        }
        if let Some(v) = self.compression_enabled {
            config.compression_enabled = v;
        }
        if let Some(v) = self.compression_threshold_bytes {
            config.compression_threshold_bytes = v;
        }
        if let Some(v) = self.compression_algorithm {
            config.compression_algorithm = v;
        }
    }
}

// == Tier 3 ==
/// Limits, timeouts and maintenance schedule for the durable cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub default_ttl_ms: u64,
    /// Period of the background sweep
    pub cleanup_interval_ms: u64,
    /// Upper bound on a single store call
    pub operation_timeout_ms: u64,
    /// Records examined per LRU sweep batch
    pub sweep_batch_size: usize,
    /// An LRU sweep frees `required * sweep_safety_margin` bytes
    pub sweep_safety_margin: f64,
    /// Hour of day (UTC, 0-23) for the daily maintenance pass
    pub maintenance_hour: u32,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_bytes: 100 * MIB,
            default_ttl_ms: 86_400_000,
            cleanup_interval_ms: 60_000,
            operation_timeout_ms: 10_000,
            sweep_batch_size: 100,
            sweep_safety_margin: 1.2,
            maintenance_hour: 3,
        }
    }
}

/// Partial update for [`DurableConfig`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableConfigUpdate {
    pub max_entries: Option<usize>,
    pub max_memory_bytes: Option<usize>,
    pub default_ttl_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
    pub operation_timeout_ms: Option<u64>,
    pub maintenance_hour: Option<u32>,
}

impl DurableConfigUpdate {
    pub fn apply(&self, config: &mut DurableConfig) {
        if let Some(v) = self.max_entries {
            config.max_entries = v;
        }
        if let Some(v) = self.max_memory_bytes {
            config.max_memory_bytes = v;
        }
        if let Some(v) = self.default_ttl_ms {
            config.default_ttl_ms = v;
        }
        if let Some(v) = self.cleanup_interval_ms {
            config.cleanup_interval_ms = v;
        }
        if let Some(v) = self.operation_timeout_ms {
            config.operation_timeout_ms = v;
        }
        if let Some(v) = self.maintenance_hour {
            config.maintenance_hour = v.min(23);
        }
    }
}

// == Process Config ==
/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port of the monitoring facade
    pub server_port: u16,
    /// Directory holding the quota medium file and the durable store
    pub data_dir: PathBuf,
    /// Quota of the shared persistent medium in bytes
    pub quota_bytes: usize,
    pub memory: VolatileConfig,
    pub quota: QuotaConfig,
    pub durable: DurableConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `DATA_DIR` - persistent data directory (default: ./data)
    /// - `MEMORY_MAX_ENTRIES`, `MEMORY_MAX_BYTES`, `MEMORY_DEFAULT_TTL_MS`
    /// - `CLEANUP_INTERVAL_MS` - Tier 1 sweep period (default: 60000)
    /// - `QUOTA_BYTES` - medium quota (default: 5 MiB)
    /// - `QUOTA_MAX_ENTRIES`, `QUOTA_COMPRESSION` (`none` | `dictionary` | `lz4`)
    /// - `DURABLE_MAX_ENTRIES`, `DURABLE_MAX_BYTES`, `DURABLE_TIMEOUT_MS`
    /// - `MAINTENANCE_HOUR` - UTC hour of the daily durable maintenance (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut memory = defaults.memory;
        memory.max_entries = env_or("MEMORY_MAX_ENTRIES", memory.max_entries);
        memory.max_memory_bytes = env_or("MEMORY_MAX_BYTES", memory.max_memory_bytes);
        memory.default_ttl_ms = env_or("MEMORY_DEFAULT_TTL_MS", memory.default_ttl_ms);
        memory.cleanup_interval_ms = env_or("CLEANUP_INTERVAL_MS", memory.cleanup_interval_ms);

        let mut quota = defaults.quota;
        quota.max_entries = env_or("QUOTA_MAX_ENTRIES", quota.max_entries);
        match env::var("QUOTA_COMPRESSION").ok().as_deref() {
            Some("none") => quota.compression_enabled = false,
            Some(other) => {
                if let Ok(algorithm) = other.parse() {
                    quota.compression_algorithm = algorithm;
                }
            }
            None => {}
        }

        let mut durable = defaults.durable;
        durable.max_entries = env_or("DURABLE_MAX_ENTRIES", durable.max_entries);
        durable.max_memory_bytes = env_or("DURABLE_MAX_BYTES", durable.max_memory_bytes);
        durable.operation_timeout_ms = env_or("DURABLE_TIMEOUT_MS", durable.operation_timeout_ms);
        durable.maintenance_hour = env_or("MAINTENANCE_HOUR", durable.maintenance_hour).min(23);

        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            quota_bytes: env_or("QUOTA_BYTES", defaults.quota_bytes),
            memory,
            quota,
            durable,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            data_dir: PathBuf::from("./data"),
            quota_bytes: 5 * MIB,
            memory: VolatileConfig::default(),
            quota: QuotaConfig::default(),
            durable: DurableConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.quota_bytes, 5 * MIB);
        assert_eq!(config.memory.max_entries, 1000);
        assert_eq!(config.durable.operation_timeout_ms, 10_000);
        assert!(config.quota.compression_enabled);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("SERVER_PORT");
        env::remove_var("MEMORY_MAX_ENTRIES");
        env::remove_var("QUOTA_COMPRESSION");
        env::remove_var("DURABLE_TIMEOUT_MS");

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.memory.max_entries, 1000);
        assert_eq!(config.durable.operation_timeout_ms, 10_000);
        assert_eq!(
            config.quota.compression_algorithm,
            CompressionAlgorithm::Dictionary
        );
    }

    #[test]
    fn test_volatile_update_applies_only_present_fields() {
        let mut config = VolatileConfig::default();
        let update = VolatileConfigUpdate {
            max_entries: Some(1),
            ..Default::default()
        };
        update.apply(&mut config);

        assert_eq!(config.max_entries, 1);
        assert_eq!(config.default_ttl_ms, VolatileConfig::default().default_ttl_ms);
    }

    #[test]
    fn test_update_deserializes_camel_case() {
        let update: VolatileConfigUpdate =
            serde_json::from_str(r#"{"maxEntries": 5, "defaultTtlMs": 10}"#).unwrap();
        assert_eq!(update.max_entries, Some(5));
        assert_eq!(update.default_ttl_ms, Some(10));
        assert_eq!(update.max_memory_bytes, None);
    }

    #[test]
    fn test_durable_maintenance_hour_is_clamped() {
        let mut config = DurableConfig::default();
        DurableConfigUpdate {
            maintenance_hour: Some(99),
            ..Default::default()
        }
        .apply(&mut config);
        assert_eq!(config.maintenance_hour, 23);
    }
}
