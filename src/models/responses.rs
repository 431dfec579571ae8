//! Response DTOs for the monitoring facade
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheStats;
use crate::config::VolatileConfig;
use crate::durable::{DurableCacheStats, HealthReport, SweepReport};
use crate::quota::QuotaCacheStats;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for GET /stats: one snapshot per tier.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub memory: CacheStats,
    pub quota: QuotaCacheStats,
    pub durable: DurableCacheStats,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy`, `warning` or `error`, from the durable tier's assessment
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    pub durable: HealthReport,
}

impl HealthResponse {
    pub fn from_report(report: HealthReport) -> Self {
        Self {
            status: report.status.as_str().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            durable: report,
        }
    }
}

/// Response body for PATCH /config/memory
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    pub config: VolatileConfig,
    /// Entries evicted to honour lowered limits
    pub evicted: usize,
}

/// Response body for POST /maintenance/cleanup
#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    /// Expired entries removed from the memory tier
    pub memory: usize,
    /// Expired entries removed from the quota tier
    pub quota: usize,
    pub durable: SweepReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::HealthStatus;
    use serde_json::json;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("quote:AAPL", json!({"price": 1.5}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["key"], "quote:AAPL");
        assert_eq!(json["value"]["price"], 1.5);
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_delete_response_serialize() {
        let resp = DeleteResponse::new("deleted_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("deleted_key"));
        assert!(json.contains("deleted"));
    }

    #[test]
    fn test_health_response_status() {
        let report = HealthReport {
            status: HealthStatus::Warning,
            usage_ratio: 0.85,
            avg_query_ms: 3.0,
            hit_ratio: 0.9,
            issues: vec!["storage usage high (85% used)".to_string()],
            recommendations: vec![],
        };
        let resp = HealthResponse::from_report(report);
        assert_eq!(resp.status, "warning");

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["durable"]["usageRatio"], 0.85);
    }
}
