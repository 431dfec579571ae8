//! Health assessment of the durable cache.

use serde::Serialize;

/// Lookups needed before a low hit ratio is reported.
pub const MIN_LOOKUPS_FOR_HIT_RATIO: u64 = 20;

const USAGE_ERROR: f64 = 0.95;
const USAGE_WARNING: f64 = 0.8;
const QUERY_ERROR_MS: f64 = 1000.0;
const QUERY_WARNING_MS: f64 = 200.0;
const HIT_RATIO_WARNING: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Larger of entry usage and byte usage against their limits
    pub usage_ratio: f64,
    pub avg_query_ms: f64,
    /// hits / lookups in 0..=1
    pub hit_ratio: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Signals a report is derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
    pub entries: usize,
    pub max_entries: usize,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
    /// Mean latency of recent store queries
    pub avg_query_ms: f64,
    pub hits: u64,
    pub misses: u64,
}

fn ratio(used: usize, limit: usize) -> f64 {
    if limit == 0 {
        if used == 0 {
            0.0
        } else {
            1.0
        }
    } else {
        used as f64 / limit as f64
    }
}

pub fn assess(inputs: &HealthInputs) -> HealthReport {
    let usage_ratio = ratio(inputs.entries, inputs.max_entries)
        .max(ratio(inputs.size_bytes, inputs.max_size_bytes));
    let lookups = inputs.hits + inputs.misses;
    let hit_ratio = if lookups == 0 {
        0.0
    } else {
        inputs.hits as f64 / lookups as f64
    };

    let mut status = HealthStatus::Healthy;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if usage_ratio > USAGE_ERROR {
        status = status.max(HealthStatus::Error);
        issues.push(format!("storage nearly full ({:.0}% used)", usage_ratio * 100.0));
        recommendations.push("Run a sweep or raise the entry and byte limits".to_string());
    } else if usage_ratio > USAGE_WARNING {
        status = status.max(HealthStatus::Warning);
        issues.push(format!("storage usage high ({:.0}% used)", usage_ratio * 100.0));
        recommendations.push("Shorten TTLs for bulky categories".to_string());
    }

    if inputs.avg_query_ms > QUERY_ERROR_MS {
        status = status.max(HealthStatus::Error);
        issues.push(format!("queries very slow ({:.0} ms average)", inputs.avg_query_ms));
        recommendations.push("Run maintenance to compact the store".to_string());
    } else if inputs.avg_query_ms > QUERY_WARNING_MS {
        status = status.max(HealthStatus::Warning);
        issues.push(format!("queries slow ({:.0} ms average)", inputs.avg_query_ms));
        recommendations.push("Reduce the number of stored entries".to_string());
    }

    if lookups >= MIN_LOOKUPS_FOR_HIT_RATIO && hit_ratio < HIT_RATIO_WARNING {
        status = status.max(HealthStatus::Warning);
        issues.push(format!("low hit ratio ({:.0}%)", hit_ratio * 100.0));
        recommendations.push("Lengthen TTLs or pre-warm frequently used symbols".to_string());
    }

    HealthReport {
        status,
        usage_ratio,
        avg_query_ms: inputs.avg_query_ms,
        hit_ratio,
        issues,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> HealthInputs {
        HealthInputs {
            entries: 10,
            max_entries: 100,
            size_bytes: 1_000,
            max_size_bytes: 100_000,
            avg_query_ms: 5.0,
            hits: 0,
            misses: 0,
        }
    }

    #[test]
    fn test_healthy() {
        let report = assess(&inputs());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
        assert!((report.usage_ratio - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_usage_thresholds() {
        let warn = assess(&HealthInputs {
            entries: 85,
            ..inputs()
        });
        assert_eq!(warn.status, HealthStatus::Warning);

        let error = assess(&HealthInputs {
            size_bytes: 99_000,
            ..inputs()
        });
        assert_eq!(error.status, HealthStatus::Error);
        assert_eq!(error.recommendations.len(), 1);
    }

    #[test]
    fn test_latency_thresholds() {
        let warn = assess(&HealthInputs {
            avg_query_ms: 250.0,
            ..inputs()
        });
        assert_eq!(warn.status, HealthStatus::Warning);

        let error = assess(&HealthInputs {
            avg_query_ms: 1500.0,
            ..inputs()
        });
        assert_eq!(error.status, HealthStatus::Error);
    }

    #[test]
    fn test_hit_ratio_needs_enough_lookups() {
        let few = assess(&HealthInputs {
            hits: 1,
            misses: 9,
            ..inputs()
        });
        assert_eq!(few.status, HealthStatus::Healthy);

        let many = assess(&HealthInputs {
            hits: 2,
            misses: 18,
            ..inputs()
        });
        assert_eq!(many.status, HealthStatus::Warning);
        assert!((many.hit_ratio - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_worst_signal_wins() {
        let report = assess(&HealthInputs {
            entries: 90,
            avg_query_ms: 2000.0,
            ..inputs()
        });
        assert_eq!(report.status, HealthStatus::Error);
        assert_eq!(report.issues.len(), 2);
    }
}
