//! API Handlers
//!
//! HTTP request handlers for the monitoring facade. Key operations target the
//! memory tier; statistics and maintenance cover all three tiers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::{CacheStats, VolatileLruCache};
use crate::config::{Config, VolatileConfigUpdate};
use crate::durable::{AsyncDurableCache, DurableCacheStats, FsDurableStore, MemoryDurableStore};
use crate::error::{CacheError, Result};
use crate::models::{
    CleanupResponse, ConfigResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest,
    SetResponse, StatsResponse,
};
use crate::quota::{FileQuotaStorage, MemoryQuotaStorage, QuotaCacheStats, QuotaCompressedCache};

/// File holding the quota medium inside the data directory.
pub const QUOTA_FILE: &str = "quota.json";
/// Directory holding durable records inside the data directory.
pub const DURABLE_DIR: &str = "durable";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<RwLock<VolatileLruCache<Value>>>,
    pub quota: Arc<RwLock<QuotaCompressedCache>>,
    pub durable: AsyncDurableCache,
}

impl AppState {
    pub fn new(
        memory: VolatileLruCache<Value>,
        quota: QuotaCompressedCache,
        durable: AsyncDurableCache,
    ) -> Self {
        Self {
            memory: memory.into_shared(),
            quota: Arc::new(RwLock::new(quota)),
            durable,
        }
    }

    /// Builds the tiers on disk under `config.data_dir`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = FileQuotaStorage::open(config.data_dir.join(QUOTA_FILE), config.quota_bytes)?;
        let store = FsDurableStore::new(config.data_dir.join(DURABLE_DIR));

        Ok(Self::new(
            VolatileLruCache::new(config.memory.clone()),
            QuotaCompressedCache::open(Arc::new(storage), config.quota.clone()),
            AsyncDurableCache::spawn(Arc::new(store), config.durable.clone()),
        ))
    }

    /// Builds the tiers over in-process media.
    pub fn in_memory(config: &Config) -> Self {
        Self::new(
            VolatileLruCache::new(config.memory.clone()),
            QuotaCompressedCache::open(
                Arc::new(MemoryQuotaStorage::new(config.quota_bytes)),
                config.quota.clone(),
            ),
            AsyncDurableCache::spawn(Arc::new(MemoryDurableStore::new()), config.durable.clone()),
        )
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value in the memory tier with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let mut cache = state.memory.write().await;
    if !cache.set(req.key.clone(), req.value, req.ttl_ms) {
        return Err(CacheError::CacheFull(format!(
            "value for '{}' does not fit in the memory tier",
            req.key
        )));
    }

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    // Write lock: a read promotes the entry and updates stats
    let mut cache = state.memory.write().await;
    let value = cache
        .get(&key)
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let mut cache = state.memory.write().await;
    if !cache.remove(&key) {
        return Err(CacheError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let memory = state.memory.read().await.stats();
    let quota = state.quota.read().await.stats();

    Json(StatsResponse {
        memory,
        quota,
        durable: state.durable.stats(),
    })
}

/// Handler for GET /stats/memory
pub async fn memory_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.memory.read().await.stats())
}

/// Handler for GET /stats/quota
pub async fn quota_stats_handler(State(state): State<AppState>) -> Json<QuotaCacheStats> {
    Json(state.quota.read().await.stats())
}

/// Handler for GET /stats/durable
pub async fn durable_stats_handler(State(state): State<AppState>) -> Json<DurableCacheStats> {
    Json(state.durable.stats())
}

/// Handler for PATCH /config/memory
///
/// Applies a partial config change; lowered limits evict immediately.
pub async fn update_memory_config_handler(
    State(state): State<AppState>,
    Json(update): Json<VolatileConfigUpdate>,
) -> Result<Json<ConfigResponse>> {
    if update.max_entries == Some(0) || update.max_memory_bytes == Some(0) {
        return Err(CacheError::InvalidRequest(
            "limits must be positive".to_string(),
        ));
    }

    let mut cache = state.memory.write().await;
    let evicted = cache.update_config(&update);
    info!("Memory tier reconfigured, {} entries evicted", evicted);

    Ok(Json(ConfigResponse {
        config: cache.config().clone(),
        evicted,
    }))
}

/// Handler for POST /maintenance/cleanup
///
/// Runs an expiry pass on every tier right away.
pub async fn cleanup_handler(State(state): State<AppState>) -> Json<CleanupResponse> {
    let memory = state.memory.write().await.cleanup();
    let quota = state.quota.write().await.cleanup();
    let durable = state.durable.sweep().await;

    Json(CleanupResponse {
        memory,
        quota,
        durable,
    })
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_report(state.durable.health_check()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_state() -> AppState {
        AppState::in_memory(&Config::default())
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let state = test_state();

        let req = SetRequest {
            key: "quote:AAPL".to_string(),
            value: json!({"price": 189.2}),
            ttl_ms: None,
        };
        assert!(set_handler(State(state.clone()), Json(req)).await.is_ok());

        let response = get_handler(State(state), Path("quote:AAPL".to_string()))
            .await
            .unwrap();
        assert_eq!(response.value, json!({"price": 189.2}));
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let result = get_handler(State(test_state()), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = test_state();
        let req = SetRequest {
            key: "to_delete".to_string(),
            value: json!("value"),
            ttl_ms: None,
        };
        set_handler(State(state.clone()), Json(req)).await.unwrap();

        assert!(delete_handler(State(state.clone()), Path("to_delete".to_string()))
            .await
            .is_ok());
        assert!(delete_handler(State(state), Path("to_delete".to_string()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_set_rejected_when_too_large() {
        let mut config = Config::default();
        config.memory.max_memory_bytes = 16;
        let state = AppState::in_memory(&config);

        let req = SetRequest {
            key: "big".to_string(),
            value: json!("x".repeat(64)),
            ttl_ms: None,
        };
        let result = set_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::CacheFull(_))));
    }

    #[tokio::test]
    async fn test_update_memory_config_handler() {
        let state = test_state();
        for key in ["a", "b", "c"] {
            state.memory.write().await.set(key, json!(key), None);
        }

        let update = VolatileConfigUpdate {
            max_entries: Some(1),
            ..Default::default()
        };
        let response = update_memory_config_handler(State(state.clone()), Json(update))
            .await
            .unwrap();

        assert_eq!(response.evicted, 2);
        assert_eq!(response.config.max_entries, 1);
        assert_eq!(state.memory.read().await.keys(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let state = test_state();
        state.quota.write().await.set("quote:X", &1, None);

        let response = stats_handler(State(state)).await;
        assert_eq!(response.memory.hits, 0);
        assert_eq!(response.quota.cache.current_entries, 1);
        assert_eq!(response.durable.cache.current_entries, 0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler(State(test_state())).await;
        assert_eq!(response.status, "healthy");
    }
}
