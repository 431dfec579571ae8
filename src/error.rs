//! Error types for the tiered cache
//!
//! Provides unified error handling using thiserror. Tier-internal failures are
//! expressed with [`CacheError`] and recorded in statistics; the public cache
//! contracts translate them into misses or `false` results.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache tiers and the monitoring facade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Write cannot fit even after maximal eviction
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// The backing medium refused a write because its quota is exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Value could not be sized or encoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Stored payload could not be decompressed or parsed
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Backing store failed to read or write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Backing store is not open or could not be opened
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Store operation did not settle within the configured timeout
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Cache has been closed
    #[error("Cache closed")]
    Closed,

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) | CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
            CacheError::CacheFull(_) | CacheError::QuotaExceeded(_) => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            CacheError::Unavailable(_) | CacheError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Decode(_) | CacheError::Storage(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache tiers.
pub type Result<T> = std::result::Result<T, CacheError>;
