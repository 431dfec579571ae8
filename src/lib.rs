//! Tiered Cache - layered caching for market-data style workloads
//!
//! Three interchangeable tiers with a uniform contract:
//! - [`cache::VolatileLruCache`]: in-process, TTL + O(1) LRU eviction
//! - [`quota::QuotaCompressedCache`]: compressed entries on a quota-bound medium
//! - [`durable::AsyncDurableCache`]: asynchronous store with health and maintenance
//!
//! An HTTP facade ([`api`]) exposes statistics and maintenance operations.

pub mod api;
pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod models;
pub mod quota;
pub mod tasks;

pub use api::AppState;
pub use cache::VolatileLruCache;
pub use config::Config;
pub use durable::AsyncDurableCache;
pub use error::{CacheError, Result};
pub use quota::QuotaCompressedCache;
pub use tasks::{spawn_cleanup_task, spawn_maintenance_task};
