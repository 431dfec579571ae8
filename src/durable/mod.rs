//! Durable Module
//!
//! Tier 3 cache over an asynchronous store, driven through a single-worker
//! operation queue with background sweeps and daily maintenance.

mod backend;
mod cache;
mod fs;
pub mod health;
mod record;
mod stats;
mod worker;

pub use backend::{DurableStore, MemoryDurableStore, ScanItem};
pub use cache::{AsyncDurableCache, WeakDurableCache};
pub use fs::FsDurableStore;
pub use health::{HealthReport, HealthStatus};
pub use record::{classify_key, CorruptRecord, DurableRecord};
pub use stats::{DurableCacheStats, GroupStats, PerformanceStats};
pub use worker::{MaintenanceReport, SweepReport};
