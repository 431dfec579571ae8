//! Quota Module
//!
//! Tier 2 cache over a quota-limited medium shared with other consumers.

pub mod codec;
mod record;
mod stats;
mod storage;
mod store;

#[cfg(test)]
mod property_tests;

pub use codec::CompressionAlgorithm;
pub use record::StoredRecord;
pub use stats::QuotaCacheStats;
pub use storage::{FileQuotaStorage, MemoryQuotaStorage, QuotaStorage};
pub use store::QuotaCompressedCache;
