//! Cache Module
//!
//! Tier 1: volatile in-process cache with TTL expiration, byte accounting and
//! O(1) LRU eviction. Also hosts the pieces shared by every tier: entries,
//! the normalized statistics snapshot and the clock.

pub mod clock;
mod entry;
pub mod events;
mod lru;
pub mod size;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entry::CacheEntry;
pub use events::{EvictionEvent, EvictionListener, EvictionReason, ListenerId};
pub use lru::LruList;
pub use stats::CacheStats;
pub use store::VolatileLruCache;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
