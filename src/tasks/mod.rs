//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired entries from the memory and quota tiers
//! - Maintenance: Queues durable sweeps and the daily maintenance pass

mod cleanup;
mod maintenance;

pub use cleanup::{spawn_cleanup_task, ExpiringTier};
pub use maintenance::{maintenance_due, spawn_maintenance_task};
