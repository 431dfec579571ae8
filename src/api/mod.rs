//! API Module
//!
//! HTTP handlers and routing for the monitoring facade.
//!
//! # Endpoints
//! - `GET /health` - Health assessment
//! - `GET /stats` - Statistics of every tier
//! - `GET /stats/memory`, `/stats/quota`, `/stats/durable` - One tier's statistics
//! - `PUT /set` - Store a key-value pair in the memory tier
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `PATCH /config/memory` - Reconfigure the memory tier
//! - `POST /maintenance/cleanup` - Expire stale entries on every tier

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
