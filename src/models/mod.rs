//! Request and Response models for the monitoring facade
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::SetRequest;
pub use responses::{
    CleanupResponse, ConfigResponse, DeleteResponse, GetResponse, HealthResponse, SetResponse,
    StatsResponse,
};
