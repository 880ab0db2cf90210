//! Route handlers for the HTTP API
//!
//! Handlers are organized by domain:
//! - [`convert`] - Conversion requests and artifact delivery
//! - [`events`] - Per-client progress event streams
//! - [`system`] - Banner, health, OpenAPI

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

mod convert;
mod events;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use convert::*;
pub use events::*;
pub use system::*;

// ============================================================================
// Query/Response Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /convert
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ConvertQuery {
    /// Source reference to convert (required, non-empty)
    pub url: Option<String>,
    /// Client id to route progress events to (generated if absent)
    pub id: Option<String>,
}

/// Query parameters for GET /events
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Client id whose events to receive (required)
    pub id: Option<String>,
}

/// Response body of GET /health
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always "ok"
    pub status: String,
    /// Crate version
    pub version: String,
    /// Jobs currently running
    pub active_jobs: usize,
    /// Push channels currently connected
    pub subscribers: usize,
}

/// Treat an empty or whitespace-only query value as absent
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
