//! HTTP handler definitions for the broker server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod metrics;

pub use health::{health_handler, HealthResponse};
pub use metrics::metrics_handler;

use std::sync::Arc;

use crate::registry::MetricsRegistry;

/// Shared application state passed to handlers via `State` extraction.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry rendered by the metrics endpoint.
    pub metrics: Arc<MetricsRegistry>,
}
