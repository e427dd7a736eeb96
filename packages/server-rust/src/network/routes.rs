//! Route table and router assembly.
//!
//! [`ROUTES`] is the single list of served routes: the router is built from
//! the same paths and the metrics registry enumerates it at startup.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use http::Method;

use super::handlers::{health_handler, metrics_handler, AppState};
use super::middleware::build_http_layers;
use crate::pipeline::{Orchestrator, PipelineLayer};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

/// A served (method, path) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub method: Method,
    pub path: &'static str,
}

impl RouteDef {
    #[must_use]
    pub const fn new(method: Method, path: &'static str) -> Self {
        Self { method, path }
    }
}

/// Every route the server registers.
pub static ROUTES: [RouteDef; 2] = [
    RouteDef::new(Method::GET, HEALTH_PATH),
    RouteDef::new(Method::GET, METRICS_PATH),
];

/// Assembles the axum router with all routes, the request pipeline, and transport middleware.
///
/// Routes:
/// - `GET /health` -- fixed status payload
/// - `GET /metrics` -- Prometheus text exposition
pub fn build_router(state: AppState, orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .layer(PipelineLayer::new(orchestrator))
        .layer(build_http_layers())
        .with_state(state)
}
