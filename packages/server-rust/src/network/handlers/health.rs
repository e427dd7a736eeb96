//! Health endpoint handler.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    #[serde(rename = "timeStamp")]
    pub time_stamp: DateTime<Utc>,
    pub status: &'static str,
}

/// Always returns 200 with `{"timeStamp": <RFC3339>, "status": "OK"}`.
pub async fn health_handler() -> Json<HealthResponse> {
    debug!("creating health check response");
    Json(HealthResponse {
        time_stamp: Utc::now(),
        status: "OK",
    })
}
