//! Prometheus exposition endpoint.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::AppState;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        state.metrics.render(),
    )
}
