//! JSON payloads the pipeline answers with on its own behalf.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Maybe you should slow down?";
pub const HANDLER_TIMEOUT_MESSAGE: &str = "Request timed out";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal pipeline error";

/// `{"timeStamp", "message"}` plus the request id when one is known.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "timeStamp")]
    pub time_stamp: DateTime<Utc>,
    pub message: &'static str,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    fn now(message: &'static str, request_id: Option<String>) -> Self {
        Self {
            time_stamp: Utc::now(),
            message,
            request_id,
        }
    }
}

/// 429 with the rejection payload and a `Retry-After` in whole seconds, rounded up.
#[must_use]
pub fn rejection(retry_after: Duration) -> Response {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse::now(RATE_LIMIT_MESSAGE, None)),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

/// 504 for a handler that missed its server-side deadline.
#[must_use]
pub fn handler_timeout() -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(ErrorResponse::now(HANDLER_TIMEOUT_MESSAGE, None)),
    )
        .into_response()
}

/// 500 for a pipeline invariant violation. Carries the request id so the
/// caller can be matched against the error log.
#[must_use]
pub fn internal_error(request_id: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::now(
            INTERNAL_ERROR_MESSAGE,
            Some(request_id.to_string()),
        )),
    )
        .into_response()
}
