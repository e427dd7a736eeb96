//! Request-scoped logger.

use std::time::Duration;

use axum::http::StatusCode;
use broker_core::LogFields;
use chrono::Utc;
use tracing::field::Empty;
use tracing::{info, info_span, Span};

/// Logger bound to one request: a `client_request` span carrying the
/// request's logging fields. Events emitted inside [`RequestLogger::span`]
/// (including from the downstream handler) inherit those fields.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    span: Span,
}

impl RequestLogger {
    /// Builds the logger from the request's ordered logging fields.
    #[must_use]
    pub fn new(fields: &LogFields) -> Self {
        let span = info_span!(
            "client_request",
            requestId = Empty,
            method = Empty,
            path = Empty,
            identity = Empty,
            scope = Empty,
        );
        for (name, value) in fields.iter() {
            span.record(name, value);
        }
        Self { span }
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn request_started(&self) {
        self.span.in_scope(|| {
            info!(start_time = %Utc::now().to_rfc3339(), "Request Started");
        });
    }

    pub fn request_completed(&self, elapsed: Duration, status: StatusCode) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.span.in_scope(|| {
            info!(
                elapsed_ms,
                elapsed_us,
                status = status.as_u16(),
                "Request Completed"
            );
        });
    }
}
