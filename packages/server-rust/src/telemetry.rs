//! Process-wide logging setup and the span export backend.

use broker_core::{FinishedSpan, SpanSink};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ExecutionMode;

/// Target of the per-span events emitted by [`TracingSpanSink`].
pub const SPAN_TARGET: &str = "broker::span";

/// Logging setup failures.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the mode's default filter applies.
/// Production writes one JSON object per line with the current span's
/// fields attached, development writes multi-line human-readable output.
///
/// # Errors
///
/// Fails if the filter does not parse or a global subscriber is already installed.
pub fn init_tracing(mode: ExecutionMode) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(mode.default_log_filter())?,
    };
    let subscriber = tracing_subscriber::registry().with(filter);

    match mode {
        ExecutionMode::Production => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init()?,
        ExecutionMode::Development => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
    }
    Ok(())
}

/// Exports finished request spans as `debug` events under [`SPAN_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSpanSink;

impl SpanSink for TracingSpanSink {
    fn export(&self, request_id: &str, spans: Vec<FinishedSpan>) {
        for span in spans {
            debug!(
                target: SPAN_TARGET,
                request_id,
                span_id = span.handle.id(),
                parent_id = span.parent.map(broker_core::SpanHandle::id),
                name = %span.name,
                duration_us = u64::try_from(span.duration().as_micros()).unwrap_or(u64::MAX),
                tags = ?span.tags,
                "span finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use broker_core::SpanTracker;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn finished_spans() -> Vec<FinishedSpan> {
        let mut tracker = SpanTracker::new();
        let root = tracker.start("/health");
        tracker.in_span("resolveUser", || ()).unwrap();
        tracker.tag(root, "status", "200").unwrap();
        tracker.finish(root).unwrap();
        tracker.drain_finished()
    }

    #[test]
    fn sink_emits_one_event_per_span() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = fmt::Subscriber::builder()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            TracingSpanSink.export("req-1", finished_spans());
        });

        let text = captured.text();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l["target"] == SPAN_TARGET));
        assert_eq!(lines[0]["fields"]["name"], "resolveUser");
        assert_eq!(lines[1]["fields"]["name"], "/health");
        assert_eq!(lines[1]["fields"]["request_id"], "req-1");
        assert!(lines[1]["fields"]["tags"]
            .as_str()
            .unwrap()
            .contains("\"status\": \"200\""));
    }

    #[test]
    fn sink_is_silent_above_debug() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = fmt::Subscriber::builder()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            TracingSpanSink.export("req-1", finished_spans());
        });

        assert!(captured.text().is_empty());
    }

    #[test]
    fn bad_filter_is_reported() {
        let err = EnvFilter::try_new("broker=notalevel").unwrap_err();
        assert!(TelemetryError::from(err).to_string().starts_with("invalid log filter"));
    }
}
