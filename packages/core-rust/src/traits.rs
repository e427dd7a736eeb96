use crate::span::FinishedSpan;

/// Receiver for a request's finished spans (the tracing backend).
///
/// Called once per request with every span the request finished, in finish
/// order. Implementations must not block; delivery is best-effort and has
/// no influence on the response.
pub trait SpanSink: Send + Sync {
    fn export(&self, request_id: &str, spans: Vec<FinishedSpan>);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSpanSink;

impl SpanSink for NullSpanSink {
    fn export(&self, _request_id: &str, _spans: Vec<FinishedSpan>) {}
}
