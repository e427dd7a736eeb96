//! Per-request pipeline.
//!
//! [`Orchestrator`] runs the fixed stage sequence for every request that
//! reaches it; [`PipelineLayer`] mounts it in front of the router's handlers.
//!
//! Stage order:
//! 1. admission control (rejections answer 429 and skip every later stage)
//! 2. root span named after the request path
//! 3. identity resolution (`resolveUser` span)
//! 4. request-scoped logger (`createLogger` span)
//! 5. "Request Started" log line (`infoLog` span)
//! 6. downstream handler, under the request deadline
//! 7. processed-requests counter
//! 8. per-route counter and duration histograms
//! 9. "Request Completed" log line
//! 10. root span tags
//! 11. root span finish
//!
//! Steps 7 to 11 run whatever status the handler produced, including a
//! missed deadline.

pub mod logger;
pub mod response;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use broker_core::metric_key::{
    HTTP_REQUEST_COUNT, HTTP_REQUEST_DURATION_MICRO, HTTP_REQUEST_DURATION_MS,
    PROCESSED_OPS_TOTAL, REQUESTS_REJECTED_TOTAL,
};
use broker_core::{
    Admission, AdmissionControl, ContextError, IdentityResolver, RequestContext, SpanError,
    SpanSink,
};
use tower::{Layer, Service, ServiceExt};
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use crate::registry::MetricsRegistry;
use crate::telemetry::TracingSpanSink;

pub use logger::RequestLogger;

/// Header carrying the request identifier in both directions.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Client key used when the peer address is not available.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const RESOLVE_USER_SPAN: &str = "resolveUser";
pub const CREATE_LOGGER_SPAN: &str = "createLogger";
pub const INFO_LOG_SPAN: &str = "infoLog";

/// Root span tag names.
pub mod tags {
    pub const IDENTITY: &str = "identity";
    pub const REQUEST_ID: &str = "requestId";
    pub const METHOD: &str = "method";
    pub const PATH: &str = "path";
    pub const STATUS: &str = "status";
}

/// Internal invariant violations. These are wiring bugs, never user errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("span stack misuse: {0}")]
    Span(#[from] SpanError),

    #[error("request context misuse: {0}")]
    Context(#[from] ContextError),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns the process-wide pipeline state and runs the stages for each request.
pub struct Orchestrator {
    identities: IdentityResolver,
    metrics: Arc<MetricsRegistry>,
    admission: Arc<dyn AdmissionControl>,
    span_sink: Arc<dyn SpanSink>,
    handler_timeout: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("identities", &self.identities)
            .field("metrics", &self.metrics)
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that exports spans through [`TracingSpanSink`]
    /// and gives handlers 30 seconds.
    #[must_use]
    pub fn new(
        identities: IdentityResolver,
        metrics: Arc<MetricsRegistry>,
        admission: Arc<dyn AdmissionControl>,
    ) -> Self {
        Self {
            identities,
            metrics,
            admission,
            span_sink: Arc::new(TracingSpanSink),
            handler_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_span_sink(mut self, span_sink: Arc<dyn SpanSink>) -> Self {
        self.span_sink = span_sink;
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    #[must_use]
    pub fn identities(&self) -> &IdentityResolver {
        &self.identities
    }

    /// Runs the full pipeline for `req`, invoking `handler` at stage 6.
    pub async fn handle<S>(&self, req: Request, handler: S) -> Response
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send,
        S::Future: Send,
    {
        let request_id = request_id_of(&req);
        let client_key = client_key_of(&req);

        if let Admission::Rejected { retry_after } = self.admission.check(&client_key) {
            self.metrics.increment(REQUESTS_REJECTED_TOTAL);
            warn!(
                request_id = %request_id,
                client = %client_key,
                method = %req.method(),
                path = req.uri().path(),
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "request rejected by admission control"
            );
            return with_request_id(response::rejection(retry_after), &request_id);
        }

        let mut ctx = RequestContext::new(
            request_id,
            req.method().as_str(),
            req.uri().path(),
            client_key,
        );
        let outcome = self.run_stages(&mut ctx, req, handler).await;

        let unwound = ctx.spans.unwind();
        if unwound > 0 {
            error!(
                request_id = %ctx.request_id,
                unwound,
                "request pipeline left spans open"
            );
        }
        self.span_sink
            .export(&ctx.request_id, ctx.spans.drain_finished());

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                error!(
                    request_id = %ctx.request_id,
                    method = %ctx.method,
                    path = %ctx.path,
                    error = %err,
                    "request pipeline invariant violated"
                );
                response::internal_error(&ctx.request_id)
            }
        };
        with_request_id(response, &ctx.request_id)
    }

    async fn run_stages<S>(
        &self,
        ctx: &mut RequestContext,
        req: Request,
        handler: S,
    ) -> Result<Response, PipelineError>
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send,
        S::Future: Send,
    {
        let root = ctx.spans.start(ctx.path.clone());

        let identities = &self.identities;
        let client_key = &ctx.client_key;
        let identity = ctx
            .spans
            .in_span(RESOLVE_USER_SPAN, || identities.resolve(client_key))?;

        ctx.set_identity(identity.as_str())?;
        let log_fields = &ctx.fields;
        let logger = ctx
            .spans
            .in_span(CREATE_LOGGER_SPAN, || RequestLogger::new(log_fields))?;

        let started = Instant::now();
        ctx.spans
            .in_span(INFO_LOG_SPAN, || logger.request_started())?;

        let call = handler.oneshot(req).instrument(logger.span().clone());
        let response = match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(never)) => match never {},
            Err(_) => {
                logger.span().in_scope(|| {
                    warn!(
                        timeout_ms = u64::try_from(self.handler_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                        "handler missed its deadline"
                    );
                });
                response::handler_timeout()
            }
        };

        let elapsed = started.elapsed();
        let status = response.status();
        self.metrics.increment(PROCESSED_OPS_TOTAL);
        self.metrics
            .publish_counter(HTTP_REQUEST_COUNT, &ctx.method, &ctx.path);
        self.metrics.publish_histogram(
            HTTP_REQUEST_DURATION_MS,
            &ctx.method,
            &ctx.path,
            elapsed.as_secs_f64() * 1_000.0,
        );
        self.metrics.publish_histogram(
            HTTP_REQUEST_DURATION_MICRO,
            &ctx.method,
            &ctx.path,
            elapsed.as_secs_f64() * 1_000_000.0,
        );
        logger.request_completed(elapsed, status);

        ctx.spans.tag(root, tags::IDENTITY, identity)?;
        ctx.spans
            .tag(root, tags::REQUEST_ID, ctx.request_id.as_str())?;
        ctx.spans.tag(root, tags::METHOD, ctx.method.as_str())?;
        ctx.spans.tag(root, tags::PATH, ctx.path.as_str())?;
        ctx.spans
            .tag(root, tags::STATUS, status.as_u16().to_string())?;
        ctx.spans.finish(root)?;

        Ok(response)
    }
}

fn request_id_of(req: &Request) -> String {
    req.headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned)
}

fn client_key_of(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |info| info.0.ip().to_string())
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

// ---------------------------------------------------------------------------
// PipelineLayer
// ---------------------------------------------------------------------------

/// Tower layer that routes every request through the [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct PipelineLayer {
    orchestrator: Arc<Orchestrator>,
}

impl PipelineLayer {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = PipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PipelineService {
            inner,
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`PipelineLayer`].
#[derive(Debug, Clone)]
pub struct PipelineService<S> {
    inner: S,
    orchestrator: Arc<Orchestrator>,
}

impl<S> Service<Request> for PipelineService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Hand the readied service to the future and keep a fresh clone for the next call.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let orchestrator = Arc::clone(&self.orchestrator);

        Box::pin(async move { Ok(orchestrator.handle(req, inner).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
