//! HTTP middleware stack for the broker server.
//!
//! Transport-level layers that wrap the request pipeline. Middleware
//! ordering follows the outer-to-inner convention: the first layer listed
//! is the outermost (processes the request first on the way in, and the
//! response last on the way out).

use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::pipeline::REQUEST_ID_HEADER;

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUuid>, tower::layer::util::Identity>,
>;

/// Builds the transport-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- keeps an inbound `X-Request-Id`, otherwise assigns a UUID v4
/// 2. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
///
/// Admission control, spans, logging and metrics belong to the request
/// pipeline layered inside this stack.
#[must_use]
pub fn build_http_layers() -> HttpLayers {
    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            REQUEST_ID_HEADER.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER.clone()))
        .into_inner()
}
