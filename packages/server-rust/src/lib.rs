//! Broker server: HTTP request pipeline with admission control, identity
//! resolution, request-scoped logging, span tracking, and Prometheus metrics.

pub mod config;
pub mod network;
pub mod pipeline;
pub mod registry;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use config::{BrokerConfig, ExecutionMode};
pub use network::NetworkModule;
pub use pipeline::{Orchestrator, PipelineLayer};
pub use registry::{Metric, MetricsError, MetricsRegistry};
pub use telemetry::{init_tracing, TelemetryError, TracingSpanSink};
