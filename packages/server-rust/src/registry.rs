//! Route-keyed metric registry.
//!
//! Every metric the server will ever publish is registered up front: the
//! process-wide counters in [`MetricsRegistry::new`] and three series per
//! route in [`MetricsRegistry::initialize`]. After that the registry is
//! shared read-only behind an `Arc`, so the key set cannot grow at request
//! time. Publishing against a key that was never registered, or against a
//! key of the other metric kind, is a silent no-op.
//!
//! Handles are registered on a `PrometheusRecorder` owned by the registry
//! rather than a global recorder, so independent registries (one per test)
//! never share state. Counter and histogram handles are atomic, so concurrent
//! publications on the same key never lose updates.

use std::collections::HashMap;

use ::metrics::{Counter, Histogram, Key, KeyName, Level, Metadata, Recorder, SharedString};
use broker_core::metric_key::{
    metric_key, route_signature, HTTP_REQUEST_COUNT, HTTP_REQUEST_DURATION_MICRO,
    HTTP_REQUEST_DURATION_MS, LATENCY_BUCKETS, PROCESSED_OPS_TOTAL, REQUESTS_REJECTED_TOTAL,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tracing::{debug, trace};

use crate::network::routes::RouteDef;

/// Errors raised while building the registry.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build Prometheus recorder: {0}")]
    Build(#[from] BuildError),
}

/// A registered metric handle.
#[derive(Clone)]
pub enum Metric {
    Counter(Counter),
    Histogram(Histogram),
}

impl Metric {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Histogram(_) => "histogram",
        }
    }
}

/// Fixed set of counters and histograms keyed by normalized metric key.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    metrics: HashMap<String, Metric>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.metrics.keys().collect();
        keys.sort();
        f.debug_struct("MetricsRegistry")
            .field("keys", &keys)
            .finish_non_exhaustive()
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

impl MetricsRegistry {
    /// Creates a registry holding only the process-wide counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorder rejects the latency bucket layout.
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(&LATENCY_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();

        let mut registry = Self {
            recorder,
            handle,
            metrics: HashMap::new(),
        };
        registry.register_counter(
            PROCESSED_OPS_TOTAL.to_string(),
            "The total number of processed requests",
        );
        registry.register_counter(
            REQUESTS_REJECTED_TOTAL.to_string(),
            "The total number of requests rejected by admission control",
        );
        Ok(registry)
    }

    /// Registers the per-route request counter and duration histograms for every route.
    pub fn initialize(&mut self, routes: &[RouteDef]) {
        for route in routes {
            let signature = route_signature(route.method.as_str(), route.path);
            let label = format!("{} {}", route.method, route.path);

            self.register_counter(
                format!("{HTTP_REQUEST_COUNT}_{signature}"),
                format!("Number of HTTP requests for {label}"),
            );
            self.register_histogram(
                format!("{HTTP_REQUEST_DURATION_MS}_{signature}"),
                format!("Duration of HTTP requests for {label} in milliseconds"),
            );
            self.register_histogram(
                format!("{HTTP_REQUEST_DURATION_MICRO}_{signature}"),
                format!("Duration of HTTP requests for {label} in microseconds"),
            );
        }
        debug!(
            routes = routes.len(),
            metrics = self.metrics.len(),
            "registered route metrics"
        );
    }

    fn register_counter(&mut self, name: String, help: impl Into<SharedString>) {
        self.recorder
            .describe_counter(KeyName::from(name.clone()), None, help.into());
        let counter = self
            .recorder
            .register_counter(&Key::from_name(name.clone()), &metadata());
        self.metrics.insert(name, Metric::Counter(counter));
    }

    fn register_histogram(&mut self, name: String, help: impl Into<SharedString>) {
        self.recorder
            .describe_histogram(KeyName::from(name.clone()), None, help.into());
        let histogram = self
            .recorder
            .register_histogram(&Key::from_name(name.clone()), &metadata());
        self.metrics.insert(name, Metric::Histogram(histogram));
    }

    /// Increments the counter registered under exactly `key`.
    pub fn increment(&self, key: &str) {
        match self.metrics.get(key) {
            Some(Metric::Counter(counter)) => counter.increment(1),
            Some(other) => trace!(key, kind = other.kind(), "counter publish on non-counter ignored"),
            None => trace!(key, "counter publish on unknown key ignored"),
        }
    }

    /// Records `value` on the histogram registered under exactly `key`.
    pub fn observe(&self, key: &str, value: f64) {
        match self.metrics.get(key) {
            Some(Metric::Histogram(histogram)) => histogram.record(value),
            Some(other) => trace!(key, kind = other.kind(), "histogram publish on non-histogram ignored"),
            None => trace!(key, "histogram publish on unknown key ignored"),
        }
    }

    /// Increments `<prefix>_<signature>` for the route, if registered.
    pub fn publish_counter(&self, prefix: &str, method: &str, path: &str) {
        self.increment(&metric_key(prefix, method, path));
    }

    /// Records `value` on `<prefix>_<signature>` for the route, if registered.
    pub fn publish_histogram(&self, prefix: &str, method: &str, path: &str, value: f64) {
        self.observe(&metric_key(prefix, method, path), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.metrics.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Prometheus text exposition of every registered metric.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use http::Method;

    use super::*;
    use crate::test_support::{bucket_count, sample};

    fn registry() -> MetricsRegistry {
        let mut registry = MetricsRegistry::new().unwrap();
        registry.initialize(&[
            RouteDef::new(Method::GET, "/health"),
            RouteDef::new(Method::POST, "/v1/items"),
        ]);
        registry
    }

    #[test]
    fn new_registers_process_counters_only() {
        let registry = MetricsRegistry::new().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(PROCESSED_OPS_TOTAL));
        assert!(registry.contains(REQUESTS_REJECTED_TOTAL));
    }

    #[test]
    fn initialize_registers_three_series_per_route() {
        let registry = registry();
        assert_eq!(registry.len(), 2 + 2 * 3);
        assert!(matches!(
            registry.get("http_request_count_GET_health"),
            Some(Metric::Counter(_))
        ));
        assert!(matches!(
            registry.get("http_request_duration_ms_GET_health"),
            Some(Metric::Histogram(_))
        ));
        assert!(matches!(
            registry.get("http_request_duration_micro_POST_vitems"),
            Some(Metric::Histogram(_))
        ));
    }

    #[test]
    fn counter_accumulates() {
        let registry = registry();
        for _ in 0..3 {
            registry.publish_counter(HTTP_REQUEST_COUNT, "GET", "/health");
        }
        let rendered = registry.render();
        assert_eq!(sample(&rendered, "http_request_count_GET_health"), Some(3.0));
    }

    #[test]
    fn histogram_observations_land_in_covering_buckets() {
        let registry = registry();
        for value in [0.4, 3.0, 9.5] {
            registry.publish_histogram(HTTP_REQUEST_DURATION_MS, "GET", "/health", value);
        }
        let rendered = registry.render();
        let name = "http_request_duration_ms_GET_health";
        assert_eq!(sample(&rendered, &format!("{name}_count")), Some(3.0));
        assert_eq!(bucket_count(&rendered, name, 1.0), Some(1.0));
        assert_eq!(bucket_count(&rendered, name, 2.0), Some(1.0));
        assert_eq!(bucket_count(&rendered, name, 4.0), Some(2.0));
        assert_eq!(bucket_count(&rendered, name, 10.0), Some(3.0));
        assert_eq!(bucket_count(&rendered, name, f64::INFINITY), Some(3.0));
    }

    #[test]
    fn unknown_route_is_a_silent_noop() {
        let registry = registry();
        let before = registry.len();
        registry.publish_counter(HTTP_REQUEST_COUNT, "DELETE", "/nope");
        registry.publish_histogram(HTTP_REQUEST_DURATION_MS, "DELETE", "/nope", 5.0);
        assert_eq!(registry.len(), before);
        assert!(!registry.render().contains("DELETE_nope"));
    }

    #[test]
    fn kind_mismatch_is_a_silent_noop() {
        let registry = registry();
        registry.observe("http_request_count_GET_health", 12.0);
        registry.increment("http_request_duration_ms_GET_health");
        let rendered = registry.render();
        assert_eq!(
            sample(&rendered, "http_request_count_GET_health").unwrap_or(0.0),
            0.0
        );
        assert_eq!(
            sample(&rendered, "http_request_duration_ms_GET_health_count").unwrap_or(0.0),
            0.0
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let registry = Arc::new(registry());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        registry.publish_counter(HTTP_REQUEST_COUNT, "GET", "/health");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(
            sample(&registry.render(), "http_request_count_GET_health"),
            Some(8_000.0)
        );
    }
}
