//! Network module with deferred startup lifecycle.
//!
//! `new()` creates the shared pipeline state, `start()` binds the TCP
//! listener, and `serve()` accepts connections until shutdown. The metrics
//! registry is available between `new()` and `serve()` for callers that
//! want to inspect it.

use std::future::Future;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use broker_core::{AdmissionConfig, AdmissionControl, IdentityResolver, SlidingWindowLimiter};
use tokio::net::TcpListener;
use tracing::{debug, info};

use super::config::NetworkConfig;
use super::handlers::AppState;
use super::routes::{self, ROUTES};
use crate::pipeline::Orchestrator;
use crate::registry::{MetricsError, MetricsRegistry};

/// Shortest interval between limiter sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates the metrics registry, limiter, and orchestrator
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts connections until the shutdown future resolves
pub struct NetworkModule {
    config: NetworkConfig,
    metrics: Arc<MetricsRegistry>,
    limiter: Arc<SlidingWindowLimiter>,
    orchestrator: Arc<Orchestrator>,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    ///
    /// Registers the per-route metrics for every entry in [`ROUTES`] and
    /// sizes the identity cache to `cache_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics recorder cannot be built.
    pub fn new(
        config: NetworkConfig,
        admission: AdmissionConfig,
        cache_size: NonZeroUsize,
    ) -> Result<Self, MetricsError> {
        let mut metrics = MetricsRegistry::new()?;
        metrics.initialize(&ROUTES);
        let metrics = Arc::new(metrics);

        let limiter = Arc::new(SlidingWindowLimiter::new(admission));
        let orchestrator = Orchestrator::new(
            IdentityResolver::new(cache_size),
            Arc::clone(&metrics),
            Arc::clone(&limiter) as Arc<dyn AdmissionControl>,
        )
        .with_handler_timeout(config.request_timeout);

        Ok(Self {
            config,
            metrics,
            limiter,
            orchestrator: Arc::new(orchestrator),
            listener: None,
        })
    }

    /// Returns a shared reference to the metrics registry.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// Assembles the axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            metrics: Arc::clone(&self.metrics),
        };
        routes::build_router(state, Arc::clone(&self.orchestrator))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(scope = "service", host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then lets in-flight
    /// requests finish.
    ///
    /// A background task sweeps idle clients out of the limiter once per
    /// window for as long as the server runs.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server hits
    /// a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();

        let sweep_every = self.limiter.config().window.max(MIN_SWEEP_INTERVAL);
        let limiter = Arc::clone(&self.limiter);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep();
                if evicted > 0 {
                    debug!(evicted, "swept idle clients from admission control");
                }
            }
        });

        info!(scope = "service", "Serving HTTP connections");
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        sweeper.abort();
        served?;
        info!(scope = "service", "Server stopped");
        Ok(())
    }
}
