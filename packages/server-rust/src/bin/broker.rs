//! Broker server binary.

use anyhow::Context;
use broker_server::{init_tracing, BrokerConfig, NetworkModule};
use clap::Parser;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BrokerConfig::parse();
    init_tracing(config.mode).context("failed to initialize logging")?;

    info!(
        scope = "service",
        mode = ?config.mode,
        host = %config.host,
        port = config.port,
        cache_size = config.cache_size.get(),
        "Initializing broker service"
    );

    let mut module = NetworkModule::new(
        config.network_config(),
        config.admission_config(),
        config.cache_size,
    )
    .context("failed to build metrics registry")?;
    module.start().await?;
    module.serve(shutdown_signal()).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(scope = "service", "Shutdown signal received"),
        Err(err) => {
            warn!(scope = "service", error = %err, "cannot listen for Ctrl-C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
