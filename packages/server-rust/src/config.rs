//! Process configuration, read once at boot from flags or environment.

use std::convert::Infallible;
use std::num::NonZeroUsize;
use std::time::Duration;

use broker_core::AdmissionConfig;
use clap::Parser;

use crate::network::NetworkConfig;

/// Execution mode. Controls log format and default verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// JSON logs at `info`.
    Production,
    /// Human-readable logs at `debug`.
    #[default]
    Development,
}

impl ExecutionMode {
    /// `prod` / `production` (any case) select production; anything else is development.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches what `clap` expects of a value parser.
    pub fn parse(raw: &str) -> Result<Self, Infallible> {
        let mode = if raw.eq_ignore_ascii_case("prod") || raw.eq_ignore_ascii_case("production")
        {
            Self::Production
        } else {
            Self::Development
        };
        Ok(mode)
    }

    #[must_use]
    pub fn default_log_filter(self) -> &'static str {
        match self {
            Self::Production => "info",
            Self::Development => "debug",
        }
    }
}

/// Longest accepted admission window: one day.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Longest accepted handler deadline: one hour.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 3_600;

/// Top-level server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "broker", version, about = "Request-pipeline HTTP service")]
pub struct BrokerConfig {
    /// Execution mode (`prod` for production logging).
    #[arg(long, env = "ENV", default_value = "dev", value_parser = ExecutionMode::parse)]
    pub mode: ExecutionMode,

    /// Bind address.
    #[arg(long, env = "SERVICE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port.
    #[arg(long, env = "SERVICE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Identity cache capacity. Must be a positive integer.
    #[arg(long, env = "CACHE_SIZE", default_value = "100")]
    pub cache_size: NonZeroUsize,

    /// Requests admitted per client within one window.
    #[arg(long, env = "RATE_LIMIT_MAX", default_value = "30")]
    pub rate_limit_max: NonZeroUsize,

    /// Admission window length in seconds, 1 to 86400.
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..=MAX_WINDOW_SECS)
    )]
    pub rate_limit_window_secs: u64,

    /// Deadline for the downstream handler in seconds, 1 to 3600.
    #[arg(
        long,
        env = "REQUEST_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=MAX_REQUEST_TIMEOUT_SECS)
    )]
    pub request_timeout_secs: u64,
}

impl BrokerConfig {
    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    #[must_use]
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_requests: self.rate_limit_max.get(),
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }
}
