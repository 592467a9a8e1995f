//! Process-wide logging and metrics setup, called once by the binary.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a subscriber is already set.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }
    Ok(())
}

/// Installs the Prometheus recorder and serves `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or `addr` cannot be bound.
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "tenantflow_messages_total",
        "Messages published (outbound) or handled (inbound), by outcome"
    );
    describe_histogram!(
        "tenantflow_message_duration_seconds",
        Unit::Seconds,
        "Time spent publishing or handling a message"
    );
    describe_counter!(
        "tenantflow_context_leaks_total",
        "Requests or deliveries refused because the unit still carried a tenant"
    );
    describe_counter!(
        "tenantflow_messages_stamped_total",
        "Outbound messages stamped with a tenant"
    );
}
