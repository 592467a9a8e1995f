//! tenantflow demo server.
//!
//! Wires the in-memory broker, the demo listeners and the HTTP server, then
//! runs until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tenantflow_core::{Propagation, PropagationConfig};
use tenantflow_server::demo::{self, PaymentLedger};
use tenantflow_server::messaging::{Broker, InMemoryBroker, MessageTemplate, MessagingConfig};
use tenantflow_server::network::{NetworkConfig, NetworkModule};
use tenantflow_server::telemetry::{self, LogFormat};
use tracing::{info, warn};

/// Tenant-propagating HTTP and messaging demo
#[derive(Debug, Parser)]
#[command(name = "tenantflow-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "TENANTFLOW_HOST", default_value = "0.0.0.0")]
    host: String,

    /// HTTP port (0 picks a free port)
    #[arg(long, env = "TENANTFLOW_PORT", default_value_t = 8080)]
    port: u16,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "TENANTFLOW_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[arg(long, env = "TENANTFLOW_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Filter used when RUST_LOG is unset
    #[arg(long, env = "TENANTFLOW_LOG", default_value = "info,tower_http=debug")]
    log_filter: String,

    /// Query parameter carrying the tenant on HTTP requests
    #[arg(long, env = "TENANTFLOW_TENANT_PARAM", default_value = "tenantId")]
    tenant_param: String,

    /// Message header carrying the tenant
    #[arg(long, env = "TENANTFLOW_TENANT_HEADER", default_value = "tenantId")]
    tenant_header: String,

    /// Worker tasks per listener
    #[arg(long, env = "TENANTFLOW_LISTENER_CONCURRENCY", default_value_t = 4)]
    listener_concurrency: usize,

    /// Request/reply timeout in milliseconds
    #[arg(long, env = "TENANTFLOW_REPLY_TIMEOUT_MS", default_value_t = 5_000)]
    reply_timeout_ms: u64,

    /// Per-delivery handler timeout in milliseconds (0 disables it)
    #[arg(long, env = "TENANTFLOW_HANDLER_TIMEOUT_MS", default_value_t = 30_000)]
    handler_timeout_ms: u64,
}

impl Args {
    fn propagation_config(&self) -> PropagationConfig {
        PropagationConfig {
            query_param: self.tenant_param.clone(),
            header_name: self.tenant_header.clone(),
        }
    }

    fn messaging_config(&self) -> MessagingConfig {
        MessagingConfig {
            listener_concurrency: self.listener_concurrency,
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            handler_timeout: (self.handler_timeout_ms > 0).then(|| Duration::from_millis(self.handler_timeout_ms)),
            ..MessagingConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_format, &args.log_filter)?;

    if let Some(port) = args.metrics_port {
        telemetry::init_metrics(SocketAddr::from(([0, 0, 0, 0], port)))?;
    }

    let propagation = Propagation::new(args.propagation_config())?;
    let messaging = args.messaging_config();

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(&messaging));
    let ledger = Arc::new(PaymentLedger::new());
    let mut listeners = demo::start_listeners(&broker, &propagation, &messaging, Arc::clone(&ledger))?;

    let template = MessageTemplate::new(Arc::clone(&broker), propagation.clone(), &messaging);
    let mut network = NetworkModule::new(args.network_config(), template, propagation);
    let port = network.start().await?;
    info!(port, "tenantflow demo listening");

    network
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    for listener in &mut listeners {
        listener.stop().await;
    }
    info!(payments = ledger.len(), "tenantflow demo stopped");
    Ok(())
}
