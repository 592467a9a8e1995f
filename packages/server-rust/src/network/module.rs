//! Network module with deferred startup lifecycle.
//!
//! `new()` assembles shared state, `start()` binds the TCP listener and
//! `serve()` accepts connections until the shutdown future resolves. Binding
//! before serving lets the caller learn the OS-assigned port first.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Router, ServiceExt};
use tenantflow_core::Propagation;
use tokio::net::TcpListener;
use tower::Layer;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    c2b_handler, health_handler, hello_handler, liveness_handler, readiness_handler, tenant_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::{track_in_flight, ShutdownController};
use super::tenant::{TenantLayer, TenantService};
use crate::messaging::MessageTemplate;

/// The routed application with the tenant binder in front of routing.
pub type TenantRouter = TenantService<Router>;

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    template: MessageTemplate,
    propagation: Propagation,
    start_time: Instant,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, template: MessageTemplate, propagation: Propagation) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            template,
            propagation,
            start_time: Instant::now(),
        }
    }

    /// Shared shutdown controller, for wiring listeners and signal handlers.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /health`, `GET /health/live`, `GET /health/ready`
    /// - `POST /api/v1/c2b`
    /// - `GET /api/v1/hello/{name}`
    /// - `GET /api/v1/tenant`
    ///
    /// `TenantLayer` wraps the finished router rather than its routes, so the
    /// tenant is bound before path matching and unmatched requests are bound
    /// and released like any other.
    pub fn build_router(&self) -> TenantRouter {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            template: self.template.clone(),
            propagation: self.propagation.clone(),
        };

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/v1/c2b", post(c2b_handler))
            .route("/api/v1/hello/{name}", get(hello_handler))
            .route("/api/v1/tenant", get(tenant_handler))
            .layer(from_fn_with_state(Arc::clone(&self.shutdown), track_in_flight))
            .layer(build_http_layers(&self.config))
            .with_state(state);
        TenantLayer::new(self.propagation.clone()).layer(router)
    }

    /// Binds the TCP listener and returns the actual port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server fails.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let app = self.build_router();

        self.shutdown.set_ready();
        info!("serving HTTP");

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown)
            .await?;

        self.shutdown.trigger_shutdown();
        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        Ok(())
    }
}
