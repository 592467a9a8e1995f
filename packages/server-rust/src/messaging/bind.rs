//! Inbound binding middleware for the listener container.
//!
//! Runs before anything else in the delivery pipeline. On first poll it
//! checks that the worker unit is clean, binds the tenant carried by the
//! message headers and holds the resulting [`TenantScope`] until the inner
//! service has finished, so the unit is cleared on every exit path.
//!
//! [`TenantScope`]: tenantflow_core::TenantScope

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tenantflow_core::Propagation;
use tower::{Layer, Service};
use tracing::error;

use super::error::DeliveryError;
use super::pipeline::Delivery;

// ---------------------------------------------------------------------------
// BindTenantLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BindTenantLayer {
    propagation: Propagation,
}

impl BindTenantLayer {
    #[must_use]
    pub fn new(propagation: Propagation) -> Self {
        Self { propagation }
    }
}

impl<S> Layer<S> for BindTenantLayer {
    type Service = BindTenantService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BindTenantService {
            inner,
            propagation: self.propagation.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// BindTenantService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BindTenantService<S> {
    inner: S,
    propagation: Propagation,
}

impl<S> Service<Delivery> for BindTenantService<S>
where
    S: Service<Delivery, Error = DeliveryError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = DeliveryError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, DeliveryError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        // The service that was driven to readiness moves into the future.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let propagation = self.propagation.clone();

        Box::pin(async move {
            let tenant = propagation.extract(delivery.message.headers());
            let _scope = match propagation.enter(tenant) {
                Ok(scope) => scope,
                Err(err) => {
                    error!(
                        queue = %delivery.queue,
                        message_id = %delivery.message.properties.message_id,
                        error = %err,
                        "refusing delivery: worker unit still carries a tenant"
                    );
                    metrics::counter!("tenantflow_context_leaks_total").increment(1);
                    return Err(DeliveryError::TenantLeak(err));
                }
            };
            inner.call(delivery).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
