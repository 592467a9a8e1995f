//! Inbound HTTP binder.
//!
//! `TenantLayer` wraps the finished router as a service, so it runs before
//! path matching. For each request it reads the tenant from the configured
//! query parameter, binds it to the unit serving the request and keeps the
//! [`TenantScope`] alive inside the response future. The binding is
//! therefore released when the response is produced, when the handler
//! errors or panics, and when the future is dropped by a timeout or a closed
//! connection.
//!
//! [`TenantScope`]: tenantflow_core::TenantScope

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::Query;
use axum::http::{Request, Uri};
use axum::response::{IntoResponse, Response};
use tenantflow_core::{Propagation, TenantId};
use tower::{Layer, Service};
use tracing::error;

use super::error::ApiError;

/// Reads the first occurrence of `param` from the query string.
///
/// A missing, empty or unparseable query yields `None`.
#[must_use]
pub fn tenant_from_query(uri: &Uri, param: &str) -> Option<TenantId> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).ok()?;
    pairs
        .into_iter()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| TenantId::from_transport(&value))
}

// ---------------------------------------------------------------------------
// TenantLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TenantLayer {
    propagation: Propagation,
}

impl TenantLayer {
    #[must_use]
    pub fn new(propagation: Propagation) -> Self {
        Self { propagation }
    }
}

impl<S> Layer<S> for TenantLayer {
    type Service = TenantService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantService {
            inner,
            propagation: self.propagation.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TenantService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TenantService<S> {
    inner: S,
    propagation: Propagation,
}

impl<S, B> Service<Request<B>> for TenantService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let propagation = self.propagation.clone();

        Box::pin(async move {
            let tenant = tenant_from_query(req.uri(), &propagation.config().query_param);
            let _scope = match propagation.enter(tenant) {
                Ok(scope) => scope,
                Err(err) => {
                    error!(
                        method = %req.method(),
                        path = %req.uri().path(),
                        error = %err,
                        "refusing request: serving unit still carries a tenant"
                    );
                    metrics::counter!("tenantflow_context_leaks_total").increment(1);
                    return Ok(ApiError::TenantLeak(err).into_response());
                }
            };
            inner.call(req).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
