//! Outbound stamping middleware.
//!
//! Writes the publishing unit's tenant into the message headers. The stamp
//! runs in `call`, before the inner future exists, so it always observes the
//! unit that is publishing.

use std::task::{Context, Poll};

use tenantflow_core::Propagation;
use tower::{Layer, Service};
use tracing::trace;

use super::pipeline::Outbound;

// ---------------------------------------------------------------------------
// StampTenantLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StampTenantLayer {
    propagation: Propagation,
}

impl StampTenantLayer {
    #[must_use]
    pub fn new(propagation: Propagation) -> Self {
        Self { propagation }
    }
}

impl<S> Layer<S> for StampTenantLayer {
    type Service = StampTenantService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StampTenantService {
            inner,
            propagation: self.propagation.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// StampTenantService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StampTenantService<S> {
    inner: S,
    propagation: Propagation,
}

impl<S> Service<Outbound> for StampTenantService<S>
where
    S: Service<Outbound>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut outbound: Outbound) -> Self::Future {
        if let Some(tenant) = self.propagation.stamp(outbound.message.headers_mut()) {
            trace!(tenant_id = %tenant, queue = %outbound.queue, "stamped outbound message");
            metrics::counter!("tenantflow_messages_stamped_total").increment(1);
        }
        self.inner.call(outbound)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    use tenantflow_core::{ContextStore, Headers, Message, PropagationConfig, TenantId};
    use tower::ServiceExt;

    use super::*;

    /// Returns the headers it was called with.
    struct CaptureHeaders;

    impl Service<Outbound> for CaptureHeaders {
        type Response = Headers;
        type Error = std::convert::Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Headers, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Outbound) -> Self::Future {
            let headers = req.message.headers().clone();
            Box::pin(async move { Ok(headers) })
        }
    }

    fn isolated() -> Propagation {
        Propagation::with_store(PropagationConfig::default(), Arc::new(ContextStore::new())).unwrap()
    }

    fn outbound(message: Message) -> Outbound {
        Outbound {
            queue: "payments.c2b".to_string(),
            message,
        }
    }

    #[tokio::test]
    async fn stamps_bound_tenant() {
        let propagation = isolated();
        let svc = StampTenantLayer::new(propagation.clone()).layer(CaptureHeaders);
        let _scope = propagation.enter(Some(TenantId::new("t12601").unwrap())).unwrap();

        let headers = svc.oneshot(outbound(Message::text("{}"))).await.unwrap();
        assert_eq!(headers.get("tenantId"), Some("t12601"));
    }

    #[tokio::test]
    async fn unbound_publisher_sends_no_tenant() {
        let propagation = isolated();
        let svc = StampTenantLayer::new(propagation).layer(CaptureHeaders);

        let forged = Message::text("{}").with_header("tenantId", "someone-else");
        let headers = svc.oneshot(outbound(forged)).await.unwrap();
        assert!(!headers.contains("tenantId"));
    }

    #[tokio::test]
    async fn stamp_happens_in_call_not_on_poll() {
        let propagation = isolated();
        let mut svc = StampTenantLayer::new(propagation.clone()).layer(CaptureHeaders);

        let fut = {
            let _scope = propagation.enter(Some(TenantId::new("t1").unwrap())).unwrap();
            svc.ready().await.unwrap().call(outbound(Message::text("x")))
        };
        // Scope already closed; the stamp taken at call time must survive.
        assert!(propagation.current().is_none());
        let headers = fut.await.unwrap();
        assert_eq!(headers.get("tenantId"), Some("t1"));
    }
}
