//! Handler timeout middleware for deliveries.
//!
//! Rejects deliveries whose handler runs longer than the container's
//! `handler_timeout` with `DeliveryError::Timeout`. The inner future is
//! dropped on expiry, which also drops anything it held.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use super::error::DeliveryError;
use super::pipeline::Delivery;

// ---------------------------------------------------------------------------
// DeliveryTimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer enforcing an optional per-delivery deadline.
#[derive(Debug, Clone)]
pub struct DeliveryTimeoutLayer {
    timeout: Option<Duration>,
}

impl DeliveryTimeoutLayer {
    /// `None` disables the deadline.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for DeliveryTimeoutLayer {
    type Service = DeliveryTimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeliveryTimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryTimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeliveryTimeoutService<S> {
    inner: S,
    timeout: Option<Duration>,
}

impl<S> Service<Delivery> for DeliveryTimeoutService<S>
where
    S: Service<Delivery, Error = DeliveryError> + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = DeliveryError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, DeliveryError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let timeout = self.timeout;
        let fut = self.inner.call(delivery);
        Box::pin(async move {
            let Some(duration) = timeout else {
                return fut.await;
            };
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = duration.as_millis() as u64;
                    Err(DeliveryError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tenantflow_core::Message;
    use tower::ServiceExt;

    use super::*;

    /// Service that takes a configurable delay before responding.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Delivery> for SlowService {
        type Response = ();
        type Error = DeliveryError;
        type Future = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _delivery: Delivery) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(())
            })
        }
    }

    fn delivery() -> Delivery {
        Delivery {
            queue: "q".to_string(),
            message: Message::text("x"),
        }
    }

    #[tokio::test]
    async fn fast_handler_completes() {
        let svc = DeliveryTimeoutLayer::new(Some(Duration::from_millis(500)))
            .layer(SlowService { delay_ms: 5 });
        assert!(svc.oneshot(delivery()).await.is_ok());
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let svc = DeliveryTimeoutLayer::new(Some(Duration::from_millis(10)))
            .layer(SlowService { delay_ms: 500 });
        let err = svc.oneshot(delivery()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { timeout_ms: 10 }));
    }

    #[tokio::test]
    async fn no_deadline_when_disabled() {
        let svc = DeliveryTimeoutLayer::new(None).layer(SlowService { delay_ms: 30 });
        assert!(svc.oneshot(delivery()).await.is_ok());
    }
}
