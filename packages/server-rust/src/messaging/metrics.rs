//! Metrics middleware shared by the publish and delivery pipelines.
//!
//! Records a `tracing` span per message plus `metrics` counters and a
//! duration histogram labelled by direction.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

/// Requests that carry enough identity to be instrumented.
pub trait Instrumented {
    /// `"outbound"` or `"inbound"`.
    const DIRECTION: &'static str;

    fn queue(&self) -> &str;

    fn message_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments every message passing through it.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, R> Service<R> for MetricsService<S>
where
    R: Instrumented + 'static,
    S: Service<R> + Send,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let span = info_span!(
            "message",
            direction = R::DIRECTION,
            queue = req.queue(),
            message_id = req.message_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "tenantflow_messages_total",
                    "direction" => R::DIRECTION,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!(
                    "tenantflow_message_duration_seconds",
                    "direction" => R::DIRECTION
                )
                .record(elapsed.as_secs_f64());

                tracing::debug!(duration_ms, outcome, "message complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
