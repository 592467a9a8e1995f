//! Pipeline composition for both message directions.
//!
//! Publish: `StampTenantLayer` -> `MetricsLayer` -> `BrokerSink`.
//! Deliver: `BindTenantLayer` -> `DeliveryTimeoutLayer` -> `MetricsLayer` -> `HandlerService`.
//!
//! The tenant layers are outermost in both directions, so nothing downstream
//! runs before the stamp or outside the bind scope.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tenantflow_core::{Message, Propagation};
use tower::{Service, ServiceBuilder};

use super::bind::{BindTenantLayer, BindTenantService};
use super::broker::Broker;
use super::error::MessagingError;
use super::handler::{HandlerService, MessageHandler};
use super::metrics::{Instrumented, MetricsLayer, MetricsService};
use super::stamp::{StampTenantLayer, StampTenantService};
use super::template::MessageTemplate;
use super::timeout::{DeliveryTimeoutLayer, DeliveryTimeoutService};

/// A message on its way to the broker.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub queue: String,
    pub message: Message,
}

/// A message received from the broker, before its handler runs.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub message: Message,
}

impl Instrumented for Outbound {
    const DIRECTION: &'static str = "outbound";

    fn queue(&self) -> &str {
        &self.queue
    }

    fn message_id(&self) -> &str {
        &self.message.properties.message_id
    }
}

impl Instrumented for Delivery {
    const DIRECTION: &'static str = "inbound";

    fn queue(&self) -> &str {
        &self.queue
    }

    fn message_id(&self) -> &str {
        &self.message.properties.message_id
    }
}

/// Terminal publish service: hands the message to the broker.
#[derive(Clone)]
pub struct BrokerSink {
    broker: Arc<dyn Broker>,
}

impl BrokerSink {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

impl Service<Outbound> for BrokerSink {
    type Response = ();
    type Error = MessagingError;
    type Future = Pin<Box<dyn Future<Output = Result<(), MessagingError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, outbound: Outbound) -> Self::Future {
        let broker = Arc::clone(&self.broker);
        Box::pin(async move {
            broker.publish(&outbound.queue, outbound.message).await?;
            Ok(())
        })
    }
}

/// The composed publish service type produced by [`build_publish_pipeline`].
pub type PublishPipeline = StampTenantService<MetricsService<BrokerSink>>;

/// The composed delivery service type produced by [`build_delivery_pipeline`].
pub type DeliveryPipeline<H> =
    BindTenantService<DeliveryTimeoutService<MetricsService<HandlerService<H>>>>;

/// Builds the publish pipeline around `broker`.
#[must_use]
pub fn build_publish_pipeline(broker: Arc<dyn Broker>, propagation: Propagation) -> PublishPipeline {
    ServiceBuilder::new()
        .layer(StampTenantLayer::new(propagation))
        .layer(MetricsLayer)
        .service(BrokerSink::new(broker))
}

/// Builds the delivery pipeline around `handler`.
///
/// `replies` publishes handler replies to the delivery's `reply_to` queue.
#[must_use]
pub fn build_delivery_pipeline<H: MessageHandler>(
    handler: Arc<H>,
    propagation: Propagation,
    handler_timeout: Option<Duration>,
    replies: Option<MessageTemplate>,
) -> DeliveryPipeline<H> {
    ServiceBuilder::new()
        .layer(BindTenantLayer::new(propagation))
        .layer(DeliveryTimeoutLayer::new(handler_timeout))
        .layer(MetricsLayer)
        .service(HandlerService::new(handler, replies))
}
