//! Listener handlers and the terminal delivery service that runs them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tenantflow_core::Message;
use tower::Service;
use tracing::warn;

use super::error::DeliveryError;
use super::pipeline::Delivery;
use super::template::MessageTemplate;

/// Application code invoked once per delivery, inside the tenant scope.
///
/// Returning `Some(reply)` publishes the reply to the delivery's `reply_to`
/// queue with the request's correlation id.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Message>>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> anyhow::Result<Option<Message>> {
        (self)(message).await
    }
}

/// What happened to a successfully processed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Handled,
    Replied { reply_to: String },
}

/// Innermost delivery service: calls the handler and publishes its reply.
pub struct HandlerService<H> {
    handler: Arc<H>,
    replies: Option<MessageTemplate>,
}

impl<H> HandlerService<H> {
    #[must_use]
    pub fn new(handler: Arc<H>, replies: Option<MessageTemplate>) -> Self {
        Self { handler, replies }
    }
}

impl<H> Clone for HandlerService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            replies: self.replies.clone(),
        }
    }
}

impl<H: MessageHandler> Service<Delivery> for HandlerService<H> {
    type Response = DeliveryOutcome;
    type Error = DeliveryError;
    type Future = Pin<Box<dyn Future<Output = Result<DeliveryOutcome, DeliveryError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let replies = self.replies.clone();

        Box::pin(async move {
            let request = delivery.message.properties.clone();
            let reply = handler
                .handle(delivery.message)
                .await
                .map_err(DeliveryError::Handler)?;

            let Some(mut reply) = reply else {
                return Ok(DeliveryOutcome::Handled);
            };
            let Some(reply_to) = request.reply_to else {
                warn!(queue = %delivery.queue, message_id = %request.message_id, "dropping reply: request has no reply_to");
                return Ok(DeliveryOutcome::Handled);
            };
            let Some(template) = replies else {
                warn!(queue = %delivery.queue, reply_to = %reply_to, "dropping reply: listener has no reply template");
                return Ok(DeliveryOutcome::Handled);
            };

            reply.properties.correlation_id = Some(request.correlation_id.unwrap_or(request.message_id));
            template
                .send(&reply_to, reply)
                .await
                .map_err(DeliveryError::Reply)?;
            Ok(DeliveryOutcome::Replied { reply_to })
        })
    }
}
