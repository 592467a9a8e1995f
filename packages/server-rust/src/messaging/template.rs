//! Publishing facade used by application code and listener replies.
//!
//! Every message sent through a [`MessageTemplate`] goes through the publish
//! pipeline, so it is stamped with the sender's tenant before it reaches the
//! broker.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tenantflow_core::{ContentType, Message, Propagation};
use tower::ServiceExt;
use tracing::{debug, warn};

use super::broker::Broker;
use super::config::MessagingConfig;
use super::error::MessagingError;
use super::pipeline::{build_publish_pipeline, Outbound, PublishPipeline};

/// Cloneable handle for sending messages and doing request/reply.
#[derive(Clone)]
pub struct MessageTemplate {
    pipeline: PublishPipeline,
    broker: Arc<dyn Broker>,
    content_type: ContentType,
    reply_timeout: Duration,
}

impl MessageTemplate {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, propagation: Propagation, config: &MessagingConfig) -> Self {
        Self {
            pipeline: build_publish_pipeline(Arc::clone(&broker), propagation),
            broker,
            content_type: ContentType::default(),
            reply_timeout: config.reply_timeout,
        }
    }

    /// Content type used by the `convert_*` methods.
    #[must_use]
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    #[must_use]
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Publishes `message` to `queue`.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Broker` if the broker rejects the message.
    pub async fn send(&self, queue: &str, message: Message) -> Result<(), MessagingError> {
        self.pipeline
            .clone()
            .oneshot(Outbound {
                queue: queue.to_string(),
                message,
            })
            .await
    }

    /// Encodes `payload` with the template's content type and publishes it.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Codec` if encoding fails, or a broker error.
    pub async fn convert_and_send<T>(&self, queue: &str, payload: &T) -> Result<(), MessagingError>
    where
        T: Serialize + ?Sized,
    {
        let message = Message::encode(payload, self.content_type)?;
        self.send(queue, message).await
    }

    /// Publishes `message` and waits for the correlated reply.
    ///
    /// A temporary reply queue is declared for the exchange and deleted
    /// afterwards, whatever the outcome. Replies carrying another
    /// correlation id are discarded.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::ReplyTimeout` if no reply arrives within the
    /// reply timeout, or the error from publishing the request.
    pub async fn send_and_receive(&self, queue: &str, mut message: Message) -> Result<Message, MessagingError> {
        let reply_queue = format!("reply.{}", uuid::Uuid::new_v4());
        self.broker.declare_queue(&reply_queue);
        let _cleanup = ReplyQueueGuard {
            broker: Arc::clone(&self.broker),
            queue: reply_queue.clone(),
        };
        let replies = self.broker.subscribe(&reply_queue)?;

        let correlation_id = message
            .properties
            .correlation_id
            .clone()
            .unwrap_or_else(|| message.properties.message_id.clone());
        message.properties.correlation_id = Some(correlation_id.clone());
        message.properties.reply_to = Some(reply_queue.clone());

        self.send(queue, message).await?;
        debug!(queue, reply_queue = %reply_queue, correlation_id = %correlation_id, "awaiting reply");

        let wait = async {
            loop {
                let Some(reply) = replies.recv().await else {
                    return Err(MessagingError::ReplyChannelClosed {
                        queue: reply_queue.clone(),
                    });
                };
                if reply.properties.correlation_id.as_deref() == Some(correlation_id.as_str()) {
                    return Ok(reply);
                }
                warn!(
                    reply_queue = %reply_queue,
                    expected = %correlation_id,
                    got = ?reply.properties.correlation_id,
                    "discarding reply with foreign correlation id"
                );
            }
        };

        match tokio::time::timeout(self.reply_timeout, wait).await {
            Ok(result) => result,
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = self.reply_timeout.as_millis() as u64;
                Err(MessagingError::ReplyTimeout { timeout_ms })
            }
        }
    }

    /// Typed request/reply: encodes `payload`, decodes the reply body.
    ///
    /// # Errors
    ///
    /// Same as [`send_and_receive`](Self::send_and_receive), plus codec errors.
    pub async fn convert_send_and_receive<T, R>(&self, queue: &str, payload: &T) -> Result<R, MessagingError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = Message::encode(payload, self.content_type)?;
        let reply = self.send_and_receive(queue, request).await?;
        Ok(reply.decode()?)
    }
}

/// Deletes the temporary reply queue when the exchange ends.
struct ReplyQueueGuard {
    broker: Arc<dyn Broker>,
    queue: String,
}

impl Drop for ReplyQueueGuard {
    fn drop(&mut self) {
        self.broker.delete_queue(&self.queue);
    }
}
