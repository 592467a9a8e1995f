//! Broker collaborator: queue declaration, publishing and competing consumers.
//!
//! [`InMemoryBroker`] keeps one bounded mpsc channel per queue, tracked in a
//! `DashMap`. Consumers of the same queue share its receiver, so each message
//! is delivered to exactly one of them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tenantflow_core::Message;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::config::MessagingConfig;
use super::error::BrokerError;

/// Transport the messaging pipeline publishes to and consumes from.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declares `queue`. Declaring an existing queue is a no-op.
    fn declare_queue(&self, queue: &str);

    /// Removes `queue`; pending messages are dropped and consumers see the end of stream.
    fn delete_queue(&self, queue: &str) -> bool;

    /// Attaches a consumer to `queue`.
    fn subscribe(&self, queue: &str) -> Result<Subscription, BrokerError>;

    /// Hands `message` to the broker for delivery on `queue`.
    async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError>;
}

/// Consumer end of a queue. Clones compete for the same messages.
#[derive(Debug, Clone)]
pub struct Subscription {
    queue: Arc<str>,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl Subscription {
    /// Wraps a receiver fed by any transport adapter.
    #[must_use]
    pub fn new(queue: &str, rx: mpsc::Receiver<Message>) -> Self {
        Self {
            queue: Arc::from(queue),
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Name of the queue this subscription consumes.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next message. `None` once the queue is gone.
    pub async fn recv(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }
}

#[derive(Debug)]
struct QueueHandle {
    tx: mpsc::Sender<Message>,
    subscription: Subscription,
}

/// Process-local broker used by the demo application and tests.
#[derive(Debug)]
pub struct InMemoryBroker {
    queues: DashMap<String, QueueHandle>,
    capacity: usize,
    publish_timeout: Duration,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            queues: DashMap::new(),
            capacity: config.queue_capacity,
            publish_timeout: config.publish_timeout,
        }
    }

    /// Number of declared queues.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(&MessagingConfig::default())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn declare_queue(&self, queue: &str) {
        self.queues.entry(queue.to_string()).or_insert_with(|| {
            debug!(queue, capacity = self.capacity, "declared queue");
            let (tx, rx) = mpsc::channel(self.capacity);
            QueueHandle {
                tx,
                subscription: Subscription::new(queue, rx),
            }
        });
    }

    fn delete_queue(&self, queue: &str) -> bool {
        let removed = self.queues.remove(queue).is_some();
        if removed {
            debug!(queue, "deleted queue");
        }
        removed
    }

    fn subscribe(&self, queue: &str) -> Result<Subscription, BrokerError> {
        self.queues
            .get(queue)
            .map(|handle| handle.subscription.clone())
            .ok_or_else(|| BrokerError::UnknownQueue {
                queue: queue.to_string(),
            })
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError> {
        // Clone the sender so no map guard is held across the await.
        let tx = self
            .queues
            .get(queue)
            .map(|handle| handle.tx.clone())
            .ok_or_else(|| BrokerError::UnknownQueue {
                queue: queue.to_string(),
            })?;

        match tokio::time::timeout(self.publish_timeout, tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BrokerError::Closed {
                queue: queue.to_string(),
            }),
            Err(_) => Err(BrokerError::Timeout {
                queue: queue.to_string(),
            }),
        }
    }
}
