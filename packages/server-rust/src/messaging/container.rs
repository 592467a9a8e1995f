//! Listener container: a fixed pool of long-lived worker tasks consuming one
//! queue.
//!
//! Workers are reused across deliveries, which is exactly the situation in
//! which a missed unbind would leak one tenant into the next delivery. Each
//! delivery therefore runs through [`build_delivery_pipeline`], whose bind
//! layer refuses to start on a dirty unit. When that happens the worker
//! purges its own slot and runs the delivery once more on the clean unit; a
//! delivery refused twice in a row is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tenantflow_core::Propagation;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, trace, warn};

use super::broker::{Broker, Subscription};
use super::config::MessagingConfig;
use super::error::{BrokerError, DeliveryError};
use super::handler::{DeliveryOutcome, MessageHandler};
use super::pipeline::{build_delivery_pipeline, Delivery};
use super::template::MessageTemplate;

/// Builder for a set of workers listening on one queue.
pub struct ListenerContainer {
    queue: String,
    broker: Arc<dyn Broker>,
    propagation: Propagation,
    concurrency: usize,
    handler_timeout: Option<Duration>,
    replies: Option<MessageTemplate>,
}

impl ListenerContainer {
    #[must_use]
    pub fn new(queue: impl Into<String>, broker: Arc<dyn Broker>, propagation: Propagation) -> Self {
        Self::from_config(queue, broker, propagation, &MessagingConfig::default())
    }

    /// Takes the worker count and handler timeout from `config`.
    #[must_use]
    pub fn from_config(
        queue: impl Into<String>,
        broker: Arc<dyn Broker>,
        propagation: Propagation,
        config: &MessagingConfig,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            propagation,
            concurrency: config.listener_concurrency.max(1),
            handler_timeout: config.handler_timeout,
            replies: None,
        }
    }

    /// Number of worker tasks. Values below one are raised to one.
    #[must_use]
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    #[must_use]
    pub fn handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Template used to publish handler replies.
    #[must_use]
    pub fn reply_template(mut self, template: MessageTemplate) -> Self {
        self.replies = Some(template);
        self
    }

    /// Declares the queue, subscribes and spawns the workers.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if the queue cannot be subscribed to.
    pub fn start<H: MessageHandler>(self, handler: H) -> Result<RunningListener, BrokerError> {
        self.broker.declare_queue(&self.queue);
        let subscription = self.broker.subscribe(&self.queue)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            subscription,
            handler: Arc::new(handler),
            propagation: self.propagation,
            handler_timeout: self.handler_timeout,
            replies: self.replies,
        };
        let workers = (0..self.concurrency)
            .map(|index| spawn_supervised(index, worker.clone(), shutdown_rx.clone()))
            .collect();

        info!(queue = %self.queue, concurrency = self.concurrency, "listener started");
        Ok(RunningListener {
            queue: self.queue,
            shutdown: shutdown_tx,
            workers,
        })
    }
}

/// Handle to a started listener. Dropping it signals the workers to stop.
pub struct RunningListener {
    queue: String,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl RunningListener {
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker and waits for them to finish their current delivery.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        for handle in self.workers.drain(..) {
            if let Err(err) = handle.await {
                warn!(queue = %self.queue, error = %err, "listener worker did not exit cleanly");
            }
        }
        info!(queue = %self.queue, "listener stopped");
    }
}

impl Drop for RunningListener {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// Everything one worker needs; cloned per worker and per restart.
struct Worker<H> {
    subscription: Subscription,
    handler: Arc<H>,
    propagation: Propagation,
    handler_timeout: Option<Duration>,
    replies: Option<MessageTemplate>,
}

impl<H> Clone for Worker<H> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription.clone(),
            handler: Arc::clone(&self.handler),
            propagation: self.propagation.clone(),
            handler_timeout: self.handler_timeout,
            replies: self.replies.clone(),
        }
    }
}

/// Runs a worker and restarts it if a handler panics.
fn spawn_supervised<H: MessageHandler>(
    index: usize,
    worker: Worker<H>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let run = tokio::spawn(worker.clone().run(index, shutdown.clone()));
            match run.await {
                Ok(()) => break,
                Err(err) if err.is_panic() => {
                    error!(queue = worker.subscription.queue(), worker = index, "listener worker panicked, restarting");
                }
                Err(_) => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
    })
}

impl<H: MessageHandler> Worker<H> {
    async fn run(self, index: usize, mut shutdown: watch::Receiver<bool>) {
        let queue = self.subscription.queue();
        let mut pipeline = build_delivery_pipeline(
            self.handler,
            self.propagation.clone(),
            self.handler_timeout,
            self.replies,
        );
        debug!(queue, worker = index, "listener worker running");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                message = self.subscription.recv() => match message {
                    Some(message) => message,
                    None => {
                        debug!(queue, worker = index, "queue closed");
                        break;
                    }
                },
            };

            let delivery = Delivery {
                queue: queue.to_string(),
                message,
            };
            let result = match deliver(&mut pipeline, delivery.clone()).await {
                Err(DeliveryError::TenantLeak(_)) => {
                    if let Some(stale) = self.propagation.store().unbind() {
                        warn!(
                            queue,
                            worker = index,
                            tenant_id = %stale,
                            "purged stale tenant from worker unit, retrying delivery"
                        );
                    }
                    deliver(&mut pipeline, delivery).await
                }
                other => other,
            };

            match result {
                Ok(outcome) => trace!(queue, worker = index, ?outcome, "delivery handled"),
                Err(err) => {
                    if matches!(err, DeliveryError::TenantLeak(_)) {
                        self.propagation.store().unbind();
                    }
                    warn!(
                        queue,
                        worker = index,
                        kind = err.kind(),
                        error = %err,
                        "delivery failed"
                    );
                }
            }
        }
    }
}

async fn deliver<S>(pipeline: &mut S, delivery: Delivery) -> Result<DeliveryOutcome, DeliveryError>
where
    S: Service<Delivery, Response = DeliveryOutcome, Error = DeliveryError>,
{
    ServiceExt::<Delivery>::ready(pipeline).await?.call(delivery).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tenantflow_core::{ContextStore, Message, PropagationConfig, TenantId, UnitId};

    use super::*;
    use crate::messaging::broker::InMemoryBroker;

    fn setup() -> (Arc<InMemoryBroker>, Propagation) {
        let propagation =
            Propagation::with_store(PropagationConfig::default(), Arc::new(ContextStore::new())).unwrap();
        (Arc::new(InMemoryBroker::default()), propagation)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn tenant_message(tenant: &str) -> Message {
        Message::text("x").with_header("tenantId", tenant)
    }

    #[tokio::test]
    async fn each_delivery_sees_its_own_tenant() {
        let (broker, propagation) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let observer = propagation.clone();
            let seen = Arc::clone(&seen);
            move |_msg: Message| {
                seen.lock().push(observer.current());
                async move { Ok::<_, anyhow::Error>(None::<Message>) }
            }
        };

        let mut listener = ListenerContainer::new("payments.c2b", broker.clone(), propagation.clone())
            .concurrency(1)
            .start(handler)
            .unwrap();

        broker.publish("payments.c2b", tenant_message("a")).await.unwrap();
        broker.publish("payments.c2b", Message::text("x")).await.unwrap();
        broker.publish("payments.c2b", tenant_message("b")).await.unwrap();

        wait_for(|| seen.lock().len() == 3).await;
        listener.stop().await;

        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec![Some(TenantId::new("a").unwrap()), None, Some(TenantId::new("b").unwrap())]
        );
        assert!(propagation.store().is_empty());
    }

    #[tokio::test]
    async fn failing_handler_does_not_poison_the_worker() {
        let (broker, propagation) = setup();
        let handled = Arc::new(AtomicUsize::new(0));
        let handler = {
            let handled = Arc::clone(&handled);
            move |msg: Message| {
                handled.fetch_add(1, Ordering::SeqCst);
                let fail = msg.headers().get("tenantId") == Some("bad");
                async move {
                    if fail {
                        anyhow::bail!("rejected");
                    }
                    Ok(None::<Message>)
                }
            }
        };

        let mut listener = ListenerContainer::new("q", broker.clone(), propagation.clone())
            .concurrency(1)
            .start(handler)
            .unwrap();

        broker.publish("q", tenant_message("bad")).await.unwrap();
        broker.publish("q", tenant_message("good")).await.unwrap();

        wait_for(|| handled.load(Ordering::SeqCst) == 2).await;
        listener.stop().await;
        assert!(propagation.store().is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_is_restarted_and_unbound() {
        let (broker, propagation) = setup();
        let handled = Arc::new(AtomicUsize::new(0));
        let handler = {
            let handled = Arc::clone(&handled);
            move |msg: Message| {
                let panic = msg.headers().get("tenantId") == Some("boom");
                let handled = Arc::clone(&handled);
                async move {
                    assert!(!panic, "handler panic");
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(None::<Message>)
                }
            }
        };

        let mut listener = ListenerContainer::new("q", broker.clone(), propagation.clone())
            .concurrency(1)
            .start(handler)
            .unwrap();

        broker.publish("q", tenant_message("boom")).await.unwrap();
        broker.publish("q", tenant_message("fine")).await.unwrap();

        wait_for(|| handled.load(Ordering::SeqCst) == 1).await;
        listener.stop().await;
        assert!(propagation.store().is_empty());
    }

    #[tokio::test]
    async fn slow_handler_times_out_and_worker_continues() {
        let (broker, propagation) = setup();
        let finished = Arc::new(AtomicUsize::new(0));
        let handler = {
            let finished = Arc::clone(&finished);
            move |msg: Message| {
                let slow = msg.headers().get("tenantId") == Some("slow");
                let finished = Arc::clone(&finished);
                async move {
                    if slow {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(None::<Message>)
                }
            }
        };

        let mut listener = ListenerContainer::new("q", broker.clone(), propagation.clone())
            .concurrency(1)
            .handler_timeout(Some(Duration::from_millis(20)))
            .start(handler)
            .unwrap();

        broker.publish("q", tenant_message("slow")).await.unwrap();
        broker.publish("q", tenant_message("quick")).await.unwrap();

        wait_for(|| finished.load(Ordering::SeqCst) == 1).await;
        listener.stop().await;
        assert!(propagation.store().is_empty());
    }

    #[tokio::test]
    async fn concurrent_workers_share_the_queue() {
        let (broker, propagation) = setup();
        let handled = Arc::new(AtomicUsize::new(0));
        let handler = {
            let handled = Arc::clone(&handled);
            let observer = propagation.clone();
            move |msg: Message| {
                let expected = msg.headers().get("tenantId").map(str::to_string);
                let handled = Arc::clone(&handled);
                let observer = observer.clone();
                async move {
                    tokio::task::yield_now().await;
                    assert_eq!(observer.current().map(TenantId::into_inner), expected);
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(None::<Message>)
                }
            }
        };

        let mut listener = ListenerContainer::new("q", broker.clone(), propagation.clone())
            .concurrency(4)
            .start(handler)
            .unwrap();
        assert_eq!(listener.worker_count(), 4);

        for i in 0..40 {
            broker.publish("q", tenant_message(&format!("t{i}"))).await.unwrap();
        }

        wait_for(|| handled.load(Ordering::SeqCst) == 40).await;
        listener.stop().await;
        assert!(propagation.store().is_empty());
    }

    #[tokio::test]
    async fn reply_carries_the_delivery_tenant() {
        let (broker, propagation) = setup();
        let replies = MessageTemplate::new(broker.clone(), propagation.clone(), &MessagingConfig::default());
        let mut listener = ListenerContainer::new("rpc", broker.clone(), propagation.clone())
            .concurrency(1)
            .reply_template(replies.clone())
            .start(|_msg: Message| async { Ok::<_, anyhow::Error>(Some(Message::text("pong"))) })
            .unwrap();

        let reply = {
            let _scope = propagation.enter(Some(TenantId::new("t12601").unwrap())).unwrap();
            replies.send_and_receive("rpc", Message::text("ping")).await.unwrap()
        };
        assert_eq!(&reply.body[..], b"pong");
        assert_eq!(reply.headers().get("tenantId"), Some("t12601"));

        listener.stop().await;
        assert!(propagation.store().is_empty());
    }

    #[tokio::test]
    async fn stale_worker_binding_is_purged_and_delivery_retried() {
        let (broker, propagation) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let observer = propagation.clone();
            let seen = Arc::clone(&seen);
            move |_msg: Message| {
                seen.lock().push((UnitId::current(), observer.current()));
                async move { Ok::<_, anyhow::Error>(None::<Message>) }
            }
        };

        let mut listener = ListenerContainer::new("q", broker.clone(), propagation.clone())
            .concurrency(1)
            .start(handler)
            .unwrap();

        broker.publish("q", tenant_message("a")).await.unwrap();
        wait_for(|| seen.lock().len() == 1 && propagation.store().is_empty()).await;
        let worker_unit = seen.lock()[0].0;

        // Simulate a binding that escaped its scope on the worker unit.
        propagation
            .store()
            .bind_unit(worker_unit, TenantId::new("stale").unwrap())
            .unwrap();
        broker.publish("q", tenant_message("b")).await.unwrap();
        wait_for(|| seen.lock().len() == 2).await;
        listener.stop().await;

        let (unit, tenant) = seen.lock()[1].clone();
        assert_eq!(unit, worker_unit);
        assert_eq!(tenant, Some(TenantId::new("b").unwrap()));
        assert!(propagation.store().is_empty());
    }
}
