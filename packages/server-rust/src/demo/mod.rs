//! Demo application: a C2B payment feed and a request/reply greeting,
//! both running over the tenant-aware messaging pipeline.

pub mod hello;
pub mod payments;

use std::sync::Arc;

use tenantflow_core::Propagation;

use crate::messaging::{Broker, BrokerError, ListenerContainer, MessageTemplate, MessagingConfig, RunningListener};

pub use hello::HelloListener;
pub use payments::{C2bPayment, PaymentLedger, PaymentListener, RecordedPayment};

/// Queue carrying C2B payment notifications.
pub const PAYMENTS_QUEUE: &str = "payments.c2b";

/// Queue serving greeting requests.
pub const HELLO_QUEUE: &str = "request-reply.hello";

/// Declares the demo queues and starts one listener per queue.
///
/// # Errors
///
/// Returns `BrokerError` if a queue cannot be subscribed to.
pub fn start_listeners(
    broker: &Arc<dyn Broker>,
    propagation: &Propagation,
    config: &MessagingConfig,
    ledger: Arc<PaymentLedger>,
) -> Result<Vec<RunningListener>, BrokerError> {
    let replies = MessageTemplate::new(Arc::clone(broker), propagation.clone(), config);

    let payments = ListenerContainer::from_config(PAYMENTS_QUEUE, Arc::clone(broker), propagation.clone(), config)
        .start(PaymentListener::new(ledger, propagation.clone()))?;

    let hello = ListenerContainer::from_config(HELLO_QUEUE, Arc::clone(broker), propagation.clone(), config)
        .reply_template(replies)
        .start(HelloListener)?;

    Ok(vec![payments, hello])
}
