//! Error types for the messaging pipeline.

use tenantflow_core::{CodecError, ContextError};

/// Errors raised by a broker implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("queue not declared: {queue}")]
    UnknownQueue { queue: String },
    #[error("publish to {queue} timed out: queue is full")]
    Timeout { queue: String },
    #[error("queue {queue} is closed")]
    Closed { queue: String },
}

/// Errors surfaced to publishers and request/reply callers.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no reply received within {timeout_ms}ms")]
    ReplyTimeout { timeout_ms: u64 },
    #[error("reply queue {queue} closed before a reply arrived")]
    ReplyChannelClosed { queue: String },
}

/// Errors from running one delivery through the listener pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The worker unit still carried a tenant from an earlier delivery.
    #[error("tenant context leaked into delivery: {0}")]
    TenantLeak(#[from] ContextError),
    #[error("handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),
    #[error("reply could not be published: {0}")]
    Reply(#[source] MessagingError),
}

impl DeliveryError {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TenantLeak(_) => "tenant_leak",
            Self::Timeout { .. } => "timeout",
            Self::Handler(_) => "handler",
            Self::Reply(_) => "reply",
        }
    }
}
