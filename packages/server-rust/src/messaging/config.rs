use std::time::Duration;

/// Messaging configuration: broker backpressure, request/reply and listener defaults.
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// Bounded channel capacity of each in-memory queue.
    pub queue_capacity: usize,
    /// Maximum time a publish may wait on a full queue.
    pub publish_timeout: Duration,
    /// Maximum time `send_and_receive` waits for a reply.
    pub reply_timeout: Duration,
    /// Worker tasks per listener container.
    pub listener_concurrency: usize,
    /// Per-delivery handler deadline. `None` disables the deadline.
    pub handler_timeout: Option<Duration>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            publish_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(5),
            listener_concurrency: 4,
            handler_timeout: Some(Duration::from_secs(30)),
        }
    }
}
