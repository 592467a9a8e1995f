//! Messaging: broker abstraction, publish pipeline with tenant stamping, and
//! listener containers that bind the tenant around every delivery.

pub mod bind;
pub mod broker;
pub mod config;
pub mod container;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod stamp;
pub mod template;
pub mod timeout;

pub use broker::{Broker, InMemoryBroker, Subscription};
pub use config::MessagingConfig;
pub use container::{ListenerContainer, RunningListener};
pub use error::{BrokerError, DeliveryError, MessagingError};
pub use handler::{DeliveryOutcome, MessageHandler};
pub use pipeline::{build_delivery_pipeline, build_publish_pipeline, Delivery, Outbound};
pub use template::MessageTemplate;
