//! tenantflow server: binds a tenant to each HTTP request and message
//! delivery, and stamps it on every message published in between.

pub mod demo;
pub mod messaging;
pub mod network;
pub mod telemetry;

pub use messaging::{
    Broker, InMemoryBroker, ListenerContainer, MessageHandler, MessageTemplate, MessagingConfig, RunningListener,
};
pub use network::{NetworkConfig, NetworkModule, TenantLayer};
