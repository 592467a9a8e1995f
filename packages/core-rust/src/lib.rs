//! `tenantflow` core: tenant context store, message model and propagation rules.

pub mod codec;
pub mod config;
pub mod context;
pub mod message;
pub mod propagation;
pub mod tenant;
pub mod unit;

pub use codec::{CodecError, ContentType};
pub use config::{ConfigError, PropagationConfig};
pub use context::{ContextError, ContextStore, TenantScope};
pub use message::{Headers, Message, MessageProperties, RESERVED_PROPERTY_NAMES};
pub use propagation::Propagation;
pub use tenant::{TenantId, TenantIdError, TENANT_ID_KEY};
pub use unit::UnitId;
