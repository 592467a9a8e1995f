//! HTTP boundary: configuration, middleware, the inbound tenant binder,
//! handlers and shutdown control.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;
pub mod tenant;

pub use config::NetworkConfig;
pub use error::{ApiError, ErrorResponse};
pub use handlers::AppState;
pub use module::{NetworkModule, TenantRouter};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
pub use tenant::{tenant_from_query, TenantLayer, TenantService};
