//! HTTP handler definitions for the tenantflow server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for building the router.

pub mod api;
pub mod health;

pub use api::{c2b_handler, hello_handler, tenant_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use tenantflow_core::Propagation;

use super::ShutdownController;
use crate::messaging::MessageTemplate;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Every field is reference-counted or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
    /// Publishes on behalf of the request's tenant.
    pub template: MessageTemplate,
    pub propagation: Propagation,
}
