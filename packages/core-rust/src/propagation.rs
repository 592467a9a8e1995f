//! Validated propagation handle shared by every bind and stamp site.

use std::sync::Arc;

use tracing::warn;

use crate::config::{ConfigError, PropagationConfig};
use crate::context::{ContextError, ContextStore, TenantScope};
use crate::message::Headers;
use crate::tenant::TenantId;

/// Cheap-to-clone pairing of a context store with a validated configuration.
#[derive(Debug, Clone)]
pub struct Propagation {
    store: Arc<ContextStore>,
    config: Arc<PropagationConfig>,
}

impl Propagation {
    /// Uses the process-wide context store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is rejected.
    pub fn new(config: PropagationConfig) -> Result<Self, ConfigError> {
        Self::with_store(config, ContextStore::global())
    }

    /// Uses an explicit store, e.g. an isolated one in tests.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is rejected.
    pub fn with_store(config: PropagationConfig, store: Arc<ContextStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    #[must_use]
    pub fn current(&self) -> Option<TenantId> {
        self.store.current()
    }

    /// Opens a bind scope on the current unit.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::AlreadyBound` if the unit carries a stale tenant.
    pub fn enter(&self, tenant: Option<TenantId>) -> Result<TenantScope, ContextError> {
        self.store.enter(tenant)
    }

    /// Writes the current unit's tenant into `headers`.
    ///
    /// Overwrites any value already present under the reserved key. With no
    /// tenant bound the key is removed, so a caller-supplied value never
    /// leaves the process as if it had been stamped.
    pub fn stamp(&self, headers: &mut Headers) -> Option<TenantId> {
        let Some(tenant) = self.store.current() else {
            headers.remove(&self.config.header_name);
            return None;
        };
        headers.insert(self.config.header_name.clone(), tenant.as_str());
        Some(tenant)
    }

    /// Reads the tenant carried by `headers`. An empty value counts as absent.
    #[must_use]
    pub fn extract(&self, headers: &Headers) -> Option<TenantId> {
        let raw = headers.get(&self.config.header_name)?;
        let tenant = TenantId::from_transport(raw);
        if tenant.is_none() {
            warn!(header = %self.config.header_name, "ignoring empty tenant header");
        }
        tenant
    }
}
