//! Process-wide context store holding at most one tenant per execution unit.
//!
//! The store is a sharded map keyed by [`UnitId`]. Each unit only ever
//! touches its own key, so units never contend on a shared slot.
//! Bind sites should go through [`ContextStore::enter`]: the returned
//! [`TenantScope`] clears the slot when dropped, which covers normal
//! completion, early `?` returns, panics and dropped (cancelled) futures.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::tenant::TenantId;
use crate::unit::UnitId;

static GLOBAL: OnceLock<Arc<ContextStore>> = OnceLock::new();

/// Error raised when the tenant lifecycle of a unit is violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A bind was attempted on a unit that still carries a tenant, meaning a
    /// previous unbind on this (reused) unit never ran.
    #[error("execution unit {unit} already bound to tenant {bound}")]
    AlreadyBound { unit: UnitId, bound: TenantId },
}

/// Mapping of execution unit to its bound tenant.
#[derive(Debug, Default)]
pub struct ContextStore {
    slots: DashMap<UnitId, TenantId>,
}

impl ContextStore {
    /// Creates an empty, independent store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store, created on first use.
    pub fn global() -> Arc<ContextStore> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ContextStore::new())))
    }

    /// Binds `tenant` to the current unit.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::AlreadyBound` if the unit already holds a tenant.
    /// The existing binding is left untouched.
    pub fn bind(&self, tenant: TenantId) -> Result<(), ContextError> {
        self.bind_unit(UnitId::current(), tenant)
    }

    /// Binds `tenant` to an explicit unit.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::AlreadyBound` if the unit already holds a tenant.
    pub fn bind_unit(&self, unit: UnitId, tenant: TenantId) -> Result<(), ContextError> {
        match self.slots.entry(unit) {
            Entry::Occupied(entry) => Err(ContextError::AlreadyBound {
                unit,
                bound: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                debug!(unit = %unit, tenant_id = %tenant, "bound tenant context");
                entry.insert(tenant);
                Ok(())
            }
        }
    }

    /// Tenant bound to the current unit, if any.
    #[must_use]
    pub fn current(&self) -> Option<TenantId> {
        self.get(UnitId::current())
    }

    /// Tenant bound to `unit`, if any.
    #[must_use]
    pub fn get(&self, unit: UnitId) -> Option<TenantId> {
        self.slots.get(&unit).map(|entry| entry.value().clone())
    }

    /// Clears the current unit. Clearing an empty slot is a no-op.
    pub fn unbind(&self) -> Option<TenantId> {
        self.unbind_unit(UnitId::current())
    }

    /// Clears an explicit unit. Clearing an empty slot is a no-op.
    pub fn unbind_unit(&self, unit: UnitId) -> Option<TenantId> {
        let removed = self.slots.remove(&unit).map(|(_, tenant)| tenant);
        trace!(unit = %unit, tenant_id = ?removed.as_ref().map(TenantId::as_str), "cleared tenant context");
        removed
    }

    /// Opens a scope on the current unit.
    ///
    /// The unit must be unbound on entry, whether or not a tenant is supplied.
    /// When `tenant` is `None` the scope binds nothing but still clears the
    /// unit on exit, so every entry point pairs with exactly one unbind.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::AlreadyBound` if the unit carries a stale tenant.
    pub fn enter(self: &Arc<Self>, tenant: Option<TenantId>) -> Result<TenantScope, ContextError> {
        let unit = UnitId::current();
        match tenant {
            Some(tenant) => self.bind_unit(unit, tenant)?,
            None => {
                if let Some(bound) = self.get(unit) {
                    return Err(ContextError::AlreadyBound { unit, bound });
                }
            }
        }
        Ok(TenantScope {
            store: Arc::clone(self),
            unit,
        })
    }

    /// Runs `fut` with `tenant` bound to whichever unit polls it.
    ///
    /// The bind happens on first poll, so this is the way to carry a tenant
    /// into a freshly spawned task.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::AlreadyBound` if the polling unit is already bound.
    pub async fn run_scoped<F>(
        self: Arc<Self>,
        tenant: Option<TenantId>,
        fut: F,
    ) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        let _scope = self.enter(tenant)?;
        Ok(fut.await)
    }

    /// Number of units currently bound.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy of every live binding.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(UnitId, TenantId)> {
        self.slots
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Drops every binding. Intended for test isolation.
    pub fn reset(&self) {
        self.slots.clear();
    }
}

/// Guard for one bind site. Dropping it clears the unit it was opened on.
#[derive(Debug)]
#[must_use = "dropping the scope immediately clears the tenant"]
pub struct TenantScope {
    store: Arc<ContextStore>,
    unit: UnitId,
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        // Keyed by the captured unit: drop may run during cancellation, away
        // from the task that opened the scope.
        self.store.unbind_unit(self.unit);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[test]
    fn bind_current_unbind() {
        let store = ContextStore::new();
        assert_eq!(store.current(), None);

        store.bind(tenant("t1")).unwrap();
        assert_eq!(store.current(), Some(tenant("t1")));

        assert_eq!(store.unbind(), Some(tenant("t1")));
        assert_eq!(store.current(), None);
    }

    #[test]
    fn double_bind_is_rejected_and_keeps_first() {
        let store = ContextStore::new();
        store.bind(tenant("t1")).unwrap();

        let err = store.bind(tenant("t2")).unwrap_err();
        assert!(matches!(err, ContextError::AlreadyBound { ref bound, .. } if *bound == tenant("t1")));
        assert_eq!(store.current(), Some(tenant("t1")));
    }

    #[test]
    fn unbind_is_idempotent() {
        let store = ContextStore::new();
        assert_eq!(store.unbind(), None);
        store.bind(tenant("t1")).unwrap();
        assert!(store.unbind().is_some());
        assert_eq!(store.unbind(), None);
    }

    #[test]
    fn scope_clears_on_drop() {
        let store = Arc::new(ContextStore::new());
        {
            let _scope = store.enter(Some(tenant("t1"))).unwrap();
            assert_eq!(store.current(), Some(tenant("t1")));
        }
        assert_eq!(store.current(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn empty_scope_still_checks_for_stale_binding() {
        let store = Arc::new(ContextStore::new());
        store.bind(tenant("stale")).unwrap();
        let err = store.enter(None).unwrap_err();
        assert!(matches!(err, ContextError::AlreadyBound { ref bound, .. } if *bound == tenant("stale")));
    }

    #[test]
    fn empty_scope_clears_manual_bind() {
        let store = Arc::new(ContextStore::new());
        {
            let _scope = store.enter(None).unwrap();
            store.bind(tenant("inner")).unwrap();
        }
        assert_eq!(store.current(), None);
    }

    #[test]
    fn scope_clears_on_panic() {
        let store = Arc::new(ContextStore::new());
        let worker = Arc::clone(&store);
        let unit = std::thread::spawn(move || {
            let unit = UnitId::current();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _scope = worker.enter(Some(tenant("t1"))).unwrap();
                panic!("handler failed");
            }));
            assert!(result.is_err());
            unit
        })
        .join()
        .unwrap();
        assert_eq!(store.get(unit), None);
    }

    #[tokio::test]
    async fn units_are_isolated() {
        let store = Arc::new(ContextStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = tenant(&format!("t{i}"));
                let _scope = store.enter(Some(id.clone())).unwrap();
                tokio::task::yield_now().await;
                assert_eq!(store.current(), Some(id));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn spawned_task_does_not_inherit() {
        let store = Arc::new(ContextStore::new());
        let _scope = store.enter(Some(tenant("parent"))).unwrap();
        let child = Arc::clone(&store);
        let seen = tokio::spawn(async move { child.current() }).await.unwrap();
        assert_eq!(seen, None);
        assert_eq!(store.current(), Some(tenant("parent")));
    }

    #[tokio::test]
    async fn run_scoped_binds_in_polling_task() {
        let store = Arc::new(ContextStore::new());
        let inner = Arc::clone(&store);
        let seen = tokio::spawn(Arc::clone(&store).run_scoped(Some(tenant("t9")), async move {
            inner.current()
        }))
        .await
        .unwrap()
        .unwrap();
        assert_eq!(seen, Some(tenant("t9")));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cancelled_task_clears_its_unit() {
        let store = Arc::new(ContextStore::new());
        let worker = Arc::clone(&store);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            let _scope = worker.enter(Some(tenant("t1"))).unwrap();
            let _ = ready_tx.send(UnitId::current());
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let unit = ready_rx.await.unwrap();
        assert_eq!(store.get(unit), Some(tenant("t1")));

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(store.get(unit), None);
    }

    #[test]
    fn snapshot_and_reset() {
        let store = ContextStore::new();
        store.bind(tenant("t1")).unwrap();
        let other = UnitId::Thread(std::thread::spawn(|| std::thread::current().id()).join().unwrap());
        store.bind_unit(other, tenant("t2")).unwrap();

        let mut seen: Vec<String> = store.snapshot().into_iter().map(|(_, t)| t.into_inner()).collect();
        seen.sort();
        assert_eq!(seen, vec!["t1", "t2"]);

        store.reset();
        assert!(store.is_empty());
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&ContextStore::global(), &ContextStore::global()));
    }
}
