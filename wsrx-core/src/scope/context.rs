//! Scope-local handle lookup.
//!
//! A [`ScopeContext`] is the lookup surface a scope hands to the consumers
//! nested in it. It is passed explicitly; nothing is stored in globals or
//! thread-locals. Its view ends with the scope: after teardown every lookup
//! fails with [`LifecycleViolation::ScopeReleased`].

use tokio::sync::watch;
use tracing::error;

use crate::error::{ConstructionError, LifecycleViolation, WorkspaceError};
use crate::handle::{Handle, ObservedValue, WorkspaceRx};
use crate::workspace::{Shells, Tree, WorkspaceId};

/// What a scope currently publishes.
#[derive(Debug, Clone)]
pub enum Binding {
    Pending,
    Ready(Handle),
    Failed(ConstructionError),
    Released,
}

/// Consumer-side view of a scope's handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ScopeContext {
    id: WorkspaceId,
    binding: watch::Receiver<Binding>,
}

impl ScopeContext {
    pub(crate) fn new(id: WorkspaceId, binding: watch::Receiver<Binding>) -> Self {
        Self { id, binding }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.binding.borrow(), Binding::Ready(_))
    }

    /// The scope's handle. Fails if the scope has not resolved it yet.
    pub fn get_handle(&self) -> Result<Handle, WorkspaceError> {
        let current = self.binding.borrow().clone();
        match current {
            Binding::Ready(handle) => Ok(handle),
            Binding::Failed(err) => Err(err.into()),
            Binding::Pending => Err(self.violation(LifecycleViolation::NotResolved)),
            Binding::Released => Err(self.violation(LifecycleViolation::ScopeReleased)),
        }
    }

    pub fn get_shells(&self) -> Result<ObservedValue<Shells>, WorkspaceError> {
        self.get_handle().map(|handle| handle.shells())
    }

    pub fn get_tree(&self) -> Result<ObservedValue<Tree>, WorkspaceError> {
        self.get_handle().map(|handle| handle.tree())
    }

    pub fn workspace_rx(&self) -> Result<WorkspaceRx, WorkspaceError> {
        self.get_handle().map(|handle| handle.workspace_rx().clone())
    }

    /// Wait for the scope to resolve, then return its handle or the
    /// construction failure.
    pub async fn handle(&self) -> Result<Handle, WorkspaceError> {
        let mut binding = self.binding.clone();
        let settled = binding
            .wait_for(|b| !matches!(b, Binding::Pending))
            .await
            .map(|b| (*b).clone());

        match settled {
            Ok(Binding::Ready(handle)) => Ok(handle),
            Ok(Binding::Failed(err)) => Err(err.into()),
            Ok(Binding::Pending) => Err(LifecycleViolation::NotResolved.into()),
            // The scope was dropped while resolving.
            Ok(Binding::Released) | Err(_) => Err(LifecycleViolation::ScopeReleased.into()),
        }
    }

    fn violation(&self, violation: LifecycleViolation) -> WorkspaceError {
        error!(workspace = %self.id, error = %violation, "scope lifecycle violation");
        violation.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    fn context() -> (watch::Sender<Binding>, ScopeContext) {
        let (tx, rx) = watch::channel(Binding::Pending);
        (tx, ScopeContext::new("ws".into(), rx))
    }

    #[test]
    fn reads_before_resolution_are_violations() {
        let (_tx, ctx) = context();
        assert_eq!(
            ctx.get_handle().unwrap_err(),
            WorkspaceError::Lifecycle(LifecycleViolation::NotResolved)
        );
        assert!(ctx.get_tree().is_err());
        assert!(!ctx.is_resolved());
    }

    #[test]
    fn ready_binding_serves_slices() {
        let (tx, ctx) = context();
        let handle = Handle::detached(Workspace::new("ws")).unwrap();
        tx.send_replace(Binding::Ready(handle.clone()));

        assert!(Handle::ptr_eq(&ctx.get_handle().unwrap(), &handle));
        assert!(ctx.get_shells().unwrap().get().is_empty());
        assert!(ctx.get_tree().unwrap().get().is_empty());
    }

    #[test]
    fn released_binding_rejects_reads() {
        let (tx, ctx) = context();
        tx.send_replace(Binding::Released);
        assert_eq!(
            ctx.workspace_rx().unwrap_err(),
            WorkspaceError::Lifecycle(LifecycleViolation::ScopeReleased)
        );
    }

    #[tokio::test]
    async fn handle_waits_for_resolution() {
        let (tx, ctx) = context();
        let handle = Handle::detached(Workspace::new("ws")).unwrap();

        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.handle().await }
        });
        tokio::task::yield_now().await;
        tx.send_replace(Binding::Ready(handle.clone()));

        let resolved = waiter.await.unwrap().unwrap();
        assert!(Handle::ptr_eq(&resolved, &handle));
    }

    #[tokio::test]
    async fn handle_surfaces_construction_failure() {
        let (tx, ctx) = context();
        let failure = ConstructionError::Source {
            id: "ws".into(),
            message: "offline".into(),
        };
        tx.send_replace(Binding::Failed(failure.clone()));

        assert_eq!(ctx.handle().await.unwrap_err(), WorkspaceError::Construction(failure));
    }

    #[tokio::test]
    async fn dropped_scope_releases_waiters() {
        let (tx, ctx) = context();
        drop(tx);
        assert_eq!(
            ctx.handle().await.unwrap_err(),
            WorkspaceError::Lifecycle(LifecycleViolation::ScopeReleased)
        );
    }
}
