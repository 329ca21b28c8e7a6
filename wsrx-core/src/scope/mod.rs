//! Scope/Provider Binding
//!
//! A [`Scope`] is a bounded lifetime that owns a lease on one workspace
//! handle and, when enabled, the autosave process attached to it. A
//! [`Provider`] holds what scopes need (the handle cache and the
//! persistence collaborators) and creates them.
//!
//! # State Machine
//!
//! ```text
//! Unbound --bind--> Resolving --resolved--> Bound --unbind--> Unbinding --> Unbound
//!                       |
//!                       +--construction failed--> Unbound
//!                       +--bind future dropped--> Unbound
//! ```
//!
//! - `Resolving` is the only state in which consumers wait:
//!   [`ScopeContext::handle`] suspends until the handle is published, and
//!   the synchronous getters report [`LifecycleViolation::NotResolved`].
//! - `Unbinding` stops autosave and waits for it before the lease is
//!   released and the scope reports `Unbound`.
//!
//! Both transitions survive cancellation. Dropping a `bind` future returns
//! the scope to `Unbound` and wakes waiting consumers with
//! [`LifecycleViolation::ScopeReleased`]. Dropping an `unbind` future aborts
//! the autosave flush and still releases the lease.
//!
//! [`Provider::run`] wraps a body in a bound scope and unbinds on every exit
//! path, including a panicking body.

mod context;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::autosave::{
    self, Autosave, AutosavePolicy, AutosaveReport, ErrorReporter, Persistence, TracingReporter,
};
use crate::config::Config;
use crate::error::{ConstructionError, LifecycleViolation, WorkspaceError};
use crate::handle::{Handle, HandleCache, Lease};
use crate::workspace::{WorkspaceId, WorkspaceSource};

pub use context::{Binding, ScopeContext};

/// Where a [`Scope`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Unbound,
    Resolving,
    Bound,
    Unbinding,
}

/// Creates scopes over a shared handle cache.
#[derive(Clone)]
pub struct Provider {
    cache: HandleCache,
    persistence: Arc<dyn Persistence>,
    reporter: Arc<dyn ErrorReporter>,
    autosave: Option<AutosavePolicy>,
}

impl Provider {
    /// A provider with default autosave that reports failures to `tracing`.
    pub fn new(cache: HandleCache, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            cache,
            persistence,
            reporter: Arc::new(TracingReporter),
            autosave: Some(AutosavePolicy::default()),
        }
    }

    pub fn from_config(
        config: &Config,
        source: Arc<dyn WorkspaceSource>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let cache = HandleCache::new(source).with_retention(config.cache.retention());
        Self {
            autosave: config.autosave.policy(),
            ..Self::new(cache, persistence)
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Autosave policy for new scopes; `None` disables autosave.
    pub fn with_autosave(mut self, policy: Option<AutosavePolicy>) -> Self {
        self.autosave = policy;
        self
    }

    pub fn cache(&self) -> &HandleCache {
        &self.cache
    }

    pub fn autosave_policy(&self) -> Option<AutosavePolicy> {
        self.autosave
    }

    /// An unbound scope for `id`.
    pub fn scope(&self, id: impl Into<WorkspaceId>) -> Scope {
        let (binding, _) = watch::channel(Binding::Pending);
        Scope {
            id: id.into(),
            provider: self.clone(),
            state: ScopeState::Unbound,
            lease: None,
            autosave: None,
            binding,
        }
    }

    /// Create a scope for `id` and bind it.
    pub async fn bind(&self, id: impl Into<WorkspaceId>) -> Result<Scope, WorkspaceError> {
        let mut scope = self.scope(id);
        scope.bind().await?;
        Ok(scope)
    }

    /// Run `body` inside a bound scope for `id`.
    ///
    /// The scope is unbound when `body` finishes, and also when it panics;
    /// the panic is resumed after teardown completes.
    pub async fn run<F, Fut, R>(
        &self,
        id: impl Into<WorkspaceId>,
        body: F,
    ) -> Result<R, WorkspaceError>
    where
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut scope = self.bind(id).await?;
        let context = scope.context();

        let outcome = AssertUnwindSafe(async move { body(context).await })
            .catch_unwind()
            .await;
        scope.unbind().await?;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("cache", &self.cache)
            .field("autosave", &self.autosave)
            .finish()
    }
}

/// A bounded lifetime owning one handle lease and its autosave.
pub struct Scope {
    id: WorkspaceId,
    provider: Provider,
    state: ScopeState,
    lease: Option<Lease>,
    autosave: Option<Autosave>,
    binding: watch::Sender<Binding>,
}

impl Scope {
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// The bound handle, if any.
    pub fn handle(&self) -> Option<&Handle> {
        self.lease.as_ref().map(Lease::handle)
    }

    pub fn has_autosave(&self) -> bool {
        self.autosave.is_some()
    }

    /// A lookup surface for consumers nested in this scope.
    pub fn context(&self) -> ScopeContext {
        ScopeContext::new(self.id.clone(), self.binding.subscribe())
    }

    /// Resolve the handle, attach autosave, and publish the handle to this
    /// scope's contexts.
    pub async fn bind(&mut self) -> Result<Handle, WorkspaceError> {
        if self.state != ScopeState::Unbound {
            return Err(self.violation(LifecycleViolation::AlreadyBound).into());
        }

        let resolving = ResolveGuard::enter(&self.id, &mut self.state, &self.binding);
        debug!(workspace = %self.id, "scope resolving");

        let lease = match self.provider.cache.acquire(&self.id).await {
            Ok(lease) => {
                resolving.resolved();
                lease
            }
            Err(err) => {
                warn!(workspace = %self.id, error = %err, "scope failed to resolve");
                resolving.failed(err.clone());
                return Err(err.into());
            }
        };
        let handle = lease.handle().clone();
        self.lease = Some(lease);

        if let Some(policy) = self.provider.autosave {
            self.start_autosave(&handle, policy)?;
        }

        self.state = ScopeState::Bound;
        self.binding.send_replace(Binding::Ready(handle.clone()));
        info!(
            workspace = %self.id,
            generation = handle.generation(),
            autosave = self.autosave.is_some(),
            "scope bound"
        );
        Ok(handle)
    }

    /// Attach autosave to a bound scope whose provider did not.
    pub fn attach_autosave(&mut self, policy: AutosavePolicy) -> Result<(), WorkspaceError> {
        let handle = match (&self.state, self.handle()) {
            (ScopeState::Bound, Some(handle)) => handle.clone(),
            _ => return Err(self.violation(LifecycleViolation::NotBound).into()),
        };
        self.start_autosave(&handle, policy)?;
        Ok(())
    }

    fn start_autosave(
        &mut self,
        handle: &Handle,
        policy: AutosavePolicy,
    ) -> Result<(), LifecycleViolation> {
        if self.autosave.is_some() {
            return Err(self.violation(LifecycleViolation::AutosaveAlreadyAttached));
        }
        self.autosave = Some(autosave::attach(
            handle,
            Arc::clone(&self.provider.persistence),
            Arc::clone(&self.provider.reporter),
            policy,
        ));
        Ok(())
    }

    /// Tear the scope down.
    ///
    /// Contexts stop serving the handle first, then autosave is stopped and
    /// awaited, then the lease is released. Returns the autosave report, or
    /// `None` if no autosave was attached.
    pub async fn unbind(&mut self) -> Result<Option<AutosaveReport>, LifecycleViolation> {
        if self.state != ScopeState::Bound {
            return Err(self.violation(LifecycleViolation::NotBound));
        }

        self.state = ScopeState::Unbinding;
        self.binding.send_replace(Binding::Released);

        let teardown = Teardown {
            state: &mut self.state,
            lease: &mut self.lease,
        };
        let report = match self.autosave.take() {
            Some(autosave) => Some(autosave.stop().await),
            None => None,
        };
        drop(teardown);

        info!(workspace = %self.id, "scope unbound");
        Ok(report)
    }

    fn violation(&self, violation: LifecycleViolation) -> LifecycleViolation {
        error!(
            workspace = %self.id,
            state = ?self.state,
            error = %violation,
            "scope lifecycle violation"
        );
        violation
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        match self.state {
            ScopeState::Unbound => {}
            ScopeState::Resolving => {
                debug!(workspace = %self.id, "scope dropped while resolving");
            }
            ScopeState::Bound | ScopeState::Unbinding => {
                warn!(workspace = %self.id, state = ?self.state, "scope dropped without unbind");
            }
        }
        self.binding.send_replace(Binding::Released);
        // Dropping the fields aborts autosave and releases the lease.
    }
}

/// Holds a scope in `Resolving` and puts it back to `Unbound` if the
/// resolve is abandoned.
struct ResolveGuard<'a> {
    id: &'a WorkspaceId,
    state: &'a mut ScopeState,
    binding: &'a watch::Sender<Binding>,
    armed: bool,
}

impl<'a> ResolveGuard<'a> {
    fn enter(
        id: &'a WorkspaceId,
        state: &'a mut ScopeState,
        binding: &'a watch::Sender<Binding>,
    ) -> Self {
        *state = ScopeState::Resolving;
        binding.send_replace(Binding::Pending);
        Self {
            id,
            state,
            binding,
            armed: true,
        }
    }

    /// The caller finishes the transition to `Bound`.
    fn resolved(mut self) {
        self.armed = false;
    }

    fn failed(mut self, err: ConstructionError) {
        self.armed = false;
        *self.state = ScopeState::Unbound;
        self.binding.send_replace(Binding::Failed(err));
    }
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state = ScopeState::Unbound;
            self.binding.send_replace(Binding::Released);
            debug!(workspace = %self.id, "scope resolve abandoned");
        }
    }
}

/// Releases the lease and marks the scope `Unbound`, whether or not the
/// autosave stop ran to completion.
struct Teardown<'a> {
    state: &'a mut ScopeState,
    lease: &'a mut Option<Lease>,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.lease.take();
        *self.state = ScopeState::Unbound;
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("autosave", &self.autosave.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
