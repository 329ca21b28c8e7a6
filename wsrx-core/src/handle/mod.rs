//! Workspace Handles
//!
//! A [`Handle`] is the resolved, shareable wrapper around one workspace. It
//! owns a [`WorkspaceRx`], the reactive cells holding the workspace's
//! mutable fields, and hands out projections over them.
//!
//! # Lifecycle
//!
//! Handles are built by the [`HandleCache`], at most one per workspace id at
//! a time. Every requester of the same id receives a clone of the same
//! handle; [`Handle::ptr_eq`] tells them apart from a later rebuild. A
//! handle stays usable after it has been evicted from the cache, it is just
//! no longer the one new requesters receive.
//!
//! # Mutations
//!
//! Each write to the tree or the shells is one mutation event. The helpers
//! on [`Handle`] skip writes that would change nothing, so closing a shell
//! that is not open does not wake observers or autosave. Writes made inside
//! [`Handle::batch`] notify once per cell after the batch returns.

mod cache;
mod projection;

use std::fmt;
use std::sync::Arc;

use crate::error::ConstructionError;
use crate::reactive::{Cell, Runtime};
use crate::workspace::{Shell, ShellId, Shells, Tree, Workspace, WorkspaceId, WorkspaceSnapshot};

pub use cache::{HandleCache, Lease, RetentionPolicy, DEFAULT_GRACE};
pub use projection::{project, Changes, ObservedValue, WorkspaceView};

/// Reactive cells over a workspace's mutable fields.
#[derive(Clone, Debug)]
pub struct WorkspaceRx {
    tree: Cell<Tree>,
    shells: Cell<Shells>,
}

impl WorkspaceRx {
    fn new(tree: Tree, shells: Shells) -> Self {
        Self {
            tree: Cell::new(tree),
            shells: Cell::new(shells),
        }
    }

    pub fn tree(&self) -> &Cell<Tree> {
        &self.tree
    }

    pub fn shells(&self) -> &Cell<Shells> {
        &self.shells
    }

    /// Mutations applied to either cell since construction.
    pub fn revision(&self) -> u64 {
        self.tree.version() + self.shells.version()
    }
}

struct HandleInner {
    id: WorkspaceId,
    generation: u64,
    rx: WorkspaceRx,
    tree: ObservedValue<Tree>,
    shells: ObservedValue<Shells>,
}

/// A live, shareable reference to one workspace's reactive state.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    /// Validate `workspace` and wrap it. `generation` tells successive
    /// constructions for the same id apart.
    pub(crate) fn build(workspace: Workspace, generation: u64) -> Result<Self, ConstructionError> {
        workspace.validate().map_err(|reason| ConstructionError::Invalid {
            id: workspace.id().clone(),
            reason,
        })?;

        let id = workspace.id().clone();
        let Workspace { tree, shells, .. } = workspace;
        let rx = WorkspaceRx::new(tree, shells);

        let cell = rx.tree.clone();
        let tree = ObservedValue::from_fn(move |t| t.read(&cell));
        let cell = rx.shells.clone();
        let shells = ObservedValue::from_fn(move |t| t.read(&cell));

        Ok(Self {
            inner: Arc::new(HandleInner {
                id,
                generation,
                rx,
                tree,
                shells,
            }),
        })
    }

    /// Build a handle that no cache knows about.
    pub fn detached(workspace: Workspace) -> Result<Self, ConstructionError> {
        Self::build(workspace, 0)
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.inner.id
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn workspace_rx(&self) -> &WorkspaceRx {
        &self.inner.rx
    }

    /// The tree projection. Every call returns the same underlying selector.
    pub fn tree(&self) -> ObservedValue<Tree> {
        self.inner.tree.clone()
    }

    /// The shells projection. Every call returns the same underlying selector.
    pub fn shells(&self) -> ObservedValue<Shells> {
        self.inner.shells.clone()
    }

    /// Derive a new projection. See [`project`].
    pub fn project<T, F>(&self, selector: F) -> ObservedValue<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn(&WorkspaceView<'_>) -> T + Send + Sync + 'static,
    {
        project(self, selector)
    }

    pub fn revision(&self) -> u64 {
        self.inner.rx.revision()
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        let rx = &self.inner.rx;
        WorkspaceSnapshot {
            id: self.inner.id.clone(),
            revision: rx.revision(),
            tree: rx.tree.get(),
            shells: rx.shells.get(),
        }
    }

    pub fn update_tree<R>(&self, f: impl FnOnce(&mut Tree) -> R) -> R {
        self.inner.rx.tree.update(f)
    }

    pub fn update_shells<R>(&self, f: impl FnOnce(&mut Shells) -> R) -> R {
        self.inner.rx.shells.update(f)
    }

    /// Open a shell, or update it in place. Returns `true` when it is new.
    pub fn open_shell(&self, shell: Shell) -> bool {
        let unchanged = self
            .inner
            .rx
            .shells
            .with(|shells| shells.get(&shell.id) == Some(&shell));
        if unchanged {
            return false;
        }
        self.update_shells(|shells| shells.open(shell))
    }

    pub fn close_shell(&self, id: &ShellId) -> Option<Shell> {
        if !self.inner.rx.shells.with(|shells| shells.contains(id)) {
            return None;
        }
        self.update_shells(|shells| shells.close(id))
    }

    /// Move a shell in the tab order. Returns `false` if it is not open.
    pub fn move_shell(&self, id: &ShellId, index: usize) -> bool {
        let Some((from, len)) = self
            .inner
            .rx
            .shells
            .with(|shells| shells.position(id).map(|from| (from, shells.len())))
        else {
            return false;
        };
        if from == index.min(len - 1) {
            return true;
        }
        self.update_shells(|shells| shells.move_to(id, index))
    }

    /// Apply several writes; observers are notified after `f` returns.
    pub fn batch<R>(&self, f: impl FnOnce(&WorkspaceRx) -> R) -> R {
        Runtime::batch(|| f(&self.inner.rx))
    }

    /// Whether two handles are the same construction.
    pub fn ptr_eq(a: &Handle, b: &Handle) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("generation", &self.inner.generation)
            .field("revision", &self.revision())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
