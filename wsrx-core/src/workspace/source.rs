//! Where workspaces come from.
//!
//! The handle cache never builds a [`Workspace`] itself; it asks a
//! [`WorkspaceSource`] for one by id. Loading is asynchronous and may fail.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use thiserror::Error;

use super::{Workspace, WorkspaceId};

/// Error returned by a [`WorkspaceSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Upstream factory of workspaces.
///
/// Returns boxed futures so sources can be shared as `Arc<dyn WorkspaceSource>`.
pub trait WorkspaceSource: Send + Sync + 'static {
    fn load(&self, id: WorkspaceId) -> BoxFuture<'static, Result<Workspace, SourceError>>;
}

/// In-memory source. Serves clones of the workspaces inserted into it.
#[derive(Default)]
pub struct MemorySource {
    workspaces: DashMap<WorkspaceId, Workspace>,
    loads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, workspace: Workspace) {
        self.workspaces.insert(workspace.id().clone(), workspace);
    }

    pub fn remove(&self, id: &WorkspaceId) -> Option<Workspace> {
        self.workspaces.remove(id).map(|(_, ws)| ws)
    }

    /// Number of `load` calls served so far, successful or not.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl WorkspaceSource for MemorySource {
    fn load(&self, id: WorkspaceId) -> BoxFuture<'static, Result<Workspace, SourceError>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let result = self
            .workspaces
            .get(&id)
            .map(|ws| ws.value().clone())
            .ok_or_else(|| SourceError::new(format!("workspace `{id}` not found")));
        Box::pin(future::ready(result))
    }
}
