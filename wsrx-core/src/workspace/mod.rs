//! Workspace Entity
//!
//! A [`Workspace`] is the plain data of one opened workspace: its document
//! [`Tree`] and its open editor [`Shells`]. Workspaces are produced by a
//! [`WorkspaceSource`] and handed to the handle cache, which wraps their
//! mutable fields in reactive cells. Nothing in this crate changes a
//! workspace's [`WorkspaceId`].

mod shells;
mod source;
mod tree;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use shells::{Shell, ShellId, Shells};
pub use source::{MemorySource, SourceError, WorkspaceSource};
pub use tree::{Tree, TreeError, TreeNode};

/// Stable identity of a workspace, used as the memoization key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(Arc<str>);

impl WorkspaceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkspaceId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// Why a workspace cannot be turned into a handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceInvalid {
    #[error("empty node name under `{parent}`")]
    EmptyName { parent: String },

    #[error("duplicate entry `{path}` in tree")]
    DuplicateSibling { path: String },

    #[error("shell `{shell}` points at `{path}`, which is not a file in the tree")]
    DanglingShell { shell: ShellId, path: String },
}

/// One opened workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    id: WorkspaceId,
    pub tree: Tree,
    pub shells: Shells,
}

impl Workspace {
    pub fn new(id: impl Into<WorkspaceId>) -> Self {
        Self {
            id: id.into(),
            tree: Tree::new(),
            shells: Shells::new(),
        }
    }

    pub fn with_tree(mut self, tree: Tree) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_shells(mut self, shells: Shells) -> Self {
        self.shells = shells;
        self
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    /// Check the structural invariants a handle relies on.
    pub fn validate(&self) -> Result<(), WorkspaceInvalid> {
        validate_level(self.tree.roots(), "")?;

        for shell in self.shells.iter() {
            if let Some(path) = &shell.path {
                if !self.tree.is_file(path) {
                    return Err(WorkspaceInvalid::DanglingShell {
                        shell: shell.id.clone(),
                        path: path.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn validate_level(nodes: &[TreeNode], parent: &str) -> Result<(), WorkspaceInvalid> {
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        let name = node.name();
        if name.is_empty() || name.contains('/') {
            return Err(WorkspaceInvalid::EmptyName {
                parent: parent.to_string(),
            });
        }

        let path = if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        };
        if !seen.insert(name) {
            return Err(WorkspaceInvalid::DuplicateSibling { path });
        }
        if let TreeNode::Folder { children, .. } = node {
            validate_level(children, &path)?;
        }
    }
    Ok(())
}

/// Point-in-time copy of a workspace handed to persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub id: WorkspaceId,
    /// Total number of mutations applied since the handle was built.
    pub revision: u64,
    pub tree: Tree,
    pub shells: Shells,
}

impl WorkspaceSnapshot {
    pub fn into_workspace(self) -> Workspace {
        Workspace {
            id: self.id,
            tree: self.tree,
            shells: self.shells,
        }
    }
}
