//! Error types.
//!
//! Construction and persistence errors are `Clone`: one construction outcome
//! is handed to every caller that joined it, and one persistence failure may
//! be both logged and forwarded.

use std::path::PathBuf;

use thiserror::Error;

use crate::workspace::{WorkspaceId, WorkspaceInvalid};

/// A handle could not be built for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("failed to load workspace `{id}`: {message}")]
    Source { id: WorkspaceId, message: String },

    #[error("workspace `{id}` is invalid: {reason}")]
    Invalid { id: WorkspaceId, reason: WorkspaceInvalid },

    #[error("requested workspace `{requested}` but source returned `{returned}`")]
    IdentityMismatch {
        requested: WorkspaceId,
        returned: WorkspaceId,
    },

    #[error("construction of workspace `{id}` aborted: {reason}")]
    Aborted { id: WorkspaceId, reason: String },
}

impl ConstructionError {
    pub fn workspace(&self) -> &WorkspaceId {
        match self {
            Self::Source { id, .. } | Self::Invalid { id, .. } | Self::Aborted { id, .. } => id,
            Self::IdentityMismatch { requested, .. } => requested,
        }
    }
}

/// The persistence collaborator failed to save a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to persist workspace `{id}`: {message}")]
pub struct PersistenceError {
    pub id: WorkspaceId,
    pub message: String,
}

impl PersistenceError {
    pub fn new(id: WorkspaceId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

/// A caller broke the scope lifecycle contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleViolation {
    #[error("handle read before the scope resolved it")]
    NotResolved,

    #[error("scope is already bound")]
    AlreadyBound,

    #[error("autosave is already attached to this scope")]
    AutosaveAlreadyAttached,

    #[error("scope has been released")]
    ScopeReleased,

    #[error("scope is not bound")]
    NotBound,
}

/// Anything a scope operation can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleViolation),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T, E = WorkspaceError> = std::result::Result<T, E>;
