//! Wsrx Core
//!
//! Reactive workspace handles for editor front ends. This crate provides:
//!
//! - Reactive primitives (cells, selectors, effects) with explicit
//!   dependency tracking
//! - A single-flight handle cache keyed by workspace id
//! - Slice-granular projections over a workspace's tree and shells
//! - An autosave trigger bound to the lifetime of a scope
//! - Scopes that own a handle lease and publish it to nested consumers
//!
//! # Architecture
//!
//! - `reactive`: Cells, selectors, effects and the notification runtime
//! - `workspace`: The workspace entity and the source that loads it
//! - `handle`: Handles, the handle cache and projections
//! - `autosave`: The autosave process and its persistence collaborators
//! - `scope`: Providers, scopes and scope-local lookup
//! - `config`: JSON configuration mapped onto the policies above
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wsrx_core::autosave::MemoryPersistence;
//! use wsrx_core::handle::HandleCache;
//! use wsrx_core::scope::Provider;
//! use wsrx_core::workspace::{MemorySource, Shell, Workspace};
//!
//! # async fn demo() -> Result<(), wsrx_core::WorkspaceError> {
//! let source = MemorySource::new();
//! source.insert(Workspace::new("ws-1"));
//!
//! let provider = Provider::new(HandleCache::new(source), MemoryPersistence::new());
//!
//! provider
//!     .run("ws-1", |ctx| async move {
//!         let handle = ctx.handle().await?;
//!         let open = handle.project(|ws| ws.with_shells(|s| s.len()));
//!
//!         handle.open_shell(Shell::new("s1", "notes"));
//!         assert_eq!(open.get(), 1);
//!         Ok::<_, wsrx_core::WorkspaceError>(())
//!     })
//!     .await??;
//! # Ok(())
//! # }
//! ```

pub mod autosave;
pub mod config;
pub mod error;
pub mod handle;
pub mod reactive;
pub mod scope;
pub mod workspace;

pub use error::{
    ConfigError, ConstructionError, LifecycleViolation, PersistenceError, WorkspaceError,
};
pub use handle::{Handle, HandleCache, ObservedValue};
pub use scope::{Provider, Scope, ScopeContext};
pub use workspace::{Workspace, WorkspaceId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
