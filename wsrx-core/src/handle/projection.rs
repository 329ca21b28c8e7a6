//! Projection Accessors
//!
//! A projection is a pure function from workspace state to a slice of it,
//! observed on its own. Projections read the workspace through a
//! [`WorkspaceView`], which records every read, so a projection depends on
//! exactly the cells it touched: a tree-only projection is never woken by a
//! shells write.
//!
//! Projections are [`Selector`]s underneath. A recomputation that lands on
//! an equal value keeps the cached one and notifies nobody, so reading an
//! unchanged slice twice yields the same value without waking dependents.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use super::{Handle, WorkspaceRx};
use crate::reactive::{Readable, Selector, Source, Subscription, Tracker};
use crate::workspace::{Shells, Tree};

/// Tracked read access to a workspace, handed to projection functions.
pub struct WorkspaceView<'a> {
    rx: &'a WorkspaceRx,
    tracker: &'a Tracker,
}

impl<'a> WorkspaceView<'a> {
    pub fn tree(&self) -> Tree {
        self.tracker.read(&self.rx.tree)
    }

    pub fn shells(&self) -> Shells {
        self.tracker.read(&self.rx.shells)
    }

    /// Borrow the tree instead of cloning it.
    pub fn with_tree<U>(&self, f: impl FnOnce(&Tree) -> U) -> U {
        self.tracker.read_with(&self.rx.tree, f)
    }

    /// Borrow the shells instead of cloning them.
    pub fn with_shells<U>(&self, f: impl FnOnce(&Shells) -> U) -> U {
        self.tracker.read_with(&self.rx.shells, f)
    }

    /// The underlying tracker, for reading other sources in the same pass.
    pub fn tracker(&self) -> &'a Tracker {
        self.tracker
    }
}

/// Derive an observed slice of `handle`'s state.
///
/// ```rust
/// use wsrx_core::handle::{project, Handle};
/// use wsrx_core::workspace::{Shell, Workspace};
///
/// let handle = Handle::detached(Workspace::new("ws")).unwrap();
/// let open = project(&handle, |ws| ws.with_shells(|s| s.len()));
///
/// handle.open_shell(Shell::new("s1", "notes"));
/// assert_eq!(open.get(), 1);
/// ```
pub fn project<T, F>(handle: &Handle, selector: F) -> ObservedValue<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn(&WorkspaceView<'_>) -> T + Send + Sync + 'static,
{
    let rx = handle.workspace_rx().clone();
    ObservedValue::from_fn(move |tracker| selector(&WorkspaceView { rx: &rx, tracker }))
}

/// A live, read-only slice of workspace state.
///
/// Clones share the same selector.
pub struct ObservedValue<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    selector: Selector<T>,
}

impl<T> ObservedValue<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub fn new(selector: Selector<T>) -> Self {
        Self { selector }
    }

    pub(crate) fn from_fn<F>(compute: F) -> Self
    where
        F: Fn(&Tracker) -> T + Send + Sync + 'static,
    {
        Self::new(Selector::new(compute))
    }

    pub fn get(&self) -> T {
        self.selector.get()
    }

    /// Call `observer` with every new distinct value, in change order.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.selector.subscribe(observer)
    }

    /// Receive every new distinct value as an async stream.
    pub fn changes(&self) -> Changes<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.selector.subscribe(move |value: &T| {
            let _ = tx.send(value.clone());
        });
        Changes {
            rx,
            _subscription: subscription,
        }
    }

    /// Derive a projection of this projection.
    pub fn map<U, F>(&self, f: F) -> ObservedValue<U>
    where
        U: Clone + Send + Sync + PartialEq + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let source = self.selector.clone();
        ObservedValue::from_fn(move |tracker| tracker.read_with(&source, &f))
    }

    pub fn recomputations(&self) -> u64 {
        self.selector.recomputations()
    }

    pub fn subscriber_count(&self) -> usize {
        self.selector.subscriber_count()
    }

    pub fn selector(&self) -> &Selector<T> {
        &self.selector
    }
}

impl<T> Readable for ObservedValue<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    type Value = T;

    fn source(&self) -> Arc<dyn Source> {
        self.selector.source()
    }

    fn get_untracked(&self) -> T {
        self.selector.get()
    }

    fn with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.selector.with_untracked(f)
    }
}

impl<T> Clone for ObservedValue<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
        }
    }
}

impl<T> fmt::Debug for ObservedValue<T>
where
    T: Clone + Send + Sync + PartialEq + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservedValue").field(&self.selector).finish()
    }
}

/// Ordered stream of the distinct values of a projection.
///
/// Values are buffered from the moment `changes()` was called. The stream
/// ends once the projection itself is gone.
pub struct Changes<T> {
    rx: mpsc::UnboundedReceiver<T>,
    _subscription: Subscription,
}

impl<T> Changes<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next buffered value without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Changes<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
