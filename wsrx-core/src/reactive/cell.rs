//! Cell Implementation
//!
//! A Cell is the mutable reactive primitive. It holds a value, counts its
//! writes, and notifies subscribers after each write.
//!
//! # How Cells Work
//!
//! 1. Selectors and effects read a cell through a [`Tracker`](super::Tracker),
//!    which records the cell as a dependency.
//!
//! 2. After the computation, the selector or effect subscribes to the cells
//!    it recorded.
//!
//! 3. Every write bumps the cell's version and hands the cell to the
//!    [`Runtime`], which dispatches its subscribers without re-entrancy.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`. The write lock is released
//! before any subscriber runs, so subscribers may read (or write) the cell.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::runtime::{Runtime, Source, SourceId};
use super::subscriber::{Notify, SubscriberList, Subscription};
use super::tracker::Readable;

/// Shared state behind every clone of a [`Cell`].
struct CellInner<T> {
    id: SourceId,
    value: RwLock<T>,
    version: AtomicU64,
    subscribers: Arc<SubscriberList>,
}

impl<T> Source for CellInner<T>
where
    T: Send + Sync + 'static,
{
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, notify: Notify) -> Subscription {
        self.subscribers.subscribe(notify)
    }

    fn notify_subscribers(&self) {
        self.subscribers.notify_all();
    }
}

/// A mutable observable value of type T.
///
/// Clones share the same value and subscribers.
///
/// # Example
///
/// ```rust
/// use wsrx_core::reactive::Cell;
///
/// let count = Cell::new(0);
/// count.set(5);
/// count.update(|v| *v += 1);
/// assert_eq!(count.get(), 6);
/// assert_eq!(count.version(), 2);
/// ```
pub struct Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<CellInner<T>>,
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: SourceId::next(),
                value: RwLock::new(value),
                version: AtomicU64::new(0),
                subscribers: SubscriberList::new(),
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Get a clone of the current value.
    ///
    /// This does not record a dependency; use [`Tracker::read`](super::Tracker::read)
    /// inside computations.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value.
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.inner.value.read())
    }

    /// Number of writes since creation.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Set a new value and notify subscribers.
    pub fn set(&self, value: T) {
        self.replace(value);
    }

    /// Set a new value, returning the old one, and notify subscribers.
    pub fn replace(&self, value: T) -> T {
        let old = {
            let mut guard = self.inner.value.write();
            self.inner.version.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *guard, value)
        };
        self.changed();
        old
    }

    /// Mutate the value in place and notify subscribers.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut guard = self.inner.value.write();
            self.inner.version.fetch_add(1, Ordering::SeqCst);
            f(&mut guard)
        };
        self.changed();
        result
    }

    /// Register a callback run after every write.
    pub fn subscribe<F>(&self, notify: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(Arc::new(notify))
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    fn changed(&self) {
        Runtime::notify(self.inner.clone());
    }
}

impl<T> Readable for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn source(&self) -> Arc<dyn Source> {
        self.inner.clone()
    }

    fn get_untracked(&self) -> T {
        self.get()
    }

    fn with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.with(f)
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("version", &self.version())
            .field("value", &*self.inner.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
