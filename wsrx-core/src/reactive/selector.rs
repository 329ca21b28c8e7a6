//! Selector Implementation
//!
//! A Selector is a cached derived value with automatic dependency tracking
//! and value-based change suppression.
//!
//! # How Selectors Work
//!
//! 1. On first access the selector runs its computation with a fresh
//!    [`Tracker`], caches the result, and subscribes to exactly the sources
//!    the tracker recorded.
//!
//! 2. When one of those sources changes:
//!    - if nobody observes the selector, it is only marked dirty and
//!      recomputes on next access (lazy);
//!    - if it has subscribers, it recomputes immediately and notifies them
//!      only when the new value differs from the cached one.
//!
//! 3. Each recomputation re-records dependencies, so a selector whose
//!    computation branches follows whichever sources it actually read.
//!
//! When a recomputation yields a value equal to the cached one, the cached
//! value is kept. Repeated reads of an unchanged slice therefore return the
//! same value and never wake observers.
//!
//! # Thread Safety
//!
//! Recomputations of one selector are serialized: a recompute holds the
//! selector's lock from the first read until its result is stored, so a
//! write made on another thread meanwhile is recomputed after it, never
//! before. Every stored value carries a sequence number, and an observer is
//! only called with values newer than the last one it saw.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use super::runtime::{Runtime, Source, SourceId};
use super::subscriber::{Notify, SubscriberList, Subscription};
use super::tracker::{Dependencies, Readable, Tracker};

type Compute<T> = dyn Fn(&Tracker) -> T + Send + Sync;

struct Cached<T> {
    value: T,
    seq: u64,
}

struct SelectorInner<T> {
    id: SourceId,
    me: Weak<SelectorInner<T>>,
    compute: Box<Compute<T>>,
    value: RwLock<Option<Cached<T>>>,
    /// Held across compute and store. Reentrant so a computation that writes
    /// one of its own sources on this thread does not deadlock.
    serial: ReentrantMutex<()>,
    dirty: AtomicBool,
    dependencies: Dependencies,
    subscribers: Arc<SubscriberList>,
    recomputations: AtomicU64,
}

impl<T> SelectorInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn get(&self) -> T {
        if !self.dirty.load(Ordering::SeqCst) {
            if let Some(cached) = self.value.read().as_ref() {
                return cached.value.clone();
            }
        }
        self.recompute().0
    }

    /// Run the computation. Returns the current value and whether it changed.
    fn recompute(&self) -> (T, bool) {
        let _serial = self.serial.lock();
        self.dirty.store(false, Ordering::SeqCst);

        let tracker = Tracker::new();
        let computed = (self.compute)(&tracker);

        let me = self.me.clone();
        self.dependencies.replace(tracker.into_reads(), move || -> Notify {
            let me = me.clone();
            Arc::new(move || {
                if let Some(selector) = me.upgrade() {
                    selector.dependency_changed();
                }
            })
        });

        self.recomputations.fetch_add(1, Ordering::Relaxed);

        let mut slot = self.value.write();
        if let Some(current) = slot.as_ref() {
            if current.value == computed {
                return (current.value.clone(), false);
            }
        }
        let seq = slot.as_ref().map_or(1, |c| c.seq + 1);
        *slot = Some(Cached {
            value: computed.clone(),
            seq,
        });
        (computed, true)
    }

    fn dependency_changed(&self) {
        if self.subscribers.is_empty() {
            self.dirty.store(true, Ordering::SeqCst);
            return;
        }

        let (_, changed) = self.recompute();
        if changed {
            if let Some(me) = self.me.upgrade() {
                Runtime::notify(me);
            }
        }
    }

    fn cached(&self) -> Option<(T, u64)> {
        self.value.read().as_ref().map(|c| (c.value.clone(), c.seq))
    }

    fn seq(&self) -> u64 {
        self.value.read().as_ref().map_or(0, |c| c.seq)
    }
}

impl<T> Source for SelectorInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, notify: Notify) -> Subscription {
        // An observed selector must hold a value to compare against, and
        // must be clean so it goes eager from here on.
        if self.dirty.load(Ordering::SeqCst) || self.value.read().is_none() {
            self.recompute();
        }
        self.subscribers.subscribe(notify)
    }

    fn notify_subscribers(&self) {
        self.subscribers.notify_all();
    }
}

/// A derived value that recomputes only when the sources it read change.
///
/// # Type Parameters
///
/// - `T`: The computed value. `PartialEq` is what lets a recomputation that
///   lands on the same value stay silent.
///
/// # Example
///
/// ```rust
/// use wsrx_core::reactive::{Cell, Selector};
///
/// let items = Cell::new(vec![1, 2, 3]);
/// let source = items.clone();
/// let count = Selector::new(move |t| t.read_with(&source, |v| v.len()));
///
/// assert_eq!(count.get(), 3);
/// items.update(|v| v.push(4));
/// assert_eq!(count.get(), 4);
/// ```
pub struct Selector<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<SelectorInner<T>>,
}

impl<T> Selector<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new selector. The computation runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&Tracker) -> T + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|me| SelectorInner {
            id: SourceId::next(),
            me: me.clone(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            serial: ReentrantMutex::new(()),
            dirty: AtomicBool::new(true),
            dependencies: Dependencies::default(),
            subscribers: SubscriberList::new(),
            recomputations: AtomicU64::new(0),
        });
        Self { inner }
    }

    /// Get the selector's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Register an observer called with each new distinct value.
    ///
    /// Values arrive in the order they were stored. A notification whose
    /// value was already superseded and delivered is skipped.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let me = Arc::downgrade(&self.inner);
        let delivered = Arc::new(Mutex::new(0u64));
        let last = delivered.clone();
        let subscription = self.inner.subscribe(Arc::new(move || {
            let Some((value, seq)) = me.upgrade().and_then(|s| s.cached()) else {
                return;
            };
            let mut last = last.lock();
            if seq > *last {
                *last = seq;
                observer(&value);
            }
        }));
        // The value current at subscription time is not a change.
        let current = self.inner.seq();
        let mut last = delivered.lock();
        *last = (*last).max(current);
        subscription
    }

    /// Whether the cached value is stale.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst) || self.inner.value.read().is_none()
    }

    /// How many times the computation has run.
    pub fn recomputations(&self) -> u64 {
        self.inner.recomputations.load(Ordering::Relaxed)
    }

    /// Sources the last computation read.
    pub fn dependencies(&self) -> Vec<SourceId> {
        self.inner.dependencies.ids()
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl<T> Readable for Selector<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    type Value = T;

    fn source(&self) -> Arc<dyn Source> {
        self.inner.clone()
    }

    fn get_untracked(&self) -> T {
        self.get()
    }

    fn with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.get())
    }
}

impl<T> Clone for Selector<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Selector<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.inner.id)
            .field("dirty", &self.is_dirty())
            .field("recomputations", &self.recomputations())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
