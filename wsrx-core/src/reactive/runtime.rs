//! Reactive Runtime
//!
//! The runtime coordinates change notification between sources (cells and
//! selectors) and their subscribers.
//!
//! # How It Works
//!
//! 1. When a source changes, it hands itself to [`Runtime::notify`].
//!
//! 2. If no notification cycle is running on this thread, one is opened and
//!    the source's subscribers run immediately.
//!
//! 3. If a cycle is already running (a subscriber wrote to a cell, or we are
//!    inside [`Runtime::batch`]), the source is appended to the cycle's queue
//!    instead. The outermost cycle drains the queue in FIFO order.
//!
//! Because of step 3 no source's subscribers are ever dispatched
//! recursively, and changes are delivered in the order they were made. A
//! source that is already queued and has not been dispatched yet is not
//! queued twice; its subscribers read the latest value when they run.
//!
//! # Thread Safety
//!
//! Sources are `Send + Sync` and may be written from any thread. The cycle
//! itself is thread-local: notifications never cross threads, they run on
//! the thread that made the change.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::subscriber::{Notify, Subscription};

/// Unique identifier for a reactive source (a cell or a selector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A type-erased reactive source.
///
/// Implemented by the shared state behind [`Cell`](super::Cell) and
/// [`Selector`](super::Selector). The [`Tracker`](super::Tracker) stores
/// reads as `Arc<dyn Source>` so a computation can subscribe to whatever it
/// touched without knowing the value types.
pub trait Source: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// Register a callback run after every change of this source.
    fn subscribe(&self, notify: Notify) -> Subscription;

    /// Run every registered callback. Called by the runtime only.
    fn notify_subscribers(&self);
}

thread_local! {
    static CYCLE: RefCell<Option<Cycle>> = const { RefCell::new(None) };
}

#[derive(Default)]
struct Cycle {
    queue: VecDeque<Arc<dyn Source>>,
    queued: HashSet<SourceId>,
}

impl Cycle {
    fn push(&mut self, source: Arc<dyn Source>) {
        if self.queued.insert(source.source_id()) {
            self.queue.push_back(source);
        }
    }

    fn pop(&mut self) -> Option<Arc<dyn Source>> {
        let source = self.queue.pop_front()?;
        self.queued.remove(&source.source_id());
        Some(source)
    }
}

/// Closes the thread's cycle when dropped, including during unwinding, so a
/// panicking subscriber cannot leave the thread stuck in a dead cycle.
struct CycleGuard;

impl CycleGuard {
    /// Open a cycle if none is running. Returns `None` when nested.
    fn open() -> Option<Self> {
        CYCLE.with(|cycle| {
            let mut cycle = cycle.borrow_mut();
            if cycle.is_some() {
                None
            } else {
                *cycle = Some(Cycle::default());
                Some(CycleGuard)
            }
        })
    }

    fn drain(&self) {
        loop {
            let next = CYCLE.with(|cycle| cycle.borrow_mut().as_mut().and_then(Cycle::pop));
            match next {
                Some(source) => source.notify_subscribers(),
                None => break,
            }
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        CYCLE.with(|cycle| {
            cycle.borrow_mut().take();
        });
    }
}

/// The reactive runtime.
///
/// Stateless handle over the thread-local notification cycle.
pub struct Runtime;

impl Runtime {
    /// Announce that `source` changed.
    pub fn notify(source: Arc<dyn Source>) {
        let guard = CycleGuard::open();

        CYCLE.with(|cycle| {
            if let Some(cycle) = cycle.borrow_mut().as_mut() {
                cycle.push(source);
            }
        });

        if let Some(guard) = guard {
            guard.drain();
        }
    }

    /// Run `f` with notifications deferred until it returns.
    ///
    /// Every source written inside `f` notifies its subscribers once, after
    /// `f` completes. Nested batches join the outer one.
    pub fn batch<R>(f: impl FnOnce() -> R) -> R {
        let guard = CycleGuard::open();
        let result = f();
        if let Some(guard) = guard {
            guard.drain();
        }
        result
    }

    /// Check if a notification cycle is running on this thread.
    pub fn in_cycle() -> bool {
        CYCLE.with(|cycle| cycle.borrow().is_some())
    }

    /// Number of sources waiting in the current cycle's queue.
    pub fn pending() -> usize {
        CYCLE.with(|cycle| cycle.borrow().as_ref().map_or(0, |c| c.queue.len()))
    }
}
