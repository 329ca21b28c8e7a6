//! Subscriber types for the reactive system.
//!
//! A subscriber is any callback registered on a reactive source: a
//! selector's dependency hook, an effect, or a consumer's observer. Each one
//! is identified by a [`SubscriberId`] and kept alive by a [`Subscription`]
//! guard owned by whoever registered it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

/// Callback invoked when a source changes.
pub type Notify = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a subscriber.
///
/// Uses an atomic counter so ids are unique across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// The callbacks registered on one source.
///
/// Callbacks are cloned out before they run, so a callback may subscribe or
/// unsubscribe on the same list without deadlocking.
#[derive(Default)]
pub struct SubscriberList {
    entries: Mutex<Vec<(SubscriberId, Notify)>>,
}

impl SubscriberList {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a callback and return the guard that keeps it registered.
    pub fn subscribe(self: &Arc<Self>, notify: Notify) -> Subscription {
        let id = SubscriberId::new();
        self.entries.lock().push((id, notify));
        Subscription {
            id,
            list: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: SubscriberId) {
        self.entries.lock().retain(|(sub, _)| *sub != id);
    }

    /// Invoke every callback registered at the time of the call.
    pub fn notify_all(&self) {
        let callbacks: SmallVec<[Notify; 4]> = self
            .entries
            .lock()
            .iter()
            .map(|(_, notify)| Arc::clone(notify))
            .collect();

        for notify in callbacks {
            notify();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Keeps a callback registered on a source. Dropping it unsubscribes.
///
/// Only a weak reference to the source is held, so a subscription never
/// keeps its source alive.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    list: Weak<SubscriberList>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the source this subscription points at still exists.
    pub fn is_live(&self) -> bool {
        self.list.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
