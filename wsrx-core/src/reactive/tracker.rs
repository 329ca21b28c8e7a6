//! Dependency Tracker
//!
//! A [`Tracker`] is handed to every selector and effect computation. Reading
//! a source through it records that source as a dependency; after the
//! computation returns, the caller subscribes to exactly what was recorded.
//!
//! Tracking is explicit: there is no ambient "current computation". A read
//! that does not go through the tracker is not a dependency.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::runtime::{Source, SourceId};
use super::subscriber::{Notify, Subscription};

/// Anything a [`Tracker`] can read: cells and selectors.
pub trait Readable {
    type Value: Clone;

    /// The type-erased source to subscribe to.
    fn source(&self) -> Arc<dyn Source>;

    /// Read the current value without recording a dependency.
    fn get_untracked(&self) -> Self::Value;

    /// Borrow the current value without recording a dependency.
    fn with_untracked<U>(&self, f: impl FnOnce(&Self::Value) -> U) -> U;
}

/// Records which sources a computation read.
#[derive(Default)]
pub struct Tracker {
    reads: RefCell<SmallVec<[Arc<dyn Source>; 4]>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a source's value and record it as a dependency.
    pub fn read<R: Readable>(&self, source: &R) -> R::Value {
        self.track(source);
        source.get_untracked()
    }

    /// Borrow a source's value and record it as a dependency.
    pub fn read_with<R: Readable, U>(&self, source: &R, f: impl FnOnce(&R::Value) -> U) -> U {
        self.track(source);
        source.with_untracked(f)
    }

    /// Record a dependency without reading the value.
    pub fn track<R: Readable>(&self, source: &R) {
        let source = source.source();
        let mut reads = self.reads.borrow_mut();
        let id = source.source_id();
        if !reads.iter().any(|read| read.source_id() == id) {
            reads.push(source);
        }
    }

    /// Ids of the recorded sources, in first-read order.
    pub fn dependencies(&self) -> Vec<SourceId> {
        self.reads.borrow().iter().map(|s| s.source_id()).collect()
    }

    pub fn dependency_count(&self) -> usize {
        self.reads.borrow().len()
    }

    pub(crate) fn into_reads(self) -> SmallVec<[Arc<dyn Source>; 4]> {
        self.reads.into_inner()
    }
}

/// The live subscriptions of one computation.
///
/// Shared by selectors and effects: after each run the recorded reads
/// replace the previous set. Subscriptions are only rebuilt when the set of
/// sources actually changed.
#[derive(Default)]
pub(crate) struct Dependencies {
    entries: Mutex<SmallVec<[(SourceId, Subscription); 4]>>,
}

impl Dependencies {
    pub(crate) fn replace(
        &self,
        reads: SmallVec<[Arc<dyn Source>; 4]>,
        notify: impl Fn() -> Notify,
    ) {
        let mut entries = self.entries.lock();

        let unchanged = entries.len() == reads.len()
            && entries
                .iter()
                .zip(reads.iter())
                .all(|((id, _), read)| *id == read.source_id());
        if unchanged {
            return;
        }

        // Drop the stale subscriptions outside the lock.
        let stale = std::mem::take(&mut *entries);
        for read in reads {
            let subscription = read.subscribe(notify());
            entries.push((read.source_id(), subscription));
        }
        drop(entries);
        drop(stale);
    }

    pub(crate) fn clear(&self) {
        let stale = std::mem::take(&mut *self.entries.lock());
        drop(stale);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn ids(&self) -> Vec<SourceId> {
        self.entries.lock().iter().map(|(id, _)| *id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Cell;

    #[test]
    fn records_reads_once_in_order() {
        let a = Cell::new(1);
        let b = Cell::new(2);
        let tracker = Tracker::new();

        assert_eq!(tracker.read(&b), 2);
        assert_eq!(tracker.read(&a), 1);
        assert_eq!(tracker.read(&b), 2);

        assert_eq!(tracker.dependencies(), vec![b.id(), a.id()]);
    }

    #[test]
    fn track_records_without_reading() {
        let cell = Cell::new(String::from("large"));
        let tracker = Tracker::new();

        tracker.track(&cell);
        assert_eq!(tracker.dependency_count(), 1);
    }

    #[test]
    fn read_with_borrows_value() {
        let cell = Cell::new(vec![1, 2, 3]);
        let tracker = Tracker::new();

        let len = tracker.read_with(&cell, |v| v.len());
        assert_eq!(len, 3);
        assert_eq!(tracker.dependencies(), vec![cell.id()]);
    }

    #[test]
    fn untracked_reads_are_not_dependencies() {
        let cell = Cell::new(0);
        let tracker = Tracker::new();

        let _ = cell.get();
        assert_eq!(tracker.dependency_count(), 0);
    }

    #[test]
    fn dependencies_resubscribe_only_when_set_changes() {
        let a = Cell::new(0);
        let b = Cell::new(0);
        let deps = Dependencies::default();
        let noop = || -> Notify { Arc::new(|| {}) };

        let tracker = Tracker::new();
        tracker.track(&a);
        deps.replace(tracker.into_reads(), noop);
        assert_eq!(a.subscriber_count(), 1);

        let tracker = Tracker::new();
        tracker.track(&a);
        deps.replace(tracker.into_reads(), noop);
        assert_eq!(a.subscriber_count(), 1);

        let tracker = Tracker::new();
        tracker.track(&b);
        deps.replace(tracker.into_reads(), noop);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(deps.ids(), vec![b.id()]);

        deps.clear();
        assert_eq!(b.subscriber_count(), 0);
        assert_eq!(deps.len(), 0);
    }
}
