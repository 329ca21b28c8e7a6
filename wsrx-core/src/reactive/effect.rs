//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a source
//! it read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately with a fresh
//!    [`Tracker`] to establish initial dependencies.
//!
//! 2. When any recorded source changes, the effect runs again. Each run
//!    re-records its dependencies.
//!
//! 3. [`Effect::dispose`] drops every subscription. A disposed effect never
//!    runs again, even if a notification for it is already queued.
//!
//! # Differences from Selector
//!
//! - Selectors return a value; effects do not.
//! - Selectors are lazy until observed; effects are always eager.
//! - Selectors suppress equal results; effects run on every change.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::subscriber::Notify;
use super::tracker::{Dependencies, Tracker};

struct EffectInner {
    me: Weak<EffectInner>,
    run: Box<dyn Fn(&Tracker) + Send + Sync>,
    dependencies: Dependencies,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let tracker = Tracker::new();
        (self.run)(&tracker);
        self.run_count.fetch_add(1, Ordering::SeqCst);

        // Disposed mid-run: keep no subscriptions.
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let me = self.me.clone();
        self.dependencies.replace(tracker.into_reads(), move || -> Notify {
            let me = me.clone();
            Arc::new(move || {
                if let Some(effect) = me.upgrade() {
                    effect.execute();
                }
            })
        });
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Clones share state. When the last clone is dropped the effect's
/// subscriptions go with it.
///
/// # Example
///
/// ```rust
/// use wsrx_core::reactive::{Cell, Effect};
///
/// let count = Cell::new(0);
/// let source = count.clone();
/// let effect = Effect::new(move |t| {
///     println!("Count is: {}", t.read(&source));
/// });
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect. The function runs immediately.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&Tracker) + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it.
    ///
    /// It has no dependencies until the first [`execute`](Self::execute).
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn(&Tracker) + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|me| EffectInner {
            me: me.clone(),
            run: Box::new(run),
            dependencies: Dependencies::default(),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        Self { inner }
    }

    /// Run the effect now and re-record its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect. It unsubscribes from everything and never runs again.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.dependencies.clear();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Cell, Runtime};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move |_| {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let effect = Effect::new_lazy(|_| {});
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let cell = Cell::new(0);
        let observed = Arc::new(AtomicI32::new(-1));

        let (source, o) = (cell.clone(), observed.clone());
        let effect = Effect::new(move |t| {
            o.store(t.read(&source), Ordering::SeqCst);
        });
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert_eq!(effect.dependency_count(), 1);

        cell.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let cell = Cell::new(0);
        let source = cell.clone();
        let effect = Effect::new(move |t| t.track(&source));

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(cell.subscriber_count(), 0);

        cell.set(1);
        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn dropping_effect_unsubscribes() {
        let cell = Cell::new(0);
        let source = cell.clone();
        let effect = Effect::new(move |t| t.track(&source));
        assert_eq!(cell.subscriber_count(), 1);

        drop(effect);
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn disposal_inside_batch_suppresses_queued_run() {
        let cell = Cell::new(0);
        let source = cell.clone();
        let effect = Effect::new(move |t| t.track(&source));

        Runtime::batch(|| {
            cell.set(1);
            effect.dispose();
        });

        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|_| {});
        let effect2 = effect1.clone();

        effect1.execute();
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
