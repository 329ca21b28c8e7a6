//! Autosave Trigger
//!
//! [`attach`] starts a background process that watches a handle's tree and
//! shells and persists a snapshot after they change.
//!
//! # How It Works
//!
//! 1. An [`Effect`] tracks both workspace cells. Its first run only
//!    establishes the subscriptions; every later run is one mutation event,
//!    sent to the autosave task over a channel.
//!
//! 2. The task debounces: each event pushes the save deadline out by
//!    [`AutosavePolicy::debounce`]. When the deadline passes without a new
//!    event, it takes a snapshot and calls [`Persistence::persist`].
//!
//! 3. A failed save is logged and handed to the [`ErrorReporter`]. The task
//!    keeps running; the next mutation schedules the next attempt.
//!
//! # Stopping
//!
//! [`Autosave::stop`] disposes the effect so no new events arrive, signals
//! the task, and waits for it to finish. With `flush_on_stop`, mutations
//! that were still waiting for their deadline are saved before the task
//! ends. Either way, once `stop` returns no persist call will ever start.
//!
//! Dropping an [`Autosave`] without stopping it aborts the task.

mod persistence;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::handle::Handle;
use crate::reactive::Effect;
use crate::workspace::WorkspaceId;

pub use persistence::{
    ChannelReporter, ErrorReporter, MemoryPersistence, Persistence, TracingReporter,
};
#[cfg(test)]
pub(crate) use persistence::StalledPersistence;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(10);
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(60);

/// When autosave persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosavePolicy {
    debounce: Duration,
    flush_on_stop: bool,
}

impl AutosavePolicy {
    /// Trailing debounce of `debounce`, clamped to
    /// [`MIN_DEBOUNCE`]..=[`MAX_DEBOUNCE`].
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce: debounce.clamp(MIN_DEBOUNCE, MAX_DEBOUNCE),
            flush_on_stop: true,
        }
    }

    pub fn with_flush_on_stop(mut self, flush: bool) -> Self {
        self.flush_on_stop = flush;
        self
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn flush_on_stop(&self) -> bool {
        self.flush_on_stop
    }
}

impl Default for AutosavePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

/// Counters of one autosave run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutosaveReport {
    pub mutations_observed: u64,
    pub saves_attempted: u64,
    pub saves_failed: u64,
}

#[derive(Default)]
struct Counters {
    mutations: AtomicU64,
    attempted: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn report(&self) -> AutosaveReport {
        AutosaveReport {
            mutations_observed: self.mutations.load(Ordering::SeqCst),
            saves_attempted: self.attempted.load(Ordering::SeqCst),
            saves_failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Start autosaving `handle`. Must be called from within a tokio runtime.
pub fn attach(
    handle: &Handle,
    persistence: Arc<dyn Persistence>,
    reporter: Arc<dyn ErrorReporter>,
    policy: AutosavePolicy,
) -> Autosave {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let counters = Arc::new(Counters::default());

    let rx = handle.workspace_rx().clone();
    let primed = AtomicBool::new(false);
    let observer = Effect::new(move |t| {
        t.track(rx.tree());
        t.track(rx.shells());
        if primed.swap(true, Ordering::SeqCst) {
            let _ = events_tx.send(());
        }
    });

    let saver = Saver {
        handle: handle.clone(),
        persistence,
        reporter,
        counters: counters.clone(),
    };
    let task = tokio::spawn(autosave_loop(saver, policy, events_rx, shutdown_rx));

    info!(
        workspace = %handle.id(),
        debounce_ms = policy.debounce.as_millis() as u64,
        flush_on_stop = policy.flush_on_stop,
        "autosave attached"
    );

    Autosave {
        id: handle.id().clone(),
        observer,
        shutdown_tx,
        task: Some(task),
        counters,
    }
}

/// A running autosave process.
pub struct Autosave {
    id: WorkspaceId,
    observer: Effect,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Autosave {
    pub fn workspace(&self) -> &WorkspaceId {
        &self.id
    }

    /// Counters so far.
    pub fn stats(&self) -> AutosaveReport {
        self.counters.report()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop observing and wait for the task to finish.
    ///
    /// If this future is dropped before the task finishes, the task is
    /// aborted like on [`Drop`].
    pub async fn stop(mut self) -> AutosaveReport {
        self.observer.dispose();
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.as_mut() {
            let joined = task.await;
            self.task = None;
            if let Err(err) = joined {
                warn!(workspace = %self.id, error = %err, "autosave task ended abnormally");
            }
        }

        let report = self.counters.report();
        info!(
            workspace = %self.id,
            mutations = report.mutations_observed,
            saves = report.saves_attempted,
            failed = report.saves_failed,
            "autosave stopped"
        );
        report
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.observer.dispose();
            task.abort();
            warn!(workspace = %self.id, "autosave dropped without stop, task aborted");
        }
    }
}

impl std::fmt::Debug for Autosave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autosave")
            .field("workspace", &self.id)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

struct Saver {
    handle: Handle,
    persistence: Arc<dyn Persistence>,
    reporter: Arc<dyn ErrorReporter>,
    counters: Arc<Counters>,
}

impl Saver {
    async fn save(&self) {
        let snapshot = self.handle.snapshot();
        let revision = snapshot.revision;
        self.counters.attempted.fetch_add(1, Ordering::SeqCst);

        match self.persistence.persist(snapshot).await {
            Ok(()) => {
                debug!(workspace = %self.handle.id(), revision, "workspace autosaved");
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(workspace = %self.handle.id(), revision, error = %err, "autosave failed");
                self.reporter.report(err);
            }
        }
    }

    fn observed(&self) {
        self.counters.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

async fn autosave_loop(
    saver: Saver,
    policy: AutosavePolicy,
    mut events: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let wait = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!(workspace = %saver.handle.id(), "autosave loop shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(()) => {
                    saver.observed();
                    deadline = Some(Instant::now() + policy.debounce);
                }
                None => break,
            },
            () = wait => {
                deadline = None;
                saver.save().await;
            }
        }
    }

    // Events sent before the observer was disposed.
    let mut pending = deadline.is_some();
    while events.try_recv().is_ok() {
        saver.observed();
        pending = true;
    }

    if pending {
        if policy.flush_on_stop {
            saver.save().await;
        } else {
            debug!(workspace = %saver.handle.id(), "dropping unsaved mutations on stop");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{Shell, Workspace};

    const DEBOUNCE: Duration = Duration::from_millis(100);

    fn setup(policy: AutosavePolicy) -> (Handle, Arc<MemoryPersistence>, Autosave) {
        let handle = Handle::detached(Workspace::new("ws")).unwrap();
        let persistence = MemoryPersistence::new();
        let autosave = attach(&handle, persistence.clone(), Arc::new(TracingReporter), policy);
        (handle, persistence, autosave)
    }

    async fn settle() {
        time::sleep(DEBOUNCE + Duration::from_millis(1)).await;
    }

    #[test]
    fn policy_clamps_debounce() {
        assert_eq!(AutosavePolicy::new(Duration::ZERO).debounce(), MIN_DEBOUNCE);
        assert_eq!(AutosavePolicy::new(Duration::from_secs(3600)).debounce(), MAX_DEBOUNCE);
        assert_eq!(AutosavePolicy::default().debounce(), DEFAULT_DEBOUNCE);
        assert!(AutosavePolicy::default().flush_on_stop());
    }

    #[tokio::test(start_paused = true)]
    async fn attaching_alone_does_not_save() {
        let (_handle, persistence, autosave) = setup(AutosavePolicy::new(DEBOUNCE));
        settle().await;

        assert_eq!(persistence.calls(), 0);
        assert_eq!(autosave.stop().await, AutosaveReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_saves_after_debounce() {
        let (handle, persistence, autosave) = setup(AutosavePolicy::new(DEBOUNCE));

        handle.open_shell(Shell::new("s1", "one"));
        time::sleep(DEBOUNCE / 2).await;
        assert_eq!(persistence.calls(), 0);

        settle().await;
        assert_eq!(persistence.calls(), 1);
        assert_eq!(persistence.last().map(|s| s.shells.len()), Some(1));

        let report = autosave.stop().await;
        assert_eq!(report.mutations_observed, 1);
        assert_eq!(report.saves_attempted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_mutations_saves_once() {
        let (handle, persistence, autosave) = setup(AutosavePolicy::new(DEBOUNCE));

        for i in 0..5 {
            handle.open_shell(Shell::new(format!("s{i}").as_str(), "shell"));
            time::sleep(DEBOUNCE / 4).await;
        }
        settle().await;

        assert_eq!(persistence.calls(), 1);
        assert_eq!(persistence.last().map(|s| s.revision), Some(5));
        assert_eq!(autosave.stop().await.mutations_observed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_flushes_pending_mutation() {
        let (handle, persistence, autosave) = setup(AutosavePolicy::new(DEBOUNCE));

        handle.update_tree(|t| t.insert_file("a.md").unwrap());
        let report = autosave.stop().await;

        assert_eq!(report.saves_attempted, 1);
        assert_eq!(persistence.calls(), 1);

        // Nothing fires after stop returned.
        handle.update_tree(|t| t.insert_file("b.md").unwrap());
        settle().await;
        assert_eq!(persistence.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_flush_never_saves_pending() {
        let policy = AutosavePolicy::new(DEBOUNCE).with_flush_on_stop(false);
        let (handle, persistence, autosave) = setup(policy);

        handle.update_tree(|t| t.insert_file("a.md").unwrap());
        let report = autosave.stop().await;
        settle().await;

        assert_eq!(report.mutations_observed, 1);
        assert_eq!(report.saves_attempted, 0);
        assert_eq!(persistence.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_and_observation_continues() {
        let handle = Handle::detached(Workspace::new("ws")).unwrap();
        let persistence = MemoryPersistence::new();
        let (reporter, mut failures) = ChannelReporter::new();
        let autosave = attach(
            &handle,
            persistence.clone(),
            Arc::new(reporter),
            AutosavePolicy::new(DEBOUNCE),
        );

        persistence.fail_next(1);
        handle.open_shell(Shell::new("s1", "one"));
        settle().await;
        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.id.as_str(), "ws");

        handle.open_shell(Shell::new("s2", "two"));
        settle().await;
        assert_eq!(persistence.saved().len(), 1);

        let report = autosave.stop().await;
        assert_eq!(report.saves_attempted, 2);
        assert_eq!(report.saves_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stop_aborts_the_flush_in_flight() {
        let handle = Handle::detached(Workspace::new("ws")).unwrap();
        let persistence = StalledPersistence::new();
        let autosave = attach(
            &handle,
            persistence.clone(),
            Arc::new(TracingReporter),
            AutosavePolicy::new(DEBOUNCE),
        );

        handle.update_tree(|t| t.insert_file("a.md").unwrap());
        let stopped = time::timeout(Duration::from_millis(10), autosave.stop()).await;
        assert!(stopped.is_err());
        assert_eq!(persistence.started(), 1);

        persistence.open();
        settle().await;
        assert_eq!(persistence.completed(), 0);
        assert_eq!(handle.workspace_rx().tree().subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_autosave_aborts_and_unsubscribes() {
        let (handle, persistence, autosave) = setup(AutosavePolicy::new(DEBOUNCE));
        assert_eq!(handle.workspace_rx().tree().subscriber_count(), 1);

        handle.open_shell(Shell::new("s1", "one"));
        drop(autosave);
        settle().await;

        assert_eq!(persistence.calls(), 0);
        assert_eq!(handle.workspace_rx().tree().subscriber_count(), 0);
    }
}
