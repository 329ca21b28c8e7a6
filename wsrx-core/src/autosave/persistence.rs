//! Persistence collaborators.
//!
//! Autosave knows nothing about storage. It hands a [`WorkspaceSnapshot`] to
//! a [`Persistence`] implementation and forwards failures to an
//! [`ErrorReporter`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::PersistenceError;
use crate::workspace::WorkspaceSnapshot;

/// Saves workspace state. May fail; autosave does not retry.
pub trait Persistence: Send + Sync + 'static {
    fn persist(
        &self,
        snapshot: WorkspaceSnapshot,
    ) -> BoxFuture<'static, Result<(), PersistenceError>>;
}

/// Receives persistence failures.
pub trait ErrorReporter: Send + Sync + 'static {
    fn report(&self, error: PersistenceError);
}

impl<F> ErrorReporter for F
where
    F: Fn(PersistenceError) + Send + Sync + 'static,
{
    fn report(&self, error: PersistenceError) {
        self(error)
    }
}

/// Logs every failure at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: PersistenceError) {
        error!(workspace = %err.id, error = %err, "workspace persistence failed");
    }
}

/// Forwards failures to a channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<PersistenceError>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PersistenceError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ErrorReporter for ChannelReporter {
    fn report(&self, error: PersistenceError) {
        // A closed receiver means nobody is listening anymore.
        let _ = self.tx.send(error);
    }
}

/// Keeps every persisted snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Vec<WorkspaceSnapshot>>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of `persist` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Vec<WorkspaceSnapshot> {
        self.saved.lock().clone()
    }

    pub fn last(&self) -> Option<WorkspaceSnapshot> {
        self.saved.lock().last().cloned()
    }
}

impl Persistence for MemoryPersistence {
    fn persist(
        &self,
        snapshot: WorkspaceSnapshot,
    ) -> BoxFuture<'static, Result<(), PersistenceError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let result = if fail {
            Err(PersistenceError::new(snapshot.id, "injected failure"))
        } else {
            self.saved.lock().push(snapshot);
            Ok(())
        };
        Box::pin(future::ready(result))
    }
}

/// Persistence whose saves stay in flight until [`open`](Self::open) is called.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct StalledPersistence {
    started: AtomicUsize,
    completed: Arc<AtomicUsize>,
    gate: tokio::sync::watch::Sender<bool>,
}

#[cfg(test)]
impl StalledPersistence {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            completed: Arc::new(AtomicUsize::new(0)),
            gate: tokio::sync::watch::channel(false).0,
        })
    }

    pub(crate) fn open(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl Persistence for StalledPersistence {
    fn persist(
        &self,
        _snapshot: WorkspaceSnapshot,
    ) -> BoxFuture<'static, Result<(), PersistenceError>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let completed = self.completed.clone();
        Box::pin(async move {
            let _ = gate.wait_for(|open| *open).await;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
