//! Integration Tests for Workspace Handles
//!
//! These tests drive the handle cache, projections, autosave and scopes
//! together through the public API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::Notify;

use wsrx_core::autosave::{AutosavePolicy, ChannelReporter, MemoryPersistence};
use wsrx_core::handle::{Handle, HandleCache, RetentionPolicy};
use wsrx_core::reactive::{Cell, Effect, Runtime, Selector};
use wsrx_core::scope::{Provider, ScopeState};
use wsrx_core::workspace::{
    MemorySource, Shell, SourceError, Tree, Workspace, WorkspaceId, WorkspaceSource,
};
use wsrx_core::{ConstructionError, LifecycleViolation, WorkspaceError};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Source that holds every load until the gate opens, and fails while
/// `fail` is set.
struct ScriptedSource {
    inner: Arc<MemorySource>,
    gate: Arc<Notify>,
    fail: AtomicBool,
}

impl ScriptedSource {
    fn new(ids: &[&str]) -> Arc<Self> {
        let inner = MemorySource::new();
        for id in ids {
            inner.insert(Workspace::new(*id));
        }
        Arc::new(Self {
            inner,
            gate: Arc::new(Notify::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn open_gate(&self) {
        self.gate.notify_one();
    }
}

impl WorkspaceSource for ScriptedSource {
    fn load(&self, id: WorkspaceId) -> BoxFuture<'static, Result<Workspace, SourceError>> {
        let gate = self.gate.clone();
        let fail = self.fail.load(Ordering::SeqCst);
        let load = self.inner.load(id);
        Box::pin(async move {
            gate.notified().await;
            if fail {
                Err(SourceError::new("disk offline"))
            } else {
                load.await
            }
        })
    }
}

fn provider(ids: &[&str], policy: AutosavePolicy) -> (Provider, Arc<MemoryPersistence>) {
    let source = MemorySource::new();
    for id in ids {
        source.insert(Workspace::new(*id));
    }
    let persistence = MemoryPersistence::new();
    let cache = HandleCache::new(source).with_retention(RetentionPolicy::Immediate);
    let provider = Provider::new(cache, persistence.clone()).with_autosave(Some(policy));
    (provider, persistence)
}

// ----------------------------------------------------------------------------
// Handle cache
// ----------------------------------------------------------------------------

/// Test that two requests made before the first resolves share one
/// construction and receive the same handle.
#[tokio::test]
async fn concurrent_requests_share_one_handle() {
    let source = ScriptedSource::new(&["ws-1"]);
    let cache = HandleCache::new(source.clone());
    let id = WorkspaceId::from("ws-1");

    let requests = future::join(cache.resolve(&id), cache.resolve(&id));
    let release = async {
        tokio::task::yield_now().await;
        source.open_gate();
    };
    let ((first, second), ()) = tokio::join!(requests, release);

    assert!(Handle::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(cache.constructions_started(), 1);
    assert_eq!(source.inner.loads(), 1);
}

/// Test that N concurrent scopes on one id construct once.
#[tokio::test]
async fn concurrent_scopes_construct_once() {
    let (provider, _) = provider(&["ws"], AutosavePolicy::new(DEBOUNCE));

    let scopes = future::join_all((0..6).map(|_| provider.bind("ws"))).await;
    let mut scopes: Vec<_> = scopes.into_iter().map(Result::unwrap).collect();

    let first = scopes[0].handle().unwrap().clone();
    assert!(scopes.iter().all(|s| Handle::ptr_eq(s.handle().unwrap(), &first)));
    assert_eq!(provider.cache().constructions_started(), 1);
    assert_eq!(provider.cache().lease_count(&"ws".into()), 6);

    for scope in &mut scopes {
        scope.unbind().await.unwrap();
    }
    assert!(provider.cache().is_empty());
}

/// Test that a failed construction reaches every joined caller and that the
/// next request starts a fresh construction.
#[tokio::test]
async fn construction_failure_reaches_all_callers_then_retries() {
    let source = ScriptedSource::new(&["ws-4"]);
    source.fail.store(true, Ordering::SeqCst);
    let cache = HandleCache::new(source.clone());
    let id = WorkspaceId::from("ws-4");

    let requests = future::join_all((0..3).map(|_| cache.resolve(&id)));
    let release = async {
        tokio::task::yield_now().await;
        source.open_gate();
    };
    let (results, ()) = tokio::join!(requests, release);

    for result in results {
        assert_eq!(
            result.unwrap_err(),
            ConstructionError::Source {
                id: id.clone(),
                message: "disk offline".into()
            }
        );
    }
    assert!(!cache.contains(&id));
    assert_eq!(cache.constructions_started(), 1);

    source.fail.store(false, Ordering::SeqCst);
    source.open_gate();
    assert!(cache.resolve(&id).await.is_ok());
    assert_eq!(cache.constructions_started(), 2);
}

/// Test that a scope waiting on a failed construction sees the failure.
#[tokio::test]
async fn scope_context_resolves_into_failure() {
    let source = ScriptedSource::new(&[]);
    let provider = Provider::new(HandleCache::new(source.clone()), MemoryPersistence::new());
    let mut scope = provider.scope("ws-4");
    let context = scope.context();

    let (bound, waited) = tokio::join!(scope.bind(), async {
        tokio::task::yield_now().await;
        assert_eq!(
            context.get_handle().unwrap_err(),
            WorkspaceError::Lifecycle(LifecycleViolation::NotResolved)
        );
        source.open_gate();
        context.handle().await
    });

    assert!(matches!(bound, Err(WorkspaceError::Construction(_))));
    assert!(matches!(waited, Err(WorkspaceError::Construction(_))));
    assert_eq!(scope.state(), ScopeState::Unbound);
}

// ----------------------------------------------------------------------------
// Projections
// ----------------------------------------------------------------------------

/// Test that a tree observer sees tree mutations in order and is never
/// woken by shell mutations.
#[test]
fn tree_observer_sees_only_tree_changes_in_order() {
    let handle = Handle::detached(Workspace::new("ws")).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _sub = handle.tree().subscribe(move |tree: &Tree| s.lock().push(tree.paths()));

    let files = ["a.md", "b.md", "c.md", "d.md"];
    for (i, file) in files.iter().enumerate() {
        handle.open_shell(Shell::new(format!("s{i}").as_str(), *file));
        handle.update_tree(|t| t.insert_file(file).unwrap());
        handle.move_shell(&format!("s{i}").as_str().into(), 0);
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), files.len());
    for (i, paths) in seen.iter().enumerate() {
        assert_eq!(paths.as_slice(), &files[..=i]);
    }
}

/// Test that projecting the same selector twice on an unchanged handle gives
/// equal values and does not re-run dependents.
#[test]
fn projections_of_unchanged_state_are_idempotent() {
    let handle = Handle::detached(Workspace::new("ws")).unwrap();
    handle.open_shell(Shell::new("s1", "notes"));

    let titles = |ws: &wsrx_core::handle::WorkspaceView<'_>| {
        ws.with_shells(|s| s.iter().map(|sh| sh.title.clone()).collect::<Vec<_>>())
    };
    let first = handle.project(titles);
    let second = handle.project(titles);
    assert_eq!(first.get(), second.get());

    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let source = first.clone();
    let _effect = Effect::new(move |t| {
        t.track(&source);
        r.fetch_add(1, Ordering::SeqCst);
    });

    // Same titles, new write: the projection recomputes but stays equal.
    handle.open_shell(Shell::new("s1", "notes").with_path("nowhere.md"));
    assert_eq!(first.get(), second.get());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// Test that projection changes stream out in application order.
#[tokio::test]
async fn projection_changes_stream_in_order() {
    let handle = Handle::detached(Workspace::new("ws")).unwrap();
    let count = handle.project(|ws| ws.with_shells(|s| s.len()));
    let mut changes = count.changes();

    for i in 0..4 {
        handle.open_shell(Shell::new(format!("s{i}").as_str(), "shell"));
    }
    handle.close_shell(&"s0".into());

    let mut received = Vec::new();
    while let Some(value) = changes.try_next() {
        received.push(value);
    }
    assert_eq!(received, vec![1, 2, 3, 4, 3]);
}

/// Test that reactive writes from subscribers are queued, not recursive,
/// and that a chain of selectors settles in one pass.
#[test]
fn reentrant_writes_settle_without_recursion() {
    let input = Cell::new(0);
    let mirror = Cell::new(0);

    let (i, m) = (input.clone(), mirror.clone());
    let _copy = Effect::new(move |t| {
        let value = t.read(&i);
        if m.get() != value {
            m.set(value);
        }
    });

    let m = mirror.clone();
    let doubled = Selector::new(move |t| t.read(&m) * 2);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _sub = doubled.subscribe(move |v| s.lock().push(*v));

    Runtime::batch(|| {
        input.set(1);
        input.set(2);
    });
    input.set(3);

    assert_eq!(*seen.lock(), vec![4, 6]);
    assert!(!Runtime::in_cycle());
}

// ----------------------------------------------------------------------------
// Autosave and scopes
// ----------------------------------------------------------------------------

/// Test that one shell mutation in a bound scope is observed once and saved
/// once.
#[tokio::test(start_paused = true)]
async fn bound_scope_autosaves_single_mutation() {
    let (provider, persistence) = provider(&["ws-2"], AutosavePolicy::new(DEBOUNCE));
    let mut scope = provider.bind("ws-2").await.unwrap();

    let shells = scope.context().get_shells().unwrap();
    scope.handle().unwrap().open_shell(Shell::new("s1", "notes"));
    assert_eq!(shells.get().len(), 1);

    tokio::time::sleep(DEBOUNCE * 2).await;
    assert_eq!(persistence.calls(), 1);
    assert_eq!(persistence.last().map(|s| s.shells.len()), Some(1));

    let report = scope.unbind().await.unwrap().unwrap();
    assert_eq!(report.mutations_observed, 1);
    assert_eq!(report.saves_attempted, 1);
    assert_eq!(persistence.calls(), 1);
}

/// Test that unbinding right after a mutation flushes it inside unbind and
/// that nothing is persisted afterwards.
#[tokio::test(start_paused = true)]
async fn unbind_with_pending_mutation_flushes_before_returning() {
    let (provider, persistence) = provider(&["ws-3"], AutosavePolicy::new(DEBOUNCE));
    let mut scope = provider.bind("ws-3").await.unwrap();
    let handle = scope.handle().unwrap().clone();

    handle.update_tree(|t| t.insert_file("draft.md").unwrap());
    scope.unbind().await.unwrap();
    assert_eq!(persistence.calls(), 1);

    handle.update_tree(|t| t.insert_file("late.md").unwrap());
    tokio::time::sleep(DEBOUNCE * 10).await;
    assert_eq!(persistence.calls(), 1);
    assert!(!persistence.last().unwrap().tree.contains("late.md"));
}

/// Test that without a final flush, a mutation pending at unbind is never
/// persisted.
#[tokio::test(start_paused = true)]
async fn unbind_without_flush_never_persists_pending_mutation() {
    let policy = AutosavePolicy::new(DEBOUNCE).with_flush_on_stop(false);
    let (provider, persistence) = provider(&["ws-3"], policy);
    let mut scope = provider.bind("ws-3").await.unwrap();

    scope.handle().unwrap().update_tree(|t| t.insert_file("draft.md").unwrap());
    let report = scope.unbind().await.unwrap().unwrap();
    tokio::time::sleep(DEBOUNCE * 10).await;

    assert_eq!(report.saves_attempted, 0);
    assert_eq!(persistence.calls(), 0);
}

/// Test that persistence failures are reported while autosave keeps going.
#[tokio::test(start_paused = true)]
async fn persistence_failures_are_reported_not_fatal() {
    let (provider, persistence) = provider(&["ws"], AutosavePolicy::new(DEBOUNCE));
    let (reporter, mut failures) = ChannelReporter::new();
    let provider = provider.with_reporter(Arc::new(reporter));
    let mut scope = provider.bind("ws").await.unwrap();
    let handle = scope.handle().unwrap().clone();

    persistence.fail_next(2);
    for i in 0..3 {
        handle.open_shell(Shell::new(format!("s{i}").as_str(), "shell"));
        tokio::time::sleep(DEBOUNCE * 2).await;
    }

    assert_eq!(failures.recv().await.map(|e| e.message), Some("injected failure".into()));
    assert_eq!(failures.recv().await.map(|e| e.message), Some("injected failure".into()));
    assert_eq!(persistence.saved().len(), 1);

    let report = scope.unbind().await.unwrap().unwrap();
    assert_eq!(report.saves_attempted, 3);
    assert_eq!(report.saves_failed, 2);
}

/// Test that a scope can be bound again after unbinding and gets a fresh
/// handle once the old one was evicted.
#[tokio::test]
async fn scope_rebinds_after_unbind() {
    let (provider, _) = provider(&["ws"], AutosavePolicy::new(DEBOUNCE));
    let mut scope = provider.scope("ws");

    let first = scope.bind().await.unwrap();
    scope.unbind().await.unwrap();
    let second = scope.bind().await.unwrap();

    assert!(!Handle::ptr_eq(&first, &second));
    assert_eq!(scope.state(), ScopeState::Bound);
    scope.unbind().await.unwrap();
}

/// Test that consumers nested in a scope stop seeing the handle after the
/// scope ends.
#[tokio::test]
async fn context_outliving_scope_reports_release() {
    let (provider, _) = provider(&["ws"], AutosavePolicy::new(DEBOUNCE));

    let leaked = provider.run("ws", |ctx| async move { ctx }).await.unwrap();

    assert_eq!(
        leaked.get_tree().unwrap_err(),
        WorkspaceError::Lifecycle(LifecycleViolation::ScopeReleased)
    );
    assert_eq!(
        leaked.handle().await.unwrap_err(),
        WorkspaceError::Lifecycle(LifecycleViolation::ScopeReleased)
    );
}
