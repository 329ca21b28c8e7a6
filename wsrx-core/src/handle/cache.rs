//! Handle Cache
//!
//! Process-wide memoization of handle construction, keyed by
//! [`WorkspaceId`].
//!
//! # Single Flight
//!
//! Each id maps to one slot:
//!
//! - `Pending`: a construction is in flight. Its outcome is a shared future;
//!   every caller that arrives while pending awaits the same future and
//!   receives the same handle or the same error.
//! - `Ready`: the handle is built and returned without suspending.
//!
//! Slot transitions happen under the map's per-key entry lock, so a resolve
//! racing an insert, an eviction or a failure always sees a consistent slot.
//!
//! # Construction
//!
//! Construction runs on its own tokio task. A caller that stops waiting does
//! not cancel it; the task settles the slot itself once the source answers,
//! so later callers find the handle ready. A failed (or panicked)
//! construction removes the slot, and the next request starts a fresh one.
//!
//! # Retention
//!
//! [`HandleCache::acquire`] returns a [`Lease`]. When the last lease on a
//! handle is released, the [`RetentionPolicy`] decides whether the handle is
//! dropped at once, after a grace period, or kept. Any new lease taken
//! during the grace period keeps the handle.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::Handle;
use crate::error::ConstructionError;
use crate::workspace::{WorkspaceId, WorkspaceSource};

/// Grace period of the default retention policy.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// What happens to a handle once nothing leases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Evict as soon as the last lease is released.
    Immediate,
    /// Evict once the handle has been idle this long.
    Grace(Duration),
    /// Keep until [`HandleCache::evict`].
    Forever,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Grace(DEFAULT_GRACE)
    }
}

type Construction = Shared<BoxFuture<'static, Result<Handle, ConstructionError>>>;

enum Slot {
    Pending {
        generation: u64,
        construction: Construction,
        leases: usize,
    },
    Ready {
        handle: Handle,
        leases: usize,
        /// Bumped on every lease change; a grace timer only evicts if the
        /// epoch it was scheduled for is still current.
        idle_epoch: u64,
    },
}

enum Begin {
    Ready(Handle),
    Pending {
        generation: u64,
        construction: Construction,
    },
}

struct CacheInner {
    source: Arc<dyn WorkspaceSource>,
    retention: RwLock<RetentionPolicy>,
    slots: DashMap<WorkspaceId, Slot>,
    generations: AtomicU64,
    constructions: AtomicUsize,
}

impl CacheInner {
    /// Look up `id`, starting a construction if absent. With `lease`, one
    /// lease is taken in the same critical section.
    fn begin(self: &Arc<Self>, id: &WorkspaceId, lease: bool) -> Begin {
        match self.slots.entry(id.clone()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Slot::Ready {
                    handle,
                    leases,
                    idle_epoch,
                } => {
                    if lease {
                        *leases += 1;
                        *idle_epoch += 1;
                    }
                    debug!(workspace = %id, generation = handle.generation(), "handle cache hit");
                    Begin::Ready(handle.clone())
                }
                Slot::Pending {
                    generation,
                    construction,
                    leases,
                    ..
                } => {
                    if lease {
                        *leases += 1;
                    }
                    debug!(
                        workspace = %id,
                        generation = *generation,
                        "joining in-flight construction"
                    );
                    Begin::Pending {
                        generation: *generation,
                        construction: construction.clone(),
                    }
                }
            },
            Entry::Vacant(entry) => {
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                self.constructions.fetch_add(1, Ordering::SeqCst);
                let construction = self.spawn_construction(id.clone(), generation);

                entry.insert(Slot::Pending {
                    generation,
                    construction: construction.clone(),
                    leases: usize::from(lease),
                });
                debug!(workspace = %id, generation, "starting handle construction");
                Begin::Pending {
                    generation,
                    construction,
                }
            }
        }
    }

    fn spawn_construction(self: &Arc<Self>, id: WorkspaceId, generation: u64) -> Construction {
        let source = Arc::clone(&self.source);
        let cache = Arc::downgrade(self);
        let task_id = id.clone();

        let task = tokio::spawn(async move {
            let result = AssertUnwindSafe(construct(source, task_id.clone(), generation))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ConstructionError::Aborted {
                        id: task_id.clone(),
                        reason: panic_message(panic.as_ref()),
                    })
                });
            if let Some(cache) = cache.upgrade() {
                cache.settle(&task_id, generation, &result);
            }
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(ConstructionError::Aborted {
                    id,
                    reason: err.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }

    /// Record the outcome of construction `generation`. Idempotent: only the
    /// first call for a pending slot of that generation changes anything.
    ///
    /// A handle that nobody leases once it is ready goes straight to the
    /// retention policy, whether its requesters left or only resolved it.
    fn settle(
        self: &Arc<Self>,
        id: &WorkspaceId,
        generation: u64,
        result: &Result<Handle, ConstructionError>,
    ) {
        match result {
            Ok(handle) => {
                let idle = {
                    let Some(mut slot) = self.slots.get_mut(id) else {
                        return;
                    };
                    let leases = match &*slot {
                        Slot::Pending {
                            generation: pending,
                            leases,
                            ..
                        } if *pending == generation => *leases,
                        _ => return,
                    };
                    *slot = Slot::Ready {
                        handle: handle.clone(),
                        leases,
                        idle_epoch: 0,
                    };
                    info!(workspace = %id, generation, leases, "workspace handle constructed");
                    leases == 0
                };
                if idle {
                    self.retire(id, generation, 0);
                }
            }
            Err(err) => {
                let removed = self.slots.remove_if(id, |_, slot| {
                    matches!(
                        slot,
                        Slot::Pending { generation: pending, .. } if *pending == generation
                    )
                });
                if removed.is_some() {
                    warn!(
                        workspace = %id,
                        generation,
                        error = %err,
                        "workspace handle construction failed"
                    );
                }
            }
        }
    }

    fn release(self: &Arc<Self>, id: &WorkspaceId, generation: u64) {
        let epoch = {
            let Some(mut slot) = self.slots.get_mut(id) else {
                return;
            };
            match &mut *slot {
                // Settling applies retention if this was the last lease.
                Slot::Pending {
                    generation: pending,
                    leases,
                    ..
                } if *pending == generation => {
                    *leases = leases.saturating_sub(1);
                    return;
                }
                Slot::Ready {
                    handle,
                    leases,
                    idle_epoch,
                } if handle.generation() == generation => {
                    *leases = leases.saturating_sub(1);
                    *idle_epoch += 1;
                    if *leases > 0 {
                        return;
                    }
                    *idle_epoch
                }
                _ => return,
            }
        };
        debug!(workspace = %id, generation, "last lease released");
        self.retire(id, generation, epoch);
    }

    /// Apply the retention policy to an idle ready slot.
    fn retire(self: &Arc<Self>, id: &WorkspaceId, generation: u64, epoch: u64) {
        let policy = *self.retention.read();
        match policy {
            RetentionPolicy::Forever => {}
            RetentionPolicy::Immediate => {
                self.evict_idle(id, generation, epoch);
            }
            RetentionPolicy::Grace(grace) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let cache = Arc::downgrade(self);
                    let id = id.clone();
                    runtime.spawn(async move {
                        tokio::time::sleep(grace).await;
                        if let Some(cache) = cache.upgrade() {
                            cache.evict_idle(&id, generation, epoch);
                        }
                    });
                }
                // No timer available; treat as immediate.
                Err(_) => {
                    self.evict_idle(id, generation, epoch);
                }
            },
        }
    }

    fn evict_idle(&self, id: &WorkspaceId, generation: u64, epoch: u64) {
        let removed = self.slots.remove_if(id, |_, slot| {
            matches!(
                slot,
                Slot::Ready { handle, leases: 0, idle_epoch }
                    if handle.generation() == generation && *idle_epoch == epoch
            )
        });
        if removed.is_some() {
            debug!(workspace = %id, generation, "evicted idle workspace handle");
        }
    }
}

async fn construct(
    source: Arc<dyn WorkspaceSource>,
    id: WorkspaceId,
    generation: u64,
) -> Result<Handle, ConstructionError> {
    let workspace = source.load(id.clone()).await.map_err(|err| ConstructionError::Source {
        id: id.clone(),
        message: err.message,
    })?;

    if workspace.id() != &id {
        return Err(ConstructionError::IdentityMismatch {
            requested: id,
            returned: workspace.id().clone(),
        });
    }

    Handle::build(workspace, generation)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "construction panicked".to_string()
    }
}

/// Memoizing, single-flight constructor of workspace handles.
///
/// Clones share the same cache. Requests must be made from within a tokio
/// runtime, since construction is spawned onto it.
#[derive(Clone)]
pub struct HandleCache {
    inner: Arc<CacheInner>,
}

impl HandleCache {
    pub fn new(source: Arc<dyn WorkspaceSource>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                retention: RwLock::new(RetentionPolicy::default()),
                slots: DashMap::new(),
                generations: AtomicU64::new(0),
                constructions: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_retention(self, policy: RetentionPolicy) -> Self {
        *self.inner.retention.write() = policy;
        self
    }

    pub fn retention(&self) -> RetentionPolicy {
        *self.inner.retention.read()
    }

    /// Get the handle for `id`, constructing it if needed.
    ///
    /// Returns immediately when the handle is cached, joins the in-flight
    /// construction when there is one, and starts one otherwise. Does not
    /// take a lease, so a handle only resolved is subject to the retention
    /// policy as soon as it is ready.
    pub async fn resolve(&self, id: &WorkspaceId) -> Result<Handle, ConstructionError> {
        match self.inner.begin(id, false) {
            Begin::Ready(handle) => Ok(handle),
            Begin::Pending {
                generation,
                construction,
            } => {
                let result = construction.await;
                self.inner.settle(id, generation, &result);
                result
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but also holds the handle in the
    /// cache until the returned [`Lease`] is dropped.
    ///
    /// The lease is counted from the moment of the call, so a handle that is
    /// still being constructed is not evicted out from under the caller.
    pub async fn acquire(&self, id: &WorkspaceId) -> Result<Lease, ConstructionError> {
        match self.inner.begin(id, true) {
            Begin::Ready(handle) => {
                let guard = LeaseGuard::new(&self.inner, id.clone(), handle.generation());
                Ok(Lease { handle, _guard: guard })
            }
            Begin::Pending {
                generation,
                construction,
            } => {
                // Released on drop, including when this future is cancelled.
                let guard = LeaseGuard::new(&self.inner, id.clone(), generation);
                let result = construction.await;
                self.inner.settle(id, generation, &result);
                result.map(|handle| Lease { handle, _guard: guard })
            }
        }
    }

    /// The cached handle for `id`, if one is ready.
    pub fn peek(&self, id: &WorkspaceId) -> Option<Handle> {
        match self.inner.slots.get(id)?.value() {
            Slot::Ready { handle, .. } => Some(handle.clone()),
            Slot::Pending { .. } => None,
        }
    }

    /// Evict an unleased, ready handle. Returns `true` if one was removed.
    pub fn evict(&self, id: &WorkspaceId) -> bool {
        let removed = self
            .inner
            .slots
            .remove_if(id, |_, slot| matches!(slot, Slot::Ready { leases: 0, .. }));
        if removed.is_some() {
            debug!(workspace = %id, "evicted workspace handle");
        }
        removed.is_some()
    }

    /// Whether `id` has a slot, ready or in flight.
    pub fn contains(&self, id: &WorkspaceId) -> bool {
        self.inner.slots.contains_key(id)
    }

    pub fn is_pending(&self, id: &WorkspaceId) -> bool {
        self.inner
            .slots
            .get(id)
            .is_some_and(|slot| matches!(slot.value(), Slot::Pending { .. }))
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn lease_count(&self, id: &WorkspaceId) -> usize {
        match self.inner.slots.get(id).as_deref() {
            Some(Slot::Ready { leases, .. }) | Some(Slot::Pending { leases, .. }) => *leases,
            None => 0,
        }
    }

    /// Constructions started over the cache's lifetime.
    pub fn constructions_started(&self) -> usize {
        self.inner.constructions.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for HandleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleCache")
            .field("len", &self.len())
            .field("retention", &self.retention())
            .field("constructions_started", &self.constructions_started())
            .finish()
    }
}

struct LeaseGuard {
    cache: Weak<CacheInner>,
    id: WorkspaceId,
    generation: u64,
}

impl LeaseGuard {
    fn new(cache: &Arc<CacheInner>, id: WorkspaceId, generation: u64) -> Self {
        Self {
            cache: Arc::downgrade(cache),
            id,
            generation,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.release(&self.id, self.generation);
        }
    }
}

/// A handle held in the cache for as long as this value lives.
#[must_use = "dropping a Lease releases the handle immediately"]
pub struct Lease {
    handle: Handle,
    _guard: LeaseGuard,
}

impl Lease {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl std::ops::Deref for Lease {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Lease").field(&self.handle).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
