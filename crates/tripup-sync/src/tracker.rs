//! Sync progress tracking.
//!
//! Asset ids move from `unsynced` to `synced` as their work completes. The
//! two sets are always disjoint, and once everything tracked is synced both
//! are cleared so the next round of work starts again from zero.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;
use uuid::Uuid;

use tripup_core::AtomicVar;

/// Progress snapshot delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
}

impl SyncProgress {
    pub fn is_idle(&self) -> bool {
        self.total == 0
    }
}

type Observer = Arc<dyn Fn(SyncProgress) + Send + Sync>;
type Observers = AtomicVar<HashMap<u64, Observer>>;

#[derive(Debug, Default)]
struct TrackerState {
    unsynced: HashSet<Uuid>,
    synced: HashSet<Uuid>,
}

impl TrackerState {
    fn settle(&mut self) -> SyncProgress {
        if self.unsynced.is_empty() {
            self.synced.clear();
        }
        SyncProgress {
            completed: self.synced.len(),
            total: self.synced.len() + self.unsynced.len(),
        }
    }
}

/// Tracks which assets still have outstanding import or delete work.
pub struct AssetSyncTracker {
    state: AtomicVar<TrackerState>,
    observers: Arc<Observers>,
    next_observer: AtomicU64,
}

impl Default for AssetSyncTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetSyncTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicVar::default(),
            observers: Arc::new(AtomicVar::default()),
            next_observer: AtomicU64::new(0),
        }
    }

    /// Begin tracking ids. Ids already synced in this round become unsynced again.
    pub fn start_tracking(&self, ids: &[Uuid]) {
        self.update("start", |s| {
            for id in ids {
                s.synced.remove(id);
                s.unsynced.insert(*id);
            }
        });
    }

    /// Mark tracked ids as synced. Untracked ids are ignored.
    pub fn complete_tracking(&self, ids: &[Uuid]) {
        self.update("complete", |s| {
            for id in ids {
                if s.unsynced.remove(id) {
                    s.synced.insert(*id);
                }
            }
        });
    }

    /// Forget ids whose work was abandoned. Ids already synced keep counting.
    pub fn remove_tracking(&self, ids: &[Uuid]) {
        self.update("remove", |s| {
            for id in ids {
                s.unsynced.remove(id);
            }
        });
    }

    pub fn progress(&self) -> SyncProgress {
        self.state.with(|s| SyncProgress {
            completed: s.synced.len(),
            total: s.synced.len() + s.unsynced.len(),
        })
    }

    pub fn is_tracking(&self, id: &Uuid) -> bool {
        self.state.with(|s| s.unsynced.contains(id))
    }

    /// Register an observer, called after every mutation.
    ///
    /// The observer stays registered until the returned subscription drops.
    pub fn subscribe<F>(&self, observer: F) -> SyncSubscription
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers.mutate(|o| o.insert(id, Arc::new(observer)));
        SyncSubscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.with(|o| o.len())
    }

    fn update(&self, op: &'static str, f: impl FnOnce(&mut TrackerState)) {
        let progress = self.state.mutate(|s| {
            f(s);
            s.settle()
        });
        trace!(
            subsystem = "sync",
            component = "tracker",
            op,
            completed = progress.completed,
            total = progress.total,
            "Sync progress updated"
        );

        let observers: Vec<Observer> = self.observers.with(|o| o.values().cloned().collect());
        for observer in observers {
            observer(progress);
        }
    }
}

/// Keeps an observer registered; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct SyncSubscription {
    id: u64,
    observers: Weak<Observers>,
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.mutate(|o| o.remove(&self.id));
        }
    }
}
