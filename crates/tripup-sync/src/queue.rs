//! Operation queues.
//!
//! An [`OperationQueue`] runs [`QueuedOperation`]s with bounded concurrency.
//! Ready operations are dispatched highest priority first, then in the order
//! they became ready. An operation with dependencies becomes ready only once
//! every dependency has finished, whatever its outcome. A suspended queue
//! keeps accepting operations but starts none until it is resumed; operations
//! already running are unaffected.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, trace};
use uuid::Uuid;

use tripup_core::AtomicVar;

/// Dispatch priority within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueuePriority {
    Normal,
    High,
}

/// How a queued operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Succeeded)
    }
}

/// A unit of work an [`OperationQueue`] can run.
#[async_trait]
pub trait QueuedOperation: Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Request cancellation. Work not yet started is skipped.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    /// Pause or resume work inside the operation. Default: ignored.
    fn set_suspended(&self, _suspended: bool) {}

    async fn execute(&self) -> OperationOutcome;
}

/// Observes and controls one queued operation.
#[derive(Clone)]
pub struct OperationHandle {
    id: Uuid,
    op: Arc<dyn QueuedOperation>,
    outcome: watch::Receiver<Option<OperationOutcome>>,
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.op.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.op.is_cancelled()
    }

    /// The outcome, once finished.
    ///
    /// An operation whose task ended without reporting (a panic) counts as failed.
    pub fn outcome(&self) -> Option<OperationOutcome> {
        let current = *self.outcome.borrow();
        current.or_else(|| {
            self.outcome
                .has_changed()
                .is_err()
                .then_some(OperationOutcome::Failed)
        })
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Wait until the operation has finished.
    pub async fn finished(&self) -> OperationOutcome {
        let mut rx = self.outcome.clone();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                let last = *rx.borrow();
                return last.unwrap_or(OperationOutcome::Failed);
            }
        }
    }
}

struct ReadyEntry {
    priority: QueuePriority,
    seq: u64,
    op: Arc<dyn QueuedOperation>,
    tx: watch::Sender<Option<OperationOutcome>>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<ReadyEntry>,
    running: usize,
    suspended: bool,
    next_seq: u64,
    /// Every operation added and not yet finished.
    live: HashMap<Uuid, Arc<dyn QueuedOperation>>,
}

struct QueueInner {
    name: &'static str,
    max_concurrent: usize,
    state: AtomicVar<QueueState>,
}

impl QueueInner {
    fn enqueue(
        inner: &Arc<QueueInner>,
        op: Arc<dyn QueuedOperation>,
        priority: QueuePriority,
        tx: watch::Sender<Option<OperationOutcome>>,
    ) {
        inner.state.mutate(|s| {
            let seq = s.next_seq;
            s.next_seq += 1;
            s.ready.push(ReadyEntry {
                priority,
                seq,
                op,
                tx,
            });
        });
        Self::pump(inner);
    }

    fn pump(inner: &Arc<QueueInner>) {
        loop {
            let next = inner.state.mutate(|s| {
                if s.suspended || s.running >= inner.max_concurrent {
                    return None;
                }
                let entry = s.ready.pop()?;
                s.running += 1;
                Some(entry)
            });
            let Some(entry) = next else {
                break;
            };

            let guard = RunningGuard {
                inner: inner.clone(),
                id: entry.op.id(),
            };
            tokio::spawn(async move {
                let start = Instant::now();
                let outcome = entry.op.execute().await;
                debug!(
                    subsystem = "sync",
                    component = "queue",
                    queue = guard.inner.name,
                    operation_id = %guard.id,
                    ?outcome,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Operation finished"
                );
                entry.tx.send_replace(Some(outcome));
                drop(guard);
            });
        }
    }
}

/// Releases a running slot even when the operation task panics.
struct RunningGuard {
    inner: Arc<QueueInner>,
    id: Uuid,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.state.mutate(|s| {
            s.running = s.running.saturating_sub(1);
            s.live.remove(&self.id);
        });
        QueueInner::pump(&self.inner);
    }
}

/// Priority queue of operations with bounded concurrency.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                max_concurrent: max_concurrent.max(1),
                state: AtomicVar::default(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn add(&self, op: Arc<dyn QueuedOperation>, priority: QueuePriority) -> OperationHandle {
        self.add_with_dependencies(op, priority, Vec::new())
    }

    /// Add an operation that starts only after every dependency has finished.
    pub fn add_with_dependencies(
        &self,
        op: Arc<dyn QueuedOperation>,
        priority: QueuePriority,
        dependencies: Vec<OperationHandle>,
    ) -> OperationHandle {
        let (tx, rx) = watch::channel(None);
        let id = op.id();
        let handle = OperationHandle {
            id,
            op: op.clone(),
            outcome: rx,
        };
        self.inner.state.mutate(|s| s.live.insert(id, op.clone()));

        trace!(
            subsystem = "sync",
            component = "queue",
            queue = self.inner.name,
            operation_id = %id,
            ?priority,
            dependencies = dependencies.len(),
            "Operation added"
        );

        if dependencies.iter().all(OperationHandle::is_finished) {
            QueueInner::enqueue(&self.inner, op, priority, tx);
        } else {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                for dependency in &dependencies {
                    dependency.finished().await;
                }
                QueueInner::enqueue(&inner, op, priority, tx);
            });
        }
        handle
    }

    /// Stop or resume dispatching. Returns the previous setting.
    pub fn set_suspended(&self, suspended: bool) -> bool {
        let previous = self.inner.state.mutate(|s| std::mem::replace(&mut s.suspended, suspended));
        if previous != suspended {
            debug!(
                subsystem = "sync",
                component = "queue",
                queue = self.inner.name,
                suspended,
                "Queue suspension changed"
            );
        }
        if !suspended {
            QueueInner::pump(&self.inner);
        }
        previous
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.with(|s| s.suspended)
    }

    /// Pause or resume work inside every unfinished operation.
    pub fn suspend_operations(&self, suspended: bool) {
        for op in self.operations() {
            op.set_suspended(suspended);
        }
    }

    /// Cancel every unfinished operation. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ops = self.operations();
        for op in &ops {
            op.cancel();
        }
        ops.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.with(|s| s.running)
    }

    /// Operations added and not yet finished.
    pub fn len(&self) -> usize {
        self.inner.state.with(|s| s.live.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn operations(&self) -> Vec<Arc<dyn QueuedOperation>> {
        self.inner.state.with(|s| s.live.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Recorder {
        log: AtomicVar<Vec<&'static str>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    struct TestOp {
        id: Uuid,
        name: &'static str,
        cancelled: AtomicBool,
        recorder: Arc<Recorder>,
        gate: Option<Arc<Semaphore>>,
        delay: Option<Duration>,
        panics: bool,
    }

    impl TestOp {
        fn new(name: &'static str, recorder: &Arc<Recorder>) -> Self {
            Self {
                id: Uuid::new_v4(),
                name,
                cancelled: AtomicBool::new(false),
                recorder: recorder.clone(),
                gate: None,
                delay: None,
                panics: false,
            }
        }

        fn gated(mut self, gate: &Arc<Semaphore>) -> Self {
            self.gate = Some(gate.clone());
            self
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn into_arc(self) -> Arc<dyn QueuedOperation> {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl QueuedOperation for TestOp {
        fn id(&self) -> Uuid {
            self.id
        }

        fn cancel(&self) {
            self.cancelled.store(true, AtomicOrdering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(AtomicOrdering::SeqCst)
        }

        async fn execute(&self) -> OperationOutcome {
            if self.is_cancelled() {
                return OperationOutcome::Cancelled;
            }
            if self.panics {
                panic!("operation blew up");
            }
            let now = self.recorder.running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.recorder.peak.fetch_max(now, AtomicOrdering::SeqCst);
            self.recorder.log.mutate(|l| l.push(self.name));
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.recorder.running.fetch_sub(1, AtomicOrdering::SeqCst);
            OperationOutcome::Succeeded
        }
    }

    #[tokio::test]
    async fn test_high_priority_dispatched_first() {
        let recorder = Arc::new(Recorder::default());
        let queue = OperationQueue::new("test", 1);
        queue.set_suspended(true);

        let a = queue.add(TestOp::new("a", &recorder).into_arc(), QueuePriority::Normal);
        let b = queue.add(TestOp::new("b", &recorder).into_arc(), QueuePriority::High);
        let c = queue.add(TestOp::new("c", &recorder).into_arc(), QueuePriority::Normal);
        queue.set_suspended(false);

        for handle in [&a, &b, &c] {
            assert_eq!(handle.finished().await, OperationOutcome::Succeeded);
        }
        assert_eq!(recorder.log.value(), vec!["b", "a", "c"]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let recorder = Arc::new(Recorder::default());
        let queue = OperationQueue::new("test", 2);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let op = TestOp::new("op", &recorder).delayed(Duration::from_millis(50));
                queue.add(op.into_arc(), QueuePriority::Normal)
            })
            .collect();
        for handle in &handles {
            handle.finished().await;
        }

        assert_eq!(recorder.peak.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(recorder.log.with(|l| l.len()), 5);
        assert_eq!(queue.running_count(), 0);
    }

    #[tokio::test]
    async fn test_dependency_runs_first() {
        let recorder = Arc::new(Recorder::default());
        let queue = OperationQueue::new("test", 4);
        let gate = Arc::new(Semaphore::new(0));

        let first = queue.add(
            TestOp::new("first", &recorder).gated(&gate).into_arc(),
            QueuePriority::Normal,
        );
        let second = queue.add_with_dependencies(
            TestOp::new("second", &recorder).into_arc(),
            QueuePriority::High,
            vec![first.clone()],
        );

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(recorder.log.value(), vec!["first"]);
        assert!(!second.is_finished());

        gate.add_permits(1);
        assert_eq!(second.finished().await, OperationOutcome::Succeeded);
        assert_eq!(recorder.log.value(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_cancel_all_skips_pending() {
        let recorder = Arc::new(Recorder::default());
        let queue = OperationQueue::new("test", 1);
        queue.set_suspended(true);

        let a = queue.add(TestOp::new("a", &recorder).into_arc(), QueuePriority::Normal);
        let b = queue.add(TestOp::new("b", &recorder).into_arc(), QueuePriority::Normal);
        assert_eq!(queue.cancel_all(), 2);
        queue.set_suspended(false);

        assert_eq!(a.finished().await, OperationOutcome::Cancelled);
        assert_eq!(b.finished().await, OperationOutcome::Cancelled);
        assert!(recorder.log.value().is_empty());
    }

    #[tokio::test]
    async fn test_suspended_queue_holds_operations() {
        let recorder = Arc::new(Recorder::default());
        let queue = OperationQueue::new("test", 2);
        assert!(!queue.set_suspended(true));

        let handle = queue.add(TestOp::new("a", &recorder).into_arc(), QueuePriority::High);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());
        assert_eq!(queue.len(), 1);

        assert!(queue.set_suspended(false));
        assert_eq!(handle.finished().await, OperationOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_panicking_operation_counts_as_failed() {
        let recorder = Arc::new(Recorder::default());
        let queue = OperationQueue::new("test", 1);
        let mut op = TestOp::new("boom", &recorder);
        op.panics = true;

        let handle = queue.add(op.into_arc(), QueuePriority::Normal);
        assert_eq!(handle.finished().await, OperationOutcome::Failed);
        assert_eq!(handle.outcome(), Some(OperationOutcome::Failed));

        let after = queue.add(TestOp::new("after", &recorder).into_arc(), QueuePriority::Normal);
        assert_eq!(after.finished().await, OperationOutcome::Succeeded);
    }
}
