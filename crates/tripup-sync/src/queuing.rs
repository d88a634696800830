//! Import queuers.
//!
//! An [`AssetImportQueuingOperation`] drains a FIFO of asset ids into import
//! operations, a fixed number of ids per batch and a bounded number of
//! batches in flight. Each batch is followed through to a terminal outcome:
//!
//! - success: the ids are reported imported
//! - fatal: the offending assets are terminated and the rest continue in a
//!   replacement operation
//! - cancelled: the ids are reported not imported
//! - unrecoverable (missing configuration): the ids are reported not
//!   imported and the queuer stops draining
//! - anything else is recoverable: the import queue is suspended, a
//!   replacement resuming from the reached stage is submitted and a status
//!   re-check is requested
//!
//! Once the list is drained the queuer is finished and rejects appends; the
//! owner starts a new one.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tripup_core::{AtomicVar, TransferPriority};
use tripup_db::MutableAsset;

use crate::context::SyncContext;
use crate::operations::AssetImportOperation;
use crate::queue::{OperationHandle, OperationOutcome, QueuePriority};

/// Owner-side hooks of an import queuer.
#[async_trait]
pub trait ImportQueuingDelegate: Send + Sync {
    /// Live instances of the ids that still exist.
    async fn resolve(&self, ids: &[Uuid]) -> Vec<Arc<MutableAsset>>;

    /// Queue an import operation. `None` when the owner has shut down.
    async fn submit_import(
        &self,
        op: Arc<AssetImportOperation>,
        priority: QueuePriority,
    ) -> Option<OperationHandle>;

    /// Permanently remove assets that can never import.
    async fn terminate(&self, assets: Vec<Arc<MutableAsset>>);

    fn suspend_import_queue(&self);

    fn request_status_refresh(&self);

    fn imports_finished(&self, ids: &[Uuid], success: bool);
}

/// Checked before every batch; draining stops once it returns false.
pub type QueuingCondition = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
struct QueuerState {
    pending: VecDeque<Uuid>,
    in_flight: HashSet<Uuid>,
    finished: bool,
    failures: usize,
}

pub struct AssetImportQueuingOperation {
    id: Uuid,
    ctx: Arc<SyncContext>,
    delegate: Arc<dyn ImportQueuingDelegate>,
    priority: QueuePriority,
    transfer_priority: TransferPriority,
    condition: Option<QueuingCondition>,
    state: AtomicVar<QueuerState>,
    cancel: CancellationToken,
}

impl AssetImportQueuingOperation {
    /// Auto-backup queuer: normal queue priority, low transfer priority.
    pub fn automatic(
        ctx: Arc<SyncContext>,
        delegate: Arc<dyn ImportQueuingDelegate>,
        ids: Vec<Uuid>,
        condition: Option<QueuingCondition>,
    ) -> Self {
        Self::new(
            ctx,
            delegate,
            ids,
            QueuePriority::Normal,
            TransferPriority::Low,
            condition,
        )
    }

    /// User-requested queuer: everything it submits jumps the queue.
    pub fn manual(
        ctx: Arc<SyncContext>,
        delegate: Arc<dyn ImportQueuingDelegate>,
        ids: Vec<Uuid>,
    ) -> Self {
        Self::new(
            ctx,
            delegate,
            ids,
            QueuePriority::High,
            TransferPriority::High,
            None,
        )
    }

    fn new(
        ctx: Arc<SyncContext>,
        delegate: Arc<dyn ImportQueuingDelegate>,
        ids: Vec<Uuid>,
        priority: QueuePriority,
        transfer_priority: TransferPriority,
        condition: Option<QueuingCondition>,
    ) -> Self {
        let queuer = Self {
            id: Uuid::new_v4(),
            ctx,
            delegate,
            priority,
            transfer_priority,
            condition,
            state: AtomicVar::default(),
            cancel: CancellationToken::new(),
        };
        queuer.append(ids);
        queuer
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn priority(&self) -> QueuePriority {
        self.priority
    }

    /// Add ids to the tail. Ids already queued or in flight are skipped.
    ///
    /// Returns false once the queuer has finished; nothing is added then.
    pub fn append(&self, ids: Vec<Uuid>) -> bool {
        self.state.mutate(|s| {
            if s.finished {
                return false;
            }
            let mut seen: HashSet<Uuid> = s.pending.iter().copied().collect();
            for id in ids {
                if !s.in_flight.contains(&id) && seen.insert(id) {
                    s.pending.push_back(id);
                }
            }
            true
        })
    }

    /// Stop draining. In-flight batches are cancelled and reported.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state.with(|s| s.finished)
    }

    pub fn pending_count(&self) -> usize {
        self.state.with(|s| s.pending.len() + s.in_flight.len())
    }

    fn condition_holds(&self) -> bool {
        self.condition.as_ref().map_or(true, |c| c())
    }

    /// Drain until the list is empty, the condition fails or the queuer is
    /// cancelled. Returns true when every id it was given imported.
    pub async fn run(self: Arc<Self>) -> bool {
        let start = Instant::now();
        loop {
            let mut slots = JoinSet::new();
            for _ in 0..self.ctx.config.import_max_batches.max(1) {
                let this = self.clone();
                slots.spawn(async move { this.drain().await });
            }
            while let Some(joined) = slots.join_next().await {
                if let Err(e) = joined {
                    error!(
                        subsystem = "sync",
                        component = "queuing",
                        queuer_id = %self.id,
                        error = ?e,
                        "Import batch slot panicked"
                    );
                }
            }

            let stop = self.cancel.is_cancelled() || !self.condition_holds();
            let leftovers = self.state.mutate(|s| {
                if s.pending.is_empty() || stop {
                    s.finished = true;
                    s.failures += s.pending.len();
                    Some(s.pending.drain(..).collect::<Vec<_>>())
                } else {
                    None
                }
            });
            if let Some(leftovers) = leftovers {
                if !leftovers.is_empty() {
                    self.delegate.imports_finished(&leftovers, false);
                }
                break;
            }
        }

        let failures = self.state.with(|s| s.failures);
        info!(
            subsystem = "sync",
            component = "queuing",
            queuer_id = %self.id,
            priority = ?self.priority,
            failures,
            cancelled = self.cancel.is_cancelled(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Import queuer finished"
        );
        failures == 0 && !self.cancel.is_cancelled()
    }

    async fn drain(&self) {
        loop {
            if self.cancel.is_cancelled() || !self.condition_holds() {
                return;
            }
            let batch_size = self.ctx.config.import_batch_size.max(1);
            let batch = self.state.mutate(|s| {
                let n = batch_size.min(s.pending.len());
                let batch: Vec<Uuid> = s.pending.drain(..n).collect();
                s.in_flight.extend(batch.iter().copied());
                batch
            });
            if batch.is_empty() {
                return;
            }

            self.process_batch(&batch).await;
            self.state.mutate(|s| {
                for id in &batch {
                    s.in_flight.remove(id);
                }
            });
        }
    }

    fn report(&self, ids: &[Uuid], success: bool) {
        if ids.is_empty() {
            return;
        }
        self.state.mutate(|s| {
            for id in ids {
                s.in_flight.remove(id);
            }
            if !success {
                s.failures += ids.len();
            }
        });
        self.delegate.imports_finished(ids, success);
    }

    async fn process_batch(&self, batch: &[Uuid]) {
        let assets = self.delegate.resolve(batch).await;

        let found: HashSet<Uuid> = assets.iter().map(|a| a.uuid()).collect();
        let mut gone: Vec<Uuid> = batch.iter().filter(|id| !found.contains(id)).copied().collect();
        gone.extend(assets.iter().filter(|a| a.deleted()).map(|a| a.uuid()));
        self.report(&gone, false);

        let done: Vec<Uuid> = assets
            .iter()
            .filter(|a| !a.deleted() && a.imported())
            .map(|a| a.uuid())
            .collect();
        self.report(&done, true);

        let assets: Vec<_> = assets
            .into_iter()
            .filter(|a| !a.deleted() && !a.imported())
            .collect();
        if assets.is_empty() {
            return;
        }

        let mut op = Arc::new(AssetImportOperation::new(
            self.ctx.clone(),
            assets,
            self.transfer_priority,
        ));
        loop {
            let Some(handle) = self.delegate.submit_import(op.clone(), self.priority).await else {
                self.report(&op.asset_ids(), false);
                return;
            };

            let outcome = tokio::select! {
                outcome = handle.finished() => outcome,
                _ = self.cancel.cancelled() => {
                    handle.cancel();
                    handle.finished().await
                }
            };

            match outcome {
                OperationOutcome::Succeeded => {
                    let (imported, skipped): (Vec<_>, Vec<_>) =
                        op.assets().iter().partition(|a| a.imported());
                    self.report(&imported.iter().map(|a| a.uuid()).collect::<Vec<_>>(), true);
                    self.report(&skipped.iter().map(|a| a.uuid()).collect::<Vec<_>>(), false);
                    return;
                }
                OperationOutcome::Cancelled => {
                    self.report(&op.asset_ids(), false);
                    return;
                }
                OperationOutcome::Failed => {}
            }

            if self.cancel.is_cancelled() {
                self.report(&op.asset_ids(), false);
                return;
            }
            if op.is_unrecoverable() {
                error!(
                    subsystem = "sync",
                    component = "queuing",
                    queuer_id = %self.id,
                    operation_id = %op.id(),
                    "Import cannot run, stopping queuer"
                );
                self.cancel.cancel();
                self.report(&op.asset_ids(), false);
                return;
            }

            let fatal = op.fatal_assets();
            let fatal_ids: HashSet<Uuid> = fatal.iter().map(|a| a.uuid()).collect();
            let recoverable = fatal.is_empty();
            if !recoverable {
                let ids: Vec<Uuid> = fatal_ids.iter().copied().collect();
                warn!(
                    subsystem = "sync",
                    component = "queuing",
                    queuer_id = %self.id,
                    operation_id = %op.id(),
                    fatal = ids.len(),
                    "Terminating assets that cannot import"
                );
                self.report(&ids, false);
                self.delegate.terminate(fatal).await;
            } else {
                self.delegate.suspend_import_queue();
            }

            let Some(replacement) = op.replacement() else {
                return;
            };
            let kept: HashSet<Uuid> = replacement.asset_ids().into_iter().collect();
            let dropped: Vec<Uuid> = op
                .asset_ids()
                .into_iter()
                .filter(|id| !kept.contains(id) && !fatal_ids.contains(id))
                .collect();
            self.report(&dropped, false);

            debug!(
                subsystem = "sync",
                component = "queuing",
                queuer_id = %self.id,
                operation_id = %op.id(),
                replacement_id = %replacement.id(),
                stage = %replacement.reached_stage(),
                recoverable,
                "Resubmitting import batch"
            );
            op = Arc::new(replacement);

            if recoverable {
                let backoff = self.ctx.config.recoverable_backoff;
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(backoff) => false,
                    _ = self.cancel.cancelled() => true,
                };
                if cancelled {
                    self.report(&op.asset_ids(), false);
                    return;
                }
                self.delegate.request_status_refresh();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, context_with, Harness};
    use std::sync::Mutex;
    use std::time::Duration;
    use tripup_core::ImportStage;

    /// Delegate that runs imports directly and records every report.
    #[derive(Default)]
    struct RecordingDelegate {
        ctx: Mutex<Option<Arc<SyncContext>>>,
        reports: Mutex<Vec<(Uuid, bool)>>,
        terminated: Mutex<Vec<Uuid>>,
        suspends: Mutex<usize>,
        refreshes: Mutex<usize>,
        queue: Mutex<Option<crate::queue::OperationQueue>>,
        /// Mark every asset deleted just before its import is queued.
        delete_on_submit: Mutex<bool>,
    }

    impl RecordingDelegate {
        fn with_queue(ctx: Arc<SyncContext>) -> Arc<Self> {
            let delegate = Self::default();
            *delegate.ctx.lock().unwrap() = Some(ctx);
            *delegate.queue.lock().unwrap() = Some(crate::queue::OperationQueue::new("import", 3));
            Arc::new(delegate)
        }

        fn reported(&self, success: bool) -> Vec<Uuid> {
            self.reports
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, s)| *s == success)
                .map(|(id, _)| *id)
                .collect()
        }
    }

    #[async_trait]
    impl ImportQueuingDelegate for RecordingDelegate {
        async fn resolve(&self, ids: &[Uuid]) -> Vec<Arc<MutableAsset>> {
            let ctx = self.ctx.lock().unwrap().clone().unwrap();
            ctx.cache.get_many(ids).await.unwrap()
        }

        async fn submit_import(
            &self,
            op: Arc<AssetImportOperation>,
            priority: QueuePriority,
        ) -> Option<OperationHandle> {
            let delete = *self.delete_on_submit.lock().unwrap();
            if delete {
                for asset in op.assets() {
                    asset.set_deleted(true).await.unwrap();
                }
            }
            let queue = self.queue.lock().unwrap().clone()?;
            Some(queue.add(op, priority))
        }

        async fn terminate(&self, assets: Vec<Arc<MutableAsset>>) {
            self.terminated
                .lock()
                .unwrap()
                .extend(assets.iter().map(|a| a.uuid()));
        }

        fn suspend_import_queue(&self) {
            *self.suspends.lock().unwrap() += 1;
        }

        fn request_status_refresh(&self) {
            *self.refreshes.lock().unwrap() += 1;
        }

        fn imports_finished(&self, ids: &[Uuid], success: bool) {
            self.reports
                .lock()
                .unwrap()
                .extend(ids.iter().map(|id| (*id, success)));
        }
    }

    #[tokio::test]
    async fn test_queuer_imports_every_batch() {
        let harness = context().await;
        let mut ids = Vec::new();
        for i in 0..7 {
            ids.push(harness.local_asset(&format!("IMG_{i}")).await.uuid());
        }
        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            ids.clone(),
        ));

        assert!(queuer.clone().run().await);
        assert!(queuer.is_finished());
        let mut imported = delegate.reported(true);
        imported.sort();
        ids.sort();
        assert_eq!(imported, ids);
        assert_eq!(harness.api.created_count(), 7);
    }

    #[tokio::test]
    async fn test_finished_queuer_rejects_append() {
        let harness = context().await;
        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate,
            Vec::new(),
        ));
        assert!(queuer.clone().run().await);
        assert!(!queuer.append(vec![Uuid::new_v4()]));
    }

    #[tokio::test]
    async fn test_append_skips_duplicates() {
        let harness = context().await;
        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let id = Uuid::new_v4();
        let queuer = AssetImportQueuingOperation::manual(harness.ctx.clone(), delegate, vec![id]);
        assert!(queuer.append(vec![id, id]));
        assert_eq!(queuer.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_assets_reported_failed() {
        let harness = context().await;
        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let ghost = Uuid::new_v4();
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            vec![ghost],
        ));
        assert!(!queuer.clone().run().await);
        assert_eq!(delegate.reported(false), vec![ghost]);
    }

    #[tokio::test]
    async fn test_false_condition_leaves_ids_unimported() {
        let harness = context().await;
        let id = harness.local_asset("IMG_1").await.uuid();
        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::automatic(
            harness.ctx.clone(),
            delegate.clone(),
            vec![id],
            Some(Arc::new(|| false)),
        ));
        assert!(!queuer.clone().run().await);
        assert_eq!(delegate.reported(false), vec![id]);
        assert_eq!(harness.api.created_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_asset_terminated_rest_imported() {
        let harness = context().await;
        let good = harness.local_asset("IMG_1").await;
        let bad = harness.local_asset("IMG_2").await;
        harness.library.remove("IMG_2");

        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            vec![good.uuid(), bad.uuid()],
        ));
        assert!(!queuer.clone().run().await);

        assert_eq!(delegate.reported(true), vec![good.uuid()]);
        assert_eq!(delegate.reported(false), vec![bad.uuid()]);
        assert_eq!(*delegate.terminated.lock().unwrap(), vec![bad.uuid()]);
        assert!(good.imported());
        assert_eq!(bad.import_status(), ImportStage::Fatal);
    }

    #[tokio::test]
    async fn test_recoverable_failure_suspends_and_retries() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        harness.api.set_failing(true);

        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            vec![asset.uuid()],
        ));
        let running = tokio::spawn(queuer.clone().run());

        while *delegate.refreshes.lock().unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(*delegate.suspends.lock().unwrap() >= 1);
        assert_eq!(asset.import_status(), ImportStage::UploadedToCloud);

        harness.api.set_failing(false);
        assert!(running.await.unwrap());
        assert!(asset.imported());
        assert_eq!(delegate.reported(true), vec![asset.uuid()]);
    }

    #[tokio::test]
    async fn test_asset_deleted_while_queuing_is_not_uploaded() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;

        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        *delegate.delete_on_submit.lock().unwrap() = true;
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            vec![asset.uuid()],
        ));

        assert!(!queuer.clone().run().await);
        assert_eq!(delegate.reported(false), vec![asset.uuid()]);
        assert!(delegate.reported(true).is_empty());
        assert_eq!(harness.api.created_count(), 0);
        assert_eq!(harness.cloud.blob_count(), 0);
        assert!(asset.fingerprint().is_none());
    }

    #[tokio::test]
    async fn test_missing_user_key_stops_without_retry() {
        let harness = context_with(Harness::new().await.without_user_key());
        let first = harness.local_asset("IMG_1").await;
        let second = harness.local_asset("IMG_2").await;

        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            vec![first.uuid(), second.uuid()],
        ));
        let finished = tokio::time::timeout(Duration::from_secs(5), queuer.clone().run()).await;
        assert_eq!(finished, Ok(false));

        let mut failed = delegate.reported(false);
        failed.sort();
        let mut expected = vec![first.uuid(), second.uuid()];
        expected.sort();
        assert_eq!(failed, expected);
        assert_eq!(*delegate.suspends.lock().unwrap(), 0);
        assert_eq!(*delegate.refreshes.lock().unwrap(), 0);
        assert!(delegate.terminated.lock().unwrap().is_empty());
        assert_eq!(harness.api.created_count(), 0);
        assert_ne!(first.import_status(), ImportStage::Fatal);
    }

    #[tokio::test]
    async fn test_cancel_reports_in_flight_as_failed() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        let gate = harness.cloud.hold_uploads().await;

        let delegate = RecordingDelegate::with_queue(harness.ctx.clone());
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            harness.ctx.clone(),
            delegate.clone(),
            vec![asset.uuid()],
        ));
        let running = tokio::spawn(queuer.clone().run());
        while harness.cloud.waiting_uploads() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        queuer.cancel();
        drop(gate);
        assert!(!running.await.unwrap());
        assert_eq!(delegate.reported(false), vec![asset.uuid()]);
        assert!(!asset.imported());
    }
}
