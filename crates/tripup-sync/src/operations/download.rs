//! Download and decryption of renditions into local storage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use tripup_core::{AtomicVar, Quality, TransferPriority};
use tripup_db::PhysicalAssetRef;

use crate::context::SyncContext;
use crate::queue::{OperationOutcome, QueuedOperation};
use crate::sub_operations::{crypt, transfer, OperationControl};

pub struct AssetDownloadOperation {
    id: Uuid,
    ctx: Arc<SyncContext>,
    targets: Vec<PhysicalAssetRef>,
    priority: TransferPriority,
    control: OperationControl,
    completed: AtomicVar<Vec<(Uuid, Quality)>>,
}

impl AssetDownloadOperation {
    pub fn new(ctx: Arc<SyncContext>, targets: Vec<PhysicalAssetRef>, priority: TransferPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            targets,
            priority,
            control: OperationControl::new(),
            completed: AtomicVar::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn targets(&self) -> Vec<(Uuid, Quality)> {
        self.targets.iter().map(|t| (t.uuid(), t.quality)).collect()
    }

    pub fn asset_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.targets.iter().map(|t| t.uuid()).collect();
        ids.dedup();
        ids
    }

    /// Renditions now present locally.
    pub fn completed(&self) -> Vec<(Uuid, Quality)> {
        self.completed.value()
    }

    async fn run(&self) -> OperationOutcome {
        let downloads = transfer::download(&self.ctx, &self.control, self.targets.clone(), self.priority).await;
        let fetched: Vec<_> = downloads
            .into_iter()
            .filter_map(|(target, result)| result.ok().map(|scratch| (target, scratch)))
            .collect();

        for ((target, _), result) in crypt::decrypt(&self.ctx, &self.control, fetched).await {
            if result.is_ok() {
                self.completed.mutate(|c| c.push((target.uuid(), target.quality)));
            }
        }

        if self.completed.with(|c| c.len()) == self.targets.len() {
            OperationOutcome::Succeeded
        } else if self.control.is_cancelled() {
            OperationOutcome::Cancelled
        } else {
            OperationOutcome::Failed
        }
    }
}

#[async_trait]
impl QueuedOperation for AssetDownloadOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn cancel(&self) {
        self.control.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    async fn execute(&self) -> OperationOutcome {
        if self.control.is_cancelled() {
            return OperationOutcome::Cancelled;
        }
        let outcome = self.run().await;
        debug!(
            subsystem = "sync",
            component = "download",
            operation_id = %self.id,
            requested = self.targets.len(),
            completed = self.completed.with(|c| c.len()),
            ?outcome,
            "Download finished"
        );
        outcome
    }
}
