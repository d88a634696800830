//! Upload of originals for assets imported without one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use tripup_core::{Quality, TransferPriority};
use tripup_db::{MutableAsset, PhysicalAssetRef};

use crate::context::SyncContext;
use crate::queue::{OperationOutcome, QueuedOperation};
use crate::sub_operations::{crypt, discard, server, transfer, OperationControl};

/// Encrypts and uploads staged originals, records them on the server and
/// removes the local copies.
pub struct AssetUploadOperation {
    id: Uuid,
    ctx: Arc<SyncContext>,
    assets: Vec<Arc<MutableAsset>>,
    control: OperationControl,
}

impl AssetUploadOperation {
    pub fn new(ctx: Arc<SyncContext>, assets: Vec<Arc<MutableAsset>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            assets,
            control: OperationControl::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn asset_ids(&self) -> Vec<Uuid> {
        self.assets.iter().map(|a| a.uuid()).collect()
    }

    async fn run(&self) -> OperationOutcome {
        let mut failed = 0usize;

        let targets: Vec<_> = self
            .assets
            .iter()
            .filter(|a| a.remote_path(Quality::Original).is_none())
            .map(|a| PhysicalAssetRef::new(a.clone(), Quality::Original))
            .collect();

        let mut staged = Vec::new();
        for (target, result) in crypt::encrypt(&self.ctx, &self.control, targets).await {
            match result {
                Ok(scratch) => staged.push((target, scratch)),
                Err(_) => failed += 1,
            }
        }
        let uploads = transfer::upload(&self.ctx, &self.control, staged, TransferPriority::Low).await;
        failed += uploads.iter().filter(|(_, r)| r.is_err()).count();

        let recorded: Vec<_> = self
            .assets
            .iter()
            .filter(|a| a.remote_path(Quality::Original).is_some())
            .cloned()
            .collect();
        for (id, result) in server::write_original_to_db(&self.ctx, &self.control, recorded).await {
            match result {
                Ok(()) => {
                    if let Some(asset) = self.assets.iter().find(|a| a.uuid() == id) {
                        discard(&self.ctx, asset.physical(Quality::Original).local_path()).await;
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        subsystem = "sync",
                        component = "upload",
                        asset_id = %id,
                        error = %e,
                        "Original not recorded on server"
                    );
                }
            }
        }

        if failed == 0 {
            OperationOutcome::Succeeded
        } else if self.control.is_cancelled() {
            OperationOutcome::Cancelled
        } else {
            OperationOutcome::Failed
        }
    }
}

#[async_trait]
impl QueuedOperation for AssetUploadOperation {
    fn id(&self) -> Uuid {
        self.id
    }

    fn cancel(&self) {
        self.control.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    fn set_suspended(&self, suspended: bool) {
        self.control.set_suspended(suspended);
    }

    async fn execute(&self) -> OperationOutcome {
        if self.control.is_cancelled() {
            return OperationOutcome::Cancelled;
        }
        let outcome = self.run().await;
        info!(
            subsystem = "sync",
            component = "upload",
            operation_id = %self.id,
            batch_size = self.assets.len(),
            ?outcome,
            "Original upload finished"
        );
        outcome
    }
}
