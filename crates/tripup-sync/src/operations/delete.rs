//! Deletion of assets from the server and then from disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use tripup_core::{AtomicVar, DeleteState, Quality, Result};
use tripup_db::MutableAsset;

use crate::context::SyncContext;
use crate::queue::{OperationHandle, OperationOutcome, QueuedOperation};
use crate::sub_operations::{server, OperationControl};

pub struct AssetDeleteOperation {
    id: Uuid,
    ctx: Arc<SyncContext>,
    assets: Vec<Arc<MutableAsset>>,
    control: OperationControl,
    state: AtomicVar<Option<DeleteState>>,
    dependencies: Vec<OperationHandle>,
    blocked: AtomicBool,
}

impl AssetDeleteOperation {
    /// Start from the least advanced persisted state of the batch.
    pub fn new(
        ctx: Arc<SyncContext>,
        assets: Vec<Arc<MutableAsset>>,
        dependencies: Vec<OperationHandle>,
    ) -> Self {
        let state = assets
            .iter()
            .map(|a| a.delete_status())
            .min()
            .flatten();
        Self::seeded(ctx, assets, state, dependencies)
    }

    pub fn seeded(
        ctx: Arc<SyncContext>,
        assets: Vec<Arc<MutableAsset>>,
        state: Option<DeleteState>,
        dependencies: Vec<OperationHandle>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            assets,
            control: OperationControl::new(),
            state: AtomicVar::new(state),
            dependencies,
            blocked: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn assets(&self) -> &[Arc<MutableAsset>] {
        &self.assets
    }

    pub fn asset_ids(&self) -> Vec<Uuid> {
        self.assets.iter().map(|a| a.uuid()).collect()
    }

    pub fn state(&self) -> Option<DeleteState> {
        self.state.value()
    }

    /// Whether the last run stopped because a dependency did not succeed.
    pub fn was_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    async fn run(&self) -> OperationOutcome {
        if self
            .dependencies
            .iter()
            .any(|d| d.outcome() != Some(OperationOutcome::Succeeded))
        {
            self.blocked.store(true, Ordering::SeqCst);
            info!(
                subsystem = "sync",
                component = "delete",
                operation_id = %self.id,
                "Delete blocked by unfinished work on its assets"
            );
            return OperationOutcome::Failed;
        }

        if self.state.value().is_none() {
            let results = server::delete_from_db(&self.ctx, &self.control, self.assets.clone()).await;
            if let Some((id, Err(e))) = results.iter().find(|(_, r)| r.is_err()) {
                if self.control.is_cancelled() {
                    return OperationOutcome::Cancelled;
                }
                warn!(
                    subsystem = "sync",
                    component = "delete",
                    operation_id = %self.id,
                    asset_id = %id,
                    error = %e,
                    "Server deletion failed"
                );
                return OperationOutcome::Failed;
            }
            if let Err(e) = self.persist(DeleteState::DeletedFromServer).await {
                warn!(subsystem = "sync", component = "delete", error = %e, "Failed to persist delete state");
                return OperationOutcome::Failed;
            }
            self.state.set(Some(DeleteState::DeletedFromServer));
        }

        if self.state.value() == Some(DeleteState::DeletedFromServer) {
            if !self.control.ready().await {
                return OperationOutcome::Cancelled;
            }
            let removed = match self.delete_from_disk().await {
                Ok(()) => self.persist(DeleteState::DeletedFromDisk).await,
                Err(e) => Err(e),
            };
            if let Err(e) = removed {
                warn!(
                    subsystem = "sync",
                    component = "delete",
                    operation_id = %self.id,
                    error = %e,
                    "Disk deletion failed"
                );
                if let Err(e) = self.persist(DeleteState::DeletedFromServer).await {
                    warn!(subsystem = "sync", component = "delete", error = %e, "Failed to reset delete state");
                }
                return OperationOutcome::Failed;
            }
            self.state.set(Some(DeleteState::DeletedFromDisk));
        }

        OperationOutcome::Succeeded
    }

    async fn delete_from_disk(&self) -> Result<()> {
        for asset in &self.assets {
            for quality in Quality::ALL {
                asset.set_remote_path(quality, None).await?;
                self.ctx.disk.delete(asset.physical(quality).local_path()).await?;
            }
        }
        Ok(())
    }

    async fn persist(&self, state: DeleteState) -> Result<()> {
        for asset in &self.assets {
            asset.set_delete_status(Some(state)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl QueuedOperation for AssetDeleteOperation {
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
        info!(
            subsystem = "sync",
            component = "delete",
            operation_id = %self.id,
            batch_size = self.assets.len(),
            ?outcome,
            state = ?self.state.value(),
            "Delete finished"
        );
        outcome
    }
}
