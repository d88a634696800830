//! Import of a batch of local assets into the cloud.
//!
//! The batch advances through the import stages together: key generation,
//! export from the device library, upload of both renditions, and creation
//! on the server. Each completed stage is persisted per asset, so a
//! replacement operation resumes from the last stage every asset reached.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tripup_core::{AtomicVar, ImportStage, Quality, TransferPriority};
use tripup_db::{MutableAsset, PhysicalAssetRef};

use crate::context::SyncContext;
use crate::queue::{OperationOutcome, QueuedOperation};
use crate::sub_operations::{
    by_asset, compress, crypt, discard, fetch, key, run_batch, server, transfer, OperationControl,
    SubOperationError, SubResult,
};

type AssetResults = Vec<(Uuid, SubResult<()>)>;

fn keyed(results: Vec<(Arc<MutableAsset>, SubResult<()>)>) -> AssetResults {
    results.into_iter().map(|(a, r)| (a.uuid(), r)).collect()
}

pub struct AssetImportOperation {
    id: Uuid,
    ctx: Arc<SyncContext>,
    assets: Vec<Arc<MutableAsset>>,
    transfer_priority: TransferPriority,
    control: OperationControl,
    state: AtomicVar<ImportStage>,
    /// Last stage every non-fatal asset completed.
    reached: AtomicVar<ImportStage>,
    fatal: AtomicVar<HashSet<Uuid>>,
    /// Set when no asset of the batch can succeed until configuration changes.
    unrecoverable: AtomicVar<bool>,
}

impl AssetImportOperation {
    /// Start from the lowest stage any asset has persisted.
    pub fn new(
        ctx: Arc<SyncContext>,
        assets: Vec<Arc<MutableAsset>>,
        transfer_priority: TransferPriority,
    ) -> Self {
        let start = assets
            .iter()
            .map(|a| a.import_status())
            .filter(|s| *s != ImportStage::Fatal)
            .min()
            .unwrap_or(ImportStage::Pending);
        Self::resuming(ctx, assets, start, transfer_priority)
    }

    /// Start from a stage already known to be complete for every asset.
    pub fn resuming(
        ctx: Arc<SyncContext>,
        assets: Vec<Arc<MutableAsset>>,
        stage: ImportStage,
        transfer_priority: TransferPriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            assets,
            transfer_priority,
            control: OperationControl::new(),
            state: AtomicVar::new(stage),
            reached: AtomicVar::new(stage),
            fatal: AtomicVar::default(),
            unrecoverable: AtomicVar::default(),
        }
    }

    /// A fresh operation for the assets that can still import, resuming from
    /// the reached stage. `None` when no such asset remains.
    pub fn replacement(&self) -> Option<Self> {
        if self.is_unrecoverable() {
            return None;
        }
        let fatal = self.fatal.value();
        let assets: Vec<_> = self
            .assets
            .iter()
            .filter(|a| !fatal.contains(&a.uuid()) && !a.deleted())
            .cloned()
            .collect();
        if assets.is_empty() {
            return None;
        }
        Some(Self::resuming(
            self.ctx.clone(),
            assets,
            self.reached.value(),
            self.transfer_priority,
        ))
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

    pub fn state(&self) -> ImportStage {
        self.state.value()
    }

    pub fn reached_stage(&self) -> ImportStage {
        self.reached.value()
    }

    pub fn fatal_assets(&self) -> Vec<Arc<MutableAsset>> {
        let fatal = self.fatal.value();
        self.assets
            .iter()
            .filter(|a| fatal.contains(&a.uuid()))
            .cloned()
            .collect()
    }

    pub fn transfer_priority(&self) -> TransferPriority {
        self.transfer_priority
    }

    /// True once the batch stopped on a configuration error; retrying it
    /// cannot help.
    pub fn is_unrecoverable(&self) -> bool {
        self.unrecoverable.value()
    }

    async fn run(&self) -> OperationOutcome {
        // Assets deleted after queuing are left to their delete operation.
        let assets: Vec<_> = self
            .assets
            .iter()
            .filter(|a| !a.imported() && !a.deleted())
            .cloned()
            .collect();
        if assets.is_empty() {
            self.state.set(ImportStage::Success);
            return OperationOutcome::Succeeded;
        }
        if !self.ctx.keychain.has_user_key() {
            return self.halt("user keypair not loaded");
        }

        let mut stage = self.state.value();
        if stage == ImportStage::FetchedFromIos && self.originals_missing(&assets).await {
            debug!(
                subsystem = "sync",
                component = "import",
                operation_id = %self.id,
                "Exported originals missing, fetching again"
            );
            stage = ImportStage::KeyGenerated;
            if !self.advance(stage) {
                return OperationOutcome::Failed;
            }
            self.reached.set(stage);
        }

        while let Some(next) = stage.next() {
            if self.control.is_cancelled() {
                return OperationOutcome::Cancelled;
            }

            let start = Instant::now();
            let results = match next {
                ImportStage::KeyGenerated => {
                    keyed(key::generate_keys(&self.ctx, &self.control, assets.clone()).await)
                }
                ImportStage::FetchedFromIos => {
                    keyed(fetch::fetch_originals(&self.ctx, &self.control, assets.clone()).await)
                }
                ImportStage::UploadedToCloud => self.upload_renditions(&assets).await,
                ImportStage::Success => {
                    server::create_on_server(&self.ctx, &self.control, assets.clone()).await
                }
                ImportStage::Pending | ImportStage::Fatal => break,
            };
            debug!(
                subsystem = "sync",
                component = "import",
                operation_id = %self.id,
                stage = %next,
                duration_ms = start.elapsed().as_millis() as u64,
                "Import stage finished"
            );

            if let Some(reason) = results.iter().find_map(|(_, r)| match r {
                Err(SubOperationError::Unrecoverable(reason)) => Some(reason.clone()),
                _ => None,
            }) {
                return self.halt(&reason);
            }

            let fatal: HashSet<Uuid> = results
                .iter()
                .filter(|(_, r)| matches!(r, Err(SubOperationError::Fatal(_))))
                .map(|(id, _)| *id)
                .collect();
            let others_ok = results
                .iter()
                .all(|(_, r)| matches!(r, Ok(()) | Err(SubOperationError::Fatal(_))));

            if !fatal.is_empty() {
                self.fatal.mutate(|f| f.extend(fatal.iter().copied()));
                if others_ok && self.persist_stage(&assets, next, &fatal).await {
                    self.reached.set(next);
                }
                self.mark_fatal(&fatal).await;
                self.advance(ImportStage::Fatal);
                warn!(
                    subsystem = "sync",
                    component = "import",
                    operation_id = %self.id,
                    stage = %next,
                    fatal = fatal.len(),
                    "Assets failed permanently"
                );
                return OperationOutcome::Failed;
            }

            if !others_ok {
                if self.control.is_cancelled() {
                    return OperationOutcome::Cancelled;
                }
                if let Some((id, Err(e))) = results.iter().find(|(_, r)| r.is_err()) {
                    info!(
                        subsystem = "sync",
                        component = "import",
                        operation_id = %self.id,
                        asset_id = %id,
                        stage = %next,
                        error = %e,
                        "Import stage failed"
                    );
                }
                return OperationOutcome::Failed;
            }

            if !self.persist_stage(&assets, next, &HashSet::new()).await {
                return OperationOutcome::Failed;
            }
            if !self.advance(next) {
                return OperationOutcome::Failed;
            }
            stage = next;
            self.reached.set(next);
        }

        OperationOutcome::Succeeded
    }

    /// Move to `next` when the stage table allows it from the current stage.
    fn advance(&self, next: ImportStage) -> bool {
        let current = self.state.value();
        if !current.is_valid_next_state(next) {
            error!(
                subsystem = "sync",
                component = "import",
                operation_id = %self.id,
                from = %current,
                to = %next,
                "Invalid import stage transition"
            );
            return false;
        }
        self.state.set(next);
        true
    }

    fn halt(&self, reason: &str) -> OperationOutcome {
        self.unrecoverable.set(true);
        error!(
            subsystem = "sync",
            component = "import",
            operation_id = %self.id,
            reason,
            "Import cannot run"
        );
        OperationOutcome::Failed
    }

    async fn originals_missing(&self, assets: &[Arc<MutableAsset>]) -> bool {
        for asset in assets {
            let path = asset.physical(Quality::Original).local_path();
            if asset.remote_path(Quality::Original).is_none()
                && !self.ctx.disk.exists(path).await.unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Both renditions of every asset, concurrently: compress (low only),
    /// encrypt, upload.
    async fn upload_renditions(&self, assets: &[Arc<MutableAsset>]) -> AssetResults {
        let targets = PhysicalAssetRef::both(assets);
        let results = run_batch(
            targets,
            &self.control,
            self.ctx.config.sub_operation_concurrency,
            |target| async move { self.upload_rendition(&target).await },
        )
        .await;
        by_asset(results)
    }

    async fn upload_rendition(&self, target: &PhysicalAssetRef) -> SubResult<()> {
        if target.remote_path().is_some() {
            return Ok(());
        }
        if target.quality == Quality::Low {
            compress::compress_one(&self.ctx, target.asset.clone()).await?;
            if !self.control.ready().await {
                return Err(SubOperationError::NotRun);
            }
        }

        let scratch = crypt::encrypt_one(&self.ctx, target).await?;
        if !self.control.ready().await {
            discard(&self.ctx, &scratch).await;
            return Err(SubOperationError::NotRun);
        }

        // The asset is half-way to usable once one tier is up; finish it quickly.
        let priority = if target.asset.remote_path(target.quality.other()).is_some() {
            TransferPriority::High
        } else {
            self.transfer_priority
        };
        transfer::upload_one(&self.ctx, target, &scratch, priority)
            .await
            .map(|_| ())
    }

    async fn persist_stage(
        &self,
        assets: &[Arc<MutableAsset>],
        stage: ImportStage,
        skip: &HashSet<Uuid>,
    ) -> bool {
        for asset in assets.iter().filter(|a| !skip.contains(&a.uuid())) {
            if asset.import_status() >= stage {
                continue;
            }
            if let Err(e) = asset.set_import_status(stage).await {
                warn!(
                    subsystem = "sync",
                    component = "import",
                    asset_id = %asset.uuid(),
                    %stage,
                    error = %e,
                    "Failed to persist import stage"
                );
                return false;
            }
        }
        true
    }

    async fn mark_fatal(&self, fatal: &HashSet<Uuid>) {
        for asset in self.assets.iter().filter(|a| fatal.contains(&a.uuid())) {
            if let Err(e) = asset.set_import_status(ImportStage::Fatal).await {
                warn!(
                    subsystem = "sync",
                    component = "import",
                    asset_id = %asset.uuid(),
                    error = %e,
                    "Failed to persist fatal import stage"
                );
            }
        }
    }
}

#[async_trait]
impl QueuedOperation for AssetImportOperation {
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

        let start = Instant::now();
        info!(
            subsystem = "sync",
            component = "import",
            operation_id = %self.id,
            batch_size = self.assets.len(),
            stage = %self.state.value(),
            "Import started"
        );
        let outcome = self.run().await;
        info!(
            subsystem = "sync",
            component = "import",
            operation_id = %self.id,
            ?outcome,
            stage = %self.state.value(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Import finished"
        );
        outcome
    }
}
