//! Export of originals from the device library, with duplicate detection.

use std::sync::Arc;

use tracing::{info, warn};

use tripup_core::{Error, Quality};
use tripup_db::{compute_md5, MutableAsset};

use super::{discard, run_batch, OperationControl, SubOperationError, SubResult};
use crate::context::SyncContext;

/// Export each asset's original into its canonical local path.
///
/// The content hash of every export is checked against the database under
/// the dedup lock. When another asset already has the same content, the
/// device reference is linked to that asset and this one fails fatally so
/// it is terminated instead of uploaded twice.
pub async fn fetch_originals(
    ctx: &SyncContext,
    control: &OperationControl,
    assets: Vec<Arc<MutableAsset>>,
) -> Vec<(Arc<MutableAsset>, SubResult<()>)> {
    run_batch(assets, control, ctx.config.sub_operation_concurrency, |asset| {
        fetch_original(ctx, asset)
    })
    .await
}

async fn fetch_original(ctx: &SyncContext, asset: Arc<MutableAsset>) -> SubResult<()> {
    let uuid = asset.uuid();
    let original = asset.physical(Quality::Original).local_path().to_path_buf();
    if asset.md5().is_some() && ctx.disk.exists(&original).await? {
        return Ok(());
    }

    let Some(local_identifier) = asset.local_identifier() else {
        warn!(subsystem = "sync", component = "fetch", asset_id = %uuid, "Asset has no device reference");
        return Err(SubOperationError::Fatal(uuid));
    };

    let staging = ctx.paths.scratch_file(uuid, "export");
    let resource = match ctx.library.export_original(&local_identifier, &staging).await {
        Ok(resource) => resource,
        Err(Error::NotFound(_)) => {
            warn!(
                subsystem = "sync",
                component = "fetch",
                asset_id = %uuid,
                local_identifier = %local_identifier,
                "Library item no longer exists"
            );
            return Err(SubOperationError::Fatal(uuid));
        }
        Err(e) => return Err(e.into()),
    };

    let md5 = compute_md5(&ctx.disk.read(&staging).await?);
    {
        let _claim = ctx.dedup.lock().await;
        if let Some(existing) = ctx.repo.find_by_md5(&md5, uuid).await? {
            ctx.repo
                .link_local_identifier(&local_identifier, existing)
                .await?;
            discard(ctx, &staging).await;
            info!(
                subsystem = "sync",
                component = "fetch",
                asset_id = %uuid,
                duplicate_of = %existing,
                "Duplicate content linked to existing asset"
            );
            return Err(SubOperationError::Fatal(uuid));
        }
        asset.set_md5(Some(md5)).await?;
    }

    ctx.disk.rename(&staging, &original).await?;
    asset.set_original_uti(Some(resource.uti)).await?;
    Ok(())
}
