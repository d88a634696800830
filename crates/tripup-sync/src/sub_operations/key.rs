//! Per-asset key generation.

use std::sync::Arc;

use tracing::warn;

use tripup_db::MutableAsset;

use super::{run_batch, OperationControl, SubResult};
use crate::context::SyncContext;

/// Give every asset without a fingerprint a fresh encryption key.
///
/// Assets that already carry a fingerprint are left alone, so a retried
/// import never replaces a key that data may already be encrypted with.
pub async fn generate_keys(
    ctx: &SyncContext,
    control: &OperationControl,
    assets: Vec<Arc<MutableAsset>>,
) -> Vec<(Arc<MutableAsset>, SubResult<()>)> {
    run_batch(assets, control, ctx.config.sub_operation_concurrency, |asset| {
        generate_key(ctx, asset)
    })
    .await
}

async fn generate_key(ctx: &SyncContext, asset: Arc<MutableAsset>) -> SubResult<()> {
    if asset.fingerprint().is_some() {
        return Ok(());
    }

    let fingerprint = ctx.keychain.generate_asset_key().await?;
    if let Err(e) = asset.set_fingerprint(Some(fingerprint.clone())).await {
        if let Err(cleanup) = ctx.keychain.delete(&fingerprint).await {
            warn!(
                subsystem = "sync",
                component = "keys",
                asset_id = %asset.uuid(),
                error = %cleanup,
                "Orphaned asset key left in keychain"
            );
        }
        return Err(e.into());
    }
    Ok(())
}
