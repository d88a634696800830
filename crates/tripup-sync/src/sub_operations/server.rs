//! Asset metadata calls against the REST API.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use tripup_core::{CreateAssetRequest, OriginalUpdate, Quality};
use tripup_crypto::encrypt_string;
use tripup_db::MutableAsset;

use super::crypt::asset_key;
use super::{discard, OperationControl, SubOperationError, SubResult};
use crate::context::SyncContext;

type AssetResults = Vec<(Uuid, SubResult<()>)>;

fn all_failed(assets: &[Arc<MutableAsset>], error: SubOperationError) -> AssetResults {
    assets.iter().map(|a| (a.uuid(), Err(error.clone()))).collect()
}

/// Create assets on the server in one request.
///
/// Accepted assets are marked imported, their cloud filesize is recorded and
/// the local original is removed; the low-quality rendition stays on disk.
/// Assets already imported succeed without a request.
pub async fn create_on_server(
    ctx: &SyncContext,
    control: &OperationControl,
    assets: Vec<Arc<MutableAsset>>,
) -> AssetResults {
    let mut results = Vec::with_capacity(assets.len());
    let mut pending = Vec::new();
    let mut requests = Vec::new();

    for asset in assets {
        if asset.imported() {
            results.push((asset.uuid(), Ok(())));
            continue;
        }
        match build_request(ctx, &asset).await {
            Ok(request) => {
                requests.push(request);
                pending.push(asset);
            }
            Err(e) => results.push((asset.uuid(), Err(e))),
        }
    }
    if pending.is_empty() {
        return results;
    }
    if !control.ready().await {
        results.extend(all_failed(&pending, SubOperationError::NotRun));
        return results;
    }

    let accepted = match ctx.api.create_assets(requests).await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(subsystem = "sync", component = "server", op = "create", error = %e, "Asset creation failed");
            results.extend(all_failed(&pending, SubOperationError::Recoverable(e.to_string())));
            return results;
        }
    };

    for asset in pending {
        let result = match accepted.get(&asset.uuid()) {
            Some(size) => finish_import(ctx, &asset, *size).await,
            None => Err(SubOperationError::Recoverable(
                "server did not accept asset".to_string(),
            )),
        };
        results.push((asset.uuid(), result));
    }
    results
}

async fn build_request(ctx: &SyncContext, asset: &MutableAsset) -> SubResult<CreateAssetRequest> {
    let (Some(remote_path_low), Some(remote_path_original)) = (
        asset.remote_path(Quality::Low),
        asset.remote_path(Quality::Original),
    ) else {
        return Err(SubOperationError::Recoverable(
            "renditions not uploaded".to_string(),
        ));
    };
    let Some(md5) = asset.md5() else {
        return Err(SubOperationError::Recoverable("content hash missing".to_string()));
    };
    let Some(fingerprint) = asset.fingerprint() else {
        return Err(SubOperationError::Fatal(asset.uuid()));
    };

    let key = asset_key(ctx, asset).await?;
    let seal = |value: String| {
        encrypt_string(&key, &value).map_err(|e| SubOperationError::Recoverable(e.to_string()))
    };

    let original = asset.physical(Quality::Original).local_path();
    let total_size = if ctx.disk.exists(original).await? {
        ctx.disk.size(original).await?
    } else {
        0
    };
    let sealed_key = ctx.keychain.seal_for_user(&fingerprint).await?;
    let pixel_size = asset.pixel_size();

    Ok(CreateAssetRequest {
        uuid: asset.uuid(),
        asset_type: asset.asset_type(),
        remote_path_low,
        remote_path_original,
        original_uti: asset.original_uti(),
        pixel_width: pixel_size.width,
        pixel_height: pixel_size.height,
        total_size,
        encrypted_md5: seal(md5)?,
        encrypted_creation_date: asset.creation_date().map(|d| seal(d.to_rfc3339())).transpose()?,
        encrypted_location: asset.location().map(|l| seal(l.to_string())).transpose()?,
        encrypted_duration: asset.duration().map(|d| seal(d.to_string())).transpose()?,
        sealed_key,
        favourite: asset.favourite(),
    })
}

async fn finish_import(ctx: &SyncContext, asset: &MutableAsset, cloud_filesize: u64) -> SubResult<()> {
    asset.set_cloud_filesize(cloud_filesize).await?;
    asset.set_imported(true).await?;
    discard(ctx, asset.physical(Quality::Original).local_path()).await;
    info!(
        subsystem = "sync",
        component = "server",
        asset_id = %asset.uuid(),
        cloud_filesize,
        "Asset created on server"
    );
    Ok(())
}

/// Report late-uploaded originals to the server.
pub async fn write_original_to_db(
    ctx: &SyncContext,
    control: &OperationControl,
    assets: Vec<Arc<MutableAsset>>,
) -> AssetResults {
    let mut results = Vec::with_capacity(assets.len());
    let mut pending = Vec::new();
    let mut updates = Vec::new();
    for asset in assets {
        match asset.remote_path(Quality::Original) {
            Some(remote_path_original) => {
                updates.push(OriginalUpdate {
                    uuid: asset.uuid(),
                    remote_path_original,
                });
                pending.push(asset);
            }
            None => results.push((
                asset.uuid(),
                Err(SubOperationError::Recoverable("original not uploaded".to_string())),
            )),
        }
    }
    if pending.is_empty() {
        return results;
    }
    if !control.ready().await {
        results.extend(all_failed(&pending, SubOperationError::NotRun));
        return results;
    }

    match ctx.api.update_originals(updates).await {
        Ok(sizes) => {
            for asset in pending {
                let result = match sizes.get(&asset.uuid()) {
                    Some(size) => asset.set_cloud_filesize(*size).await.map_err(Into::into),
                    None => Err(SubOperationError::Recoverable(
                        "server did not record original".to_string(),
                    )),
                };
                results.push((asset.uuid(), result));
            }
        }
        Err(e) => results.extend(all_failed(&pending, SubOperationError::Recoverable(e.to_string()))),
    }
    results
}

/// Delete assets on the server. Assets never created there succeed trivially.
pub async fn delete_from_db(
    ctx: &SyncContext,
    control: &OperationControl,
    assets: Vec<Arc<MutableAsset>>,
) -> AssetResults {
    let (on_server, local_only): (Vec<_>, Vec<_>) = assets.into_iter().partition(|a| a.imported());
    let mut results: AssetResults = local_only.iter().map(|a| (a.uuid(), Ok(()))).collect();
    if on_server.is_empty() {
        return results;
    }
    if !control.ready().await {
        results.extend(all_failed(&on_server, SubOperationError::NotRun));
        return results;
    }

    let ids: Vec<Uuid> = on_server.iter().map(|a| a.uuid()).collect();
    let outcome = match ctx.api.delete_assets(&ids).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(SubOperationError::Recoverable(
            "server refused deletion".to_string(),
        )),
        Err(e) => Err(SubOperationError::Recoverable(e.to_string())),
    };
    results.extend(ids.into_iter().map(|id| (id, outcome.clone())));
    results
}
