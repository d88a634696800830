//! Cloud transfers of encrypted renditions.

use std::path::{Path, PathBuf};

use tracing::debug;

use tripup_core::TransferPriority;
use tripup_db::PhysicalAssetRef;

use super::{discard, run_batch, OperationControl, SubOperationError, SubResult};
use crate::context::SyncContext;

/// Upload encrypted scratch files and record each remote path.
pub async fn upload(
    ctx: &SyncContext,
    control: &OperationControl,
    staged: Vec<(PhysicalAssetRef, PathBuf)>,
    priority: TransferPriority,
) -> Vec<((PhysicalAssetRef, PathBuf), SubResult<String>)> {
    run_batch(staged, control, ctx.config.sub_operation_concurrency, |(target, scratch)| async move {
        upload_one(ctx, &target, &scratch, priority).await
    })
    .await
}

/// Upload one scratch file. The scratch file is removed either way.
pub(crate) async fn upload_one(
    ctx: &SyncContext,
    target: &PhysicalAssetRef,
    scratch: &Path,
    priority: TransferPriority,
) -> SubResult<String> {
    let uploaded = ctx.cloud.upload(scratch, priority).await;
    discard(ctx, scratch).await;
    let remote = uploaded?;

    target
        .asset
        .set_remote_path(target.quality, Some(remote.clone()))
        .await?;
    debug!(
        subsystem = "sync",
        component = "transfer",
        op = "upload",
        asset_id = %target.uuid(),
        quality = %target.quality,
        ?priority,
        "Rendition uploaded"
    );
    Ok(remote)
}

/// Download renditions into scratch files, returning each scratch path.
pub async fn download(
    ctx: &SyncContext,
    control: &OperationControl,
    targets: Vec<PhysicalAssetRef>,
    priority: TransferPriority,
) -> Vec<(PhysicalAssetRef, SubResult<PathBuf>)> {
    run_batch(targets, control, ctx.config.sub_operation_concurrency, |target| async move {
        download_one(ctx, &target, priority).await
    })
    .await
}

pub(crate) async fn download_one(
    ctx: &SyncContext,
    target: &PhysicalAssetRef,
    priority: TransferPriority,
) -> SubResult<PathBuf> {
    let Some(remote) = target.remote_path() else {
        return Err(SubOperationError::Recoverable(format!(
            "{} rendition of {} is not in the cloud",
            target.quality,
            target.uuid()
        )));
    };

    let scratch = ctx.paths.scratch_path(target.uuid(), target.quality);
    if let Err(e) = ctx.cloud.download(&remote, &scratch, priority).await {
        discard(ctx, &scratch).await;
        return Err(e.into());
    }
    Ok(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use tripup_core::Quality;

    #[tokio::test]
    async fn test_upload_records_remote_path() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        let target = PhysicalAssetRef::new(asset.clone(), Quality::Low);
        let scratch = harness.paths.scratch_path(asset.uuid(), Quality::Low);
        harness.ctx.disk.write(&scratch, b"cipher").await.unwrap();

        let mut results = upload(
            &harness.ctx,
            &OperationControl::new(),
            vec![(target, scratch.clone())],
            TransferPriority::Low,
        )
        .await;
        let remote = results.remove(0).1.unwrap();

        assert_eq!(asset.remote_path(Quality::Low), Some(remote.clone()));
        assert_eq!(harness.cloud.blob(&remote).unwrap(), b"cipher");
        assert_eq!(harness.cloud.upload_priorities(), vec![TransferPriority::Low]);
        assert!(!harness.disk.contains(&scratch));
    }

    #[tokio::test]
    async fn test_failed_upload_discards_scratch() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        let target = PhysicalAssetRef::new(asset.clone(), Quality::Original);
        let scratch = harness.paths.scratch_path(asset.uuid(), Quality::Original);
        harness.ctx.disk.write(&scratch, b"cipher").await.unwrap();
        harness.cloud.set_failing(true);

        let result = upload_one(&harness.ctx, &target, &scratch, TransferPriority::High).await;
        assert!(matches!(result, Err(SubOperationError::Recoverable(_))));
        assert!(asset.remote_path(Quality::Original).is_none());
        assert!(!harness.disk.contains(&scratch));
    }

    #[tokio::test]
    async fn test_download_fills_scratch_file() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        harness.cloud.put_blob("blobs/low-1", b"cipher".to_vec());
        asset
            .set_remote_path(Quality::Low, Some("blobs/low-1".to_string()))
            .await
            .unwrap();

        let target = PhysicalAssetRef::new(asset.clone(), Quality::Low);
        let scratch = download_one(&harness.ctx, &target, TransferPriority::High)
            .await
            .unwrap();
        assert_eq!(scratch, harness.paths.scratch_path(asset.uuid(), Quality::Low));
        assert_eq!(harness.ctx.disk.read(&scratch).await.unwrap(), b"cipher");
    }

    #[tokio::test]
    async fn test_download_requires_remote_path() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        let target = PhysicalAssetRef::new(asset, Quality::Original);

        let result = download_one(&harness.ctx, &target, TransferPriority::High).await;
        assert!(matches!(result, Err(SubOperationError::Recoverable(_))));
        assert_eq!(harness.cloud.download_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_blob_leaves_no_scratch() {
        let harness = context().await;
        let asset = harness.local_asset("IMG_1").await;
        asset
            .set_remote_path(Quality::Low, Some("blobs/gone".to_string()))
            .await
            .unwrap();

        let mut results = download(
            &harness.ctx,
            &OperationControl::new(),
            vec![PhysicalAssetRef::new(asset.clone(), Quality::Low)],
            TransferPriority::Low,
        )
        .await;
        assert!(results.remove(0).1.is_err());
        assert!(!harness.disk.contains(&harness.paths.scratch_path(asset.uuid(), Quality::Low)));
    }
}
