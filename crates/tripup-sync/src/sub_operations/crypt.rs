//! Encryption of local renditions and decryption of downloads.

use std::path::{Path, PathBuf};

use tripup_core::Error;
use tripup_crypto::{decrypt_asset_bytes, encrypt_asset_bytes, AssetKey};
use tripup_db::{MutableAsset, PhysicalAssetRef};

use super::{discard, run_batch, OperationControl, SubOperationError, SubResult};
use crate::context::SyncContext;

fn join_error(e: tokio::task::JoinError) -> SubOperationError {
    SubOperationError::Recoverable(e.to_string())
}

/// The asset's key. A missing fingerprint or key is permanent for the asset.
pub(crate) async fn asset_key(ctx: &SyncContext, asset: &MutableAsset) -> SubResult<AssetKey> {
    let Some(fingerprint) = asset.fingerprint() else {
        return Err(SubOperationError::Fatal(asset.uuid()));
    };
    match ctx.keychain.asset_key(&fingerprint).await {
        Ok(key) => Ok(key),
        Err(Error::NotFound(_)) | Err(Error::Crypto(_)) => Err(SubOperationError::Fatal(asset.uuid())),
        Err(e) => Err(e.into()),
    }
}

/// Encrypt each rendition into its scratch file, returning the scratch path.
pub async fn encrypt(
    ctx: &SyncContext,
    control: &OperationControl,
    targets: Vec<PhysicalAssetRef>,
) -> Vec<(PhysicalAssetRef, SubResult<PathBuf>)> {
    run_batch(targets, control, ctx.config.sub_operation_concurrency, |target| async move {
        encrypt_one(ctx, &target).await
    })
    .await
}

pub(crate) async fn encrypt_one(ctx: &SyncContext, target: &PhysicalAssetRef) -> SubResult<PathBuf> {
    let key = asset_key(ctx, &target.asset).await?;
    let plaintext = ctx.disk.read(target.local_path()).await?;
    let ciphertext = tokio::task::spawn_blocking(move || encrypt_asset_bytes(&key, &plaintext))
        .await
        .map_err(join_error)?
        .map_err(|e| SubOperationError::Recoverable(e.to_string()))?;

    let scratch = ctx.paths.scratch_path(target.uuid(), target.quality);
    ctx.disk.write(&scratch, &ciphertext).await?;
    Ok(scratch)
}

/// Decrypt downloaded scratch files into their canonical local paths.
pub async fn decrypt(
    ctx: &SyncContext,
    control: &OperationControl,
    downloads: Vec<(PhysicalAssetRef, PathBuf)>,
) -> Vec<((PhysicalAssetRef, PathBuf), SubResult<()>)> {
    run_batch(downloads, control, ctx.config.sub_operation_concurrency, |(target, scratch)| async move {
        decrypt_one(ctx, &target, scratch).await
    })
    .await
}

pub(crate) async fn decrypt_one(
    ctx: &SyncContext,
    target: &PhysicalAssetRef,
    scratch: PathBuf,
) -> SubResult<()> {
    let result = decrypt_into_place(ctx, target, &scratch).await;
    discard(ctx, &scratch).await;
    result
}

async fn decrypt_into_place(
    ctx: &SyncContext,
    target: &PhysicalAssetRef,
    scratch: &Path,
) -> SubResult<()> {
    let key = asset_key(ctx, &target.asset).await?;
    let ciphertext = ctx.disk.read(scratch).await?;
    let plaintext = tokio::task::spawn_blocking(move || decrypt_asset_bytes(&key, &ciphertext))
        .await
        .map_err(join_error)?
        .map_err(|e| SubOperationError::Recoverable(e.to_string()))?;
    ctx.disk.write(target.local_path(), &plaintext).await?;
    Ok(())
}
