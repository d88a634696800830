//! Live, database-backed representation of an asset.
//!
//! A [`MutableAsset`] is shared as `Arc<MutableAsset>` by every operation
//! touching the asset. Setters write through to the database first and only
//! then update memory, so a failed write never leaves memory ahead of disk.
//! Writes are linearised per field; there is no multi-field atomicity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tripup_core::{
    Asset, AssetRecord, AssetRepository, AssetType, AtomicVar, DeleteState, Geolocation,
    ImportStage, PixelSize, Quality, Result,
};

use crate::file_storage::AssetPaths;

#[derive(Debug, Clone)]
struct AssetState {
    imported: bool,
    favourite: bool,
    deleted: bool,
    md5: Option<String>,
    fingerprint: Option<String>,
    local_identifier: Option<String>,
    original_uti: Option<String>,
    import_status: ImportStage,
    delete_status: Option<DeleteState>,
    cloud_filesize: u64,
}

/// One quality tier of a live asset.
#[derive(Debug)]
pub struct MutablePhysicalAsset {
    asset_id: Uuid,
    quality: Quality,
    local_path: PathBuf,
    remote_path: AtomicVar<Option<String>>,
}

impl MutablePhysicalAsset {
    pub fn asset_id(&self) -> Uuid {
        self.asset_id
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// `None` until the rendition is in the cloud.
    pub fn remote_path(&self) -> Option<String> {
        self.remote_path.value()
    }
}

/// Live asset with write-through mutable fields.
pub struct MutableAsset {
    uuid: Uuid,
    owner_id: Uuid,
    asset_type: AssetType,
    creation_date: Option<DateTime<Utc>>,
    location: Option<Geolocation>,
    pixel_size: PixelSize,
    duration: Option<f64>,
    state: AtomicVar<AssetState>,
    low: MutablePhysicalAsset,
    original: MutablePhysicalAsset,
    repo: Arc<dyn AssetRepository>,
}

impl std::fmt::Debug for MutableAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableAsset")
            .field("uuid", &self.uuid)
            .field("asset_type", &self.asset_type)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MutableAsset {
    pub fn new(record: AssetRecord, repo: Arc<dyn AssetRepository>, paths: &AssetPaths) -> Self {
        let physical = |quality: Quality, remote: Option<String>| MutablePhysicalAsset {
            asset_id: record.uuid,
            quality,
            local_path: paths.local_path(record.uuid, quality),
            remote_path: AtomicVar::new(remote),
        };
        let low = physical(Quality::Low, record.remote_path_low.clone());
        let original = physical(Quality::Original, record.remote_path_original.clone());

        Self {
            uuid: record.uuid,
            owner_id: record.owner_id,
            asset_type: record.asset_type,
            creation_date: record.creation_date,
            location: record.location,
            pixel_size: record.pixel_size,
            duration: record.duration,
            state: AtomicVar::new(AssetState {
                imported: record.imported,
                favourite: record.favourite,
                deleted: record.deleted,
                md5: record.md5,
                fingerprint: record.fingerprint,
                local_identifier: record.local_identifier,
                original_uti: record.original_uti,
                import_status: record.import_status,
                delete_status: record.delete_status,
                cloud_filesize: record.cloud_filesize,
            }),
            low,
            original,
            repo,
        }
    }

    // =========================================================================
    // Immutable fields
    // =========================================================================

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.creation_date
    }

    pub fn location(&self) -> Option<Geolocation> {
        self.location
    }

    pub fn pixel_size(&self) -> PixelSize {
        self.pixel_size
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn physical(&self, quality: Quality) -> &MutablePhysicalAsset {
        match quality {
            Quality::Low => &self.low,
            Quality::Original => &self.original,
        }
    }

    // =========================================================================
    // Mutable fields
    // =========================================================================

    pub fn imported(&self) -> bool {
        self.state.with(|s| s.imported)
    }

    pub fn favourite(&self) -> bool {
        self.state.with(|s| s.favourite)
    }

    pub fn deleted(&self) -> bool {
        self.state.with(|s| s.deleted)
    }

    pub fn md5(&self) -> Option<String> {
        self.state.with(|s| s.md5.clone())
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.state.with(|s| s.fingerprint.clone())
    }

    pub fn local_identifier(&self) -> Option<String> {
        self.state.with(|s| s.local_identifier.clone())
    }

    pub fn original_uti(&self) -> Option<String> {
        self.state.with(|s| s.original_uti.clone())
    }

    pub fn import_status(&self) -> ImportStage {
        self.state.with(|s| s.import_status)
    }

    pub fn delete_status(&self) -> Option<DeleteState> {
        self.state.with(|s| s.delete_status)
    }

    pub fn cloud_filesize(&self) -> u64 {
        self.state.with(|s| s.cloud_filesize)
    }

    pub fn remote_path(&self, quality: Quality) -> Option<String> {
        self.physical(quality).remote_path()
    }

    pub async fn set_imported(&self, imported: bool) -> Result<()> {
        self.repo.set_imported(self.uuid, imported).await?;
        self.state.mutate(|s| s.imported = imported);
        Ok(())
    }

    pub async fn set_favourite(&self, favourite: bool) -> Result<()> {
        self.repo.set_favourite(self.uuid, favourite).await?;
        self.state.mutate(|s| s.favourite = favourite);
        Ok(())
    }

    pub async fn set_deleted(&self, deleted: bool) -> Result<()> {
        self.repo.set_deleted(self.uuid, deleted).await?;
        self.state.mutate(|s| s.deleted = deleted);
        Ok(())
    }

    pub async fn set_md5(&self, md5: Option<String>) -> Result<()> {
        self.repo.set_md5(self.uuid, md5.as_deref()).await?;
        self.state.mutate(|s| s.md5 = md5);
        Ok(())
    }

    pub async fn set_fingerprint(&self, fingerprint: Option<String>) -> Result<()> {
        self.repo
            .set_fingerprint(self.uuid, fingerprint.as_deref())
            .await?;
        self.state.mutate(|s| s.fingerprint = fingerprint);
        Ok(())
    }

    pub async fn set_local_identifier(&self, local_identifier: Option<String>) -> Result<()> {
        self.repo
            .set_local_identifier(self.uuid, local_identifier.as_deref())
            .await?;
        self.state.mutate(|s| s.local_identifier = local_identifier);
        Ok(())
    }

    pub async fn set_original_uti(&self, uti: Option<String>) -> Result<()> {
        self.repo.set_original_uti(self.uuid, uti.as_deref()).await?;
        self.state.mutate(|s| s.original_uti = uti);
        Ok(())
    }

    pub async fn set_import_status(&self, status: ImportStage) -> Result<()> {
        self.repo.set_import_status(self.uuid, status).await?;
        self.state.mutate(|s| s.import_status = status);
        Ok(())
    }

    pub async fn set_delete_status(&self, status: Option<DeleteState>) -> Result<()> {
        self.repo.set_delete_status(self.uuid, status).await?;
        self.state.mutate(|s| s.delete_status = status);
        Ok(())
    }

    pub async fn set_cloud_filesize(&self, size: u64) -> Result<()> {
        self.repo.set_cloud_filesize(self.uuid, size).await?;
        self.state.mutate(|s| s.cloud_filesize = size);
        Ok(())
    }

    pub async fn set_remote_path(&self, quality: Quality, path: Option<String>) -> Result<()> {
        self.repo
            .set_remote_path(self.uuid, quality, path.as_deref())
            .await?;
        self.physical(quality).remote_path.set(path);
        Ok(())
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Snapshot of the full record as currently held in memory.
    pub fn record(&self) -> AssetRecord {
        let state = self.state.value();
        AssetRecord {
            uuid: self.uuid,
            owner_id: self.owner_id,
            asset_type: self.asset_type,
            creation_date: self.creation_date,
            location: self.location,
            pixel_size: self.pixel_size,
            duration: self.duration,
            imported: state.imported,
            favourite: state.favourite,
            deleted: state.deleted,
            md5: state.md5,
            fingerprint: state.fingerprint,
            local_identifier: state.local_identifier,
            original_uti: state.original_uti,
            import_status: state.import_status,
            delete_status: state.delete_status,
            cloud_filesize: state.cloud_filesize,
            remote_path_low: self.low.remote_path(),
            remote_path_original: self.original.remote_path(),
        }
    }

    pub fn asset(&self) -> Asset {
        self.record().asset()
    }
}

/// A (live asset, quality tier) pair; the unit physical operations act on.
#[derive(Debug, Clone)]
pub struct PhysicalAssetRef {
    pub asset: Arc<MutableAsset>,
    pub quality: Quality,
}

impl PhysicalAssetRef {
    pub fn new(asset: Arc<MutableAsset>, quality: Quality) -> Self {
        Self { asset, quality }
    }

    /// Both tiers of each asset.
    pub fn both(assets: &[Arc<MutableAsset>]) -> Vec<Self> {
        assets
            .iter()
            .flat_map(|a| Quality::ALL.map(|q| Self::new(a.clone(), q)))
            .collect()
    }

    pub fn uuid(&self) -> Uuid {
        self.asset.uuid()
    }

    pub fn physical(&self) -> &MutablePhysicalAsset {
        self.asset.physical(self.quality)
    }

    pub fn local_path(&self) -> &Path {
        self.physical().local_path()
    }

    pub fn remote_path(&self) -> Option<String> {
        self.physical().remote_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{sample_device_asset, TestDatabase};

    async fn live_asset(db: &TestDatabase) -> MutableAsset {
        let record = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("IMG_1"));
        db.db.assets.insert(&record).await.unwrap();
        MutableAsset::new(record, db.asset_repository(), &AssetPaths::new("/data"))
    }

    #[tokio::test]
    async fn test_setters_write_through() {
        let db = TestDatabase::new().await;
        let asset = live_asset(&db).await;

        asset.set_fingerprint(Some("fp".into())).await.unwrap();
        asset.set_import_status(ImportStage::KeyGenerated).await.unwrap();
        asset
            .set_remote_path(Quality::Original, Some("r/orig".into()))
            .await
            .unwrap();

        assert_eq!(asset.fingerprint().as_deref(), Some("fp"));
        assert_eq!(asset.remote_path(Quality::Original).as_deref(), Some("r/orig"));

        let stored = db.db.assets.fetch(asset.uuid()).await.unwrap().unwrap();
        assert_eq!(stored.fingerprint.as_deref(), Some("fp"));
        assert_eq!(stored.import_status, ImportStage::KeyGenerated);
        assert_eq!(stored.remote_path_original.as_deref(), Some("r/orig"));
        assert_eq!(asset.record(), stored);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let db = TestDatabase::new().await;
        let asset = live_asset(&db).await;
        db.db.assets.delete(asset.uuid()).await.unwrap();

        assert!(asset.set_md5(Some("abc".into())).await.is_err());
        assert!(asset.md5().is_none());
    }

    #[tokio::test]
    async fn test_local_paths_per_quality() {
        let db = TestDatabase::new().await;
        let asset = Arc::new(live_asset(&db).await);
        let refs = PhysicalAssetRef::both(&[asset.clone()]);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].quality, Quality::Low);
        assert!(refs[0].local_path().ends_with(format!("low/{}", asset.uuid())));
        assert!(refs[1].local_path().ends_with(format!("original/{}", asset.uuid())));
        assert_eq!(refs[1].physical().asset_id(), asset.uuid());
    }
}
