//! Contracts for the external systems the sync core consumes.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, so the pipeline can run against SQLite and HTTP in the
//! application and against in-memory fakes in tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// DATABASE
// =============================================================================

/// Persistent store of asset records with per-field writes.
///
/// Each setter touches exactly one column so concurrent operations that own
/// different fields of the same asset never overwrite each other.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, record: &AssetRecord) -> Result<()>;

    /// Fetch a record by UUID.
    async fn fetch(&self, id: Uuid) -> Result<Option<AssetRecord>>;

    /// Permanently delete a record and its local-identifier links.
    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn set_fingerprint(&self, id: Uuid, fingerprint: Option<&str>) -> Result<()>;
    async fn set_original_uti(&self, id: Uuid, uti: Option<&str>) -> Result<()>;
    async fn set_local_identifier(&self, id: Uuid, local_identifier: Option<&str>) -> Result<()>;
    async fn set_md5(&self, id: Uuid, md5: Option<&str>) -> Result<()>;
    async fn set_cloud_filesize(&self, id: Uuid, size: u64) -> Result<()>;
    async fn set_import_status(&self, id: Uuid, status: ImportStage) -> Result<()>;
    async fn set_delete_status(&self, id: Uuid, status: Option<DeleteState>) -> Result<()>;
    async fn set_imported(&self, id: Uuid, imported: bool) -> Result<()>;
    async fn set_favourite(&self, id: Uuid, favourite: bool) -> Result<()>;
    async fn set_deleted(&self, id: Uuid, deleted: bool) -> Result<()>;
    async fn set_remote_path(&self, id: Uuid, quality: Quality, path: Option<&str>)
        -> Result<()>;

    /// IDs of assets not yet imported and not marked deleted.
    async fn unimported_ids(&self) -> Result<Vec<Uuid>>;

    /// IDs the server reported deleted whose local teardown has not finished.
    async fn deleted_pending_ids(&self) -> Result<Vec<Uuid>>;

    /// Imported assets whose original has no remote path yet.
    async fn missing_original_ids(&self) -> Result<Vec<Uuid>>;

    /// Another asset (not `exclude`) already carrying this content hash.
    async fn find_by_md5(&self, md5: &str, exclude: Uuid) -> Result<Option<Uuid>>;

    /// The asset a device reference belongs to, directly or through a link.
    async fn find_by_local_identifier(&self, local_identifier: &str) -> Result<Option<Uuid>>;

    /// Associate a device reference with an existing asset.
    async fn link_local_identifier(&self, local_identifier: &str, asset_id: Uuid) -> Result<()>;

    /// Every device reference known to the database, stored or linked.
    async fn known_local_identifiers(&self) -> Result<Vec<String>>;

    /// Timestamp of the last applied server change feed.
    async fn last_server_sync(&self) -> Result<Option<DateTime<Utc>>>;
    async fn set_last_server_sync(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Key material storage indexed by fingerprint.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    async fn insert_key(&self, fingerprint: &str, key: &[u8]) -> Result<()>;
    async fn key(&self, fingerprint: &str) -> Result<Option<Vec<u8>>>;
    async fn delete_key(&self, fingerprint: &str) -> Result<()>;
}

// =============================================================================
// REMOTE SERVICES
// =============================================================================

/// Cloud blob storage for encrypted renditions.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Upload a file, returning its remote path.
    async fn upload(&self, file: &Path, priority: TransferPriority) -> Result<String>;

    /// Download a remote blob into `to`.
    async fn download(&self, remote_path: &str, to: &Path, priority: TransferPriority)
        -> Result<()>;

    /// Remove a remote blob.
    async fn delete(&self, remote_path: &str) -> Result<()>;
}

/// REST API for asset metadata.
#[async_trait]
pub trait AssetApi: Send + Sync {
    /// Create assets, returning the cloud filesize of each accepted asset.
    async fn create_assets(&self, assets: Vec<CreateAssetRequest>) -> Result<HashMap<Uuid, u64>>;

    /// Record late-uploaded originals, returning updated cloud filesizes.
    async fn update_originals(&self, updates: Vec<OriginalUpdate>) -> Result<HashMap<Uuid, u64>>;

    /// Delete assets on the server.
    async fn delete_assets(&self, ids: &[Uuid]) -> Result<bool>;

    /// Assets changed on the server since the given time.
    async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ServerAsset>>;
}

// =============================================================================
// DEVICE
// =============================================================================

/// Device photo library accessor.
#[async_trait]
pub trait PhotoLibrary: Send + Sync {
    /// Every local identifier currently in the library.
    async fn local_identifiers(&self) -> Result<Vec<String>>;

    /// Metadata for one item, `None` when the item no longer exists.
    async fn fetch(&self, local_identifier: &str) -> Result<Option<DeviceAsset>>;

    /// Export the original resource to `to`.
    ///
    /// Videos whose codec is not cross-compatible are transcoded to MP4.
    async fn export_original(&self, local_identifier: &str, to: &Path)
        -> Result<ExportedResource>;

    /// Re-encode a video into a low-quality rendition.
    async fn compress_video(&self, source: &Path, to: &Path) -> Result<()>;

    /// JPEG thumbnail bytes for an item.
    async fn thumbnail(&self, local_identifier: &str, max_dimension: u32) -> Result<Vec<u8>>;

    /// Remove items from the library.
    async fn delete(&self, local_identifiers: &[String]) -> Result<()>;
}

/// Local disk I/O. Paths are absolute.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
    /// Delete a file; deleting a missing file succeeds.
    async fn delete(&self, path: &Path) -> Result<()>;
    async fn exists(&self, path: &Path) -> Result<bool>;
    /// Move a file, replacing any existing destination.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    async fn size(&self, path: &Path) -> Result<u64>;
}

/// Reachability and capacity monitor.
///
/// `refresh` asks the monitor to re-evaluate and report a fresh
/// [`SystemStatus`] to whoever it delivers status to.
pub trait StatusMonitor: Send + Sync {
    fn refresh(&self);
}
