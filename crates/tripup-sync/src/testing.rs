//! In-memory collaborators for exercising the pipeline without a device,
//! a server or a filesystem.
//!
//! Used by this crate's unit tests and by the integration tests under
//! `tests/`.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use tripup_core::{
    AssetApi, AssetRecord, AssetType, AtomicVar, CloudStorage, CreateAssetRequest, DeviceAsset,
    Error, ExportedResource, OriginalUpdate, PhotoLibrary, Result, ServerAsset, StatusMonitor,
    StorageBackend, TransferPriority,
};
use tripup_crypto::UserKeypair;
use tripup_db::test_fixtures::{sample_device_asset, TestDatabase};
use tripup_db::{AssetCache, AssetPaths, MutableAsset};

use crate::config::SyncConfig;
use crate::context::{SyncContext, SyncServices};
use crate::manager::AssetManager;
use crate::registry::{OperationRegistry, RegistryEvictionPolicy};

fn not_found(path: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    ))
}

// =============================================================================
// DISK
// =============================================================================

#[derive(Default)]
pub struct MemoryDisk {
    files: AtomicVar<HashMap<PathBuf, Vec<u8>>>,
    fail_writes: AtomicVar<bool>,
    fail_deletes: AtomicVar<bool>,
}

impl MemoryDisk {
    pub fn contains(&self, path: &Path) -> bool {
        self.files.with(|f| f.contains_key(path))
    }

    pub fn remove(&self, path: &Path) {
        self.files.mutate(|f| f.remove(path));
    }

    pub fn file_count(&self) -> usize {
        self.files.with(|f| f.len())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.set(fail);
    }
}

#[async_trait]
impl StorageBackend for MemoryDisk {
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if self.fail_writes.value() {
            return Err(Error::Io(io::Error::other("disk full")));
        }
        self.files
            .mutate(|f| f.insert(path.to_path_buf(), data.to_vec()));
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .with(|f| f.get(path).cloned())
            .ok_or_else(|| not_found(path))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        if self.fail_deletes.value() {
            return Err(Error::Io(io::Error::other("read-only filesystem")));
        }
        self.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.contains(path))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.files.mutate(|f| {
            let data = f.remove(from).ok_or_else(|| not_found(from))?;
            f.insert(to.to_path_buf(), data);
            Ok(())
        })
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        self.files
            .with(|f| f.get(path).map(|d| d.len() as u64))
            .ok_or_else(|| not_found(path))
    }
}

// =============================================================================
// CLOUD
// =============================================================================

#[derive(Default)]
struct CloudState {
    blobs: HashMap<String, Vec<u8>>,
    upload_priorities: Vec<TransferPriority>,
    deleted: Vec<String>,
    downloads: usize,
    failing: bool,
}

/// Blob store writing through to a [`MemoryDisk`].
///
/// Transfers can be held at a gate to observe in-flight behaviour.
pub struct MemoryCloud {
    disk: Arc<MemoryDisk>,
    state: AtomicVar<CloudState>,
    next_blob: AtomicU64,
    upload_gate: Arc<RwLock<()>>,
    download_gate: Arc<RwLock<()>>,
    waiting_uploads: AtomicUsize,
    waiting_downloads: AtomicUsize,
}

impl MemoryCloud {
    pub fn new(disk: Arc<MemoryDisk>) -> Self {
        Self {
            disk,
            state: AtomicVar::default(),
            next_blob: AtomicU64::new(1),
            upload_gate: Arc::new(RwLock::new(())),
            download_gate: Arc::new(RwLock::new(())),
            waiting_uploads: AtomicUsize::new(0),
            waiting_downloads: AtomicUsize::new(0),
        }
    }

    /// Block uploads until the guard drops.
    pub async fn hold_uploads(&self) -> OwnedRwLockWriteGuard<()> {
        self.upload_gate.clone().write_owned().await
    }

    /// Block downloads until the guard drops.
    pub async fn hold_downloads(&self) -> OwnedRwLockWriteGuard<()> {
        self.download_gate.clone().write_owned().await
    }

    /// Transfers currently blocked at the upload gate.
    pub fn waiting_uploads(&self) -> usize {
        self.waiting_uploads.load(Ordering::SeqCst)
    }

    pub fn waiting_downloads(&self) -> usize {
        self.waiting_downloads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.mutate(|s| s.failing = failing);
    }

    pub fn put_blob(&self, remote_path: &str, data: Vec<u8>) {
        self.state
            .mutate(|s| s.blobs.insert(remote_path.to_string(), data));
    }

    pub fn blob(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.state.with(|s| s.blobs.get(remote_path).cloned())
    }

    pub fn blob_count(&self) -> usize {
        self.state.with(|s| s.blobs.len())
    }

    pub fn upload_priorities(&self) -> Vec<TransferPriority> {
        self.state.with(|s| s.upload_priorities.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.with(|s| s.deleted.clone())
    }

    pub fn download_count(&self) -> usize {
        self.state.with(|s| s.downloads)
    }
}

#[async_trait]
impl CloudStorage for MemoryCloud {
    async fn upload(&self, file: &Path, priority: TransferPriority) -> Result<String> {
        self.waiting_uploads.fetch_add(1, Ordering::SeqCst);
        let pass = self.upload_gate.read().await;
        self.waiting_uploads.fetch_sub(1, Ordering::SeqCst);
        drop(pass);

        if self.state.with(|s| s.failing) {
            return Err(Error::Storage("upload refused".to_string()));
        }
        let data = self.disk.read(file).await?;
        let remote = format!("blobs/{}", self.next_blob.fetch_add(1, Ordering::SeqCst));
        self.state.mutate(|s| {
            s.blobs.insert(remote.clone(), data);
            s.upload_priorities.push(priority);
        });
        Ok(remote)
    }

    async fn download(&self, remote_path: &str, to: &Path, _priority: TransferPriority) -> Result<()> {
        self.waiting_downloads.fetch_add(1, Ordering::SeqCst);
        let pass = self.download_gate.read().await;
        self.waiting_downloads.fetch_sub(1, Ordering::SeqCst);
        drop(pass);

        let blob = self.state.mutate(|s| {
            s.downloads += 1;
            if s.failing {
                return Err(Error::Storage("download refused".to_string()));
            }
            s.blobs
                .get(remote_path)
                .cloned()
                .ok_or_else(|| Error::NotFound(remote_path.to_string()))
        })?;
        self.disk.write(to, &blob).await
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        self.state.mutate(|s| {
            s.blobs.remove(remote_path);
            s.deleted.push(remote_path.to_string());
        });
        Ok(())
    }
}

// =============================================================================
// API
// =============================================================================

#[derive(Default)]
struct ApiState {
    created: HashMap<Uuid, CreateAssetRequest>,
    create_calls: usize,
    originals: Vec<OriginalUpdate>,
    deleted: Vec<Uuid>,
    changes: Vec<ServerAsset>,
    failing: bool,
    refuse_deletes: bool,
}

/// Asset API keeping every request in memory.
#[derive(Default)]
pub struct MemoryApi {
    state: AtomicVar<ApiState>,
}

impl MemoryApi {
    pub fn created_count(&self) -> usize {
        self.state.with(|s| s.created.len())
    }

    pub fn created(&self, id: &Uuid) -> Option<CreateAssetRequest> {
        self.state.with(|s| s.created.get(id).cloned())
    }

    pub fn create_calls(&self) -> usize {
        self.state.with(|s| s.create_calls)
    }

    pub fn originals(&self) -> Vec<OriginalUpdate> {
        self.state.with(|s| s.originals.clone())
    }

    pub fn deleted(&self) -> Vec<Uuid> {
        self.state.with(|s| s.deleted.clone())
    }

    pub fn push_change(&self, change: ServerAsset) {
        self.state.mutate(|s| s.changes.push(change));
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.mutate(|s| s.failing = failing);
    }

    pub fn set_refuse_deletes(&self, refuse: bool) {
        self.state.mutate(|s| s.refuse_deletes = refuse);
    }

    fn check(&self) -> Result<()> {
        if self.state.with(|s| s.failing) {
            return Err(Error::Api("service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetApi for MemoryApi {
    async fn create_assets(&self, assets: Vec<CreateAssetRequest>) -> Result<HashMap<Uuid, u64>> {
        self.check()?;
        Ok(self.state.mutate(|s| {
            s.create_calls += 1;
            assets
                .into_iter()
                .map(|request| {
                    let id = request.uuid;
                    let size = request.total_size + 64;
                    s.created.insert(id, request);
                    (id, size)
                })
                .collect()
        }))
    }

    async fn update_originals(&self, updates: Vec<OriginalUpdate>) -> Result<HashMap<Uuid, u64>> {
        self.check()?;
        Ok(self.state.mutate(|s| {
            let sizes = updates.iter().map(|u| (u.uuid, 128)).collect();
            s.originals.extend(updates);
            sizes
        }))
    }

    async fn delete_assets(&self, ids: &[Uuid]) -> Result<bool> {
        self.check()?;
        Ok(self.state.mutate(|s| {
            if s.refuse_deletes {
                return false;
            }
            s.deleted.extend_from_slice(ids);
            true
        }))
    }

    async fn fetch_changes(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ServerAsset>> {
        self.check()?;
        Ok(self.state.with(|s| {
            s.changes
                .iter()
                .filter(|c| since.map_or(true, |since| c.updated_at > since))
                .cloned()
                .collect()
        }))
    }
}

// =============================================================================
// PHOTO LIBRARY
// =============================================================================

#[derive(Default)]
struct LibraryState {
    items: BTreeMap<String, (DeviceAsset, Vec<u8>)>,
    exports: usize,
    deleted: Vec<String>,
    failing: bool,
}

/// Photo library whose exports land on a [`MemoryDisk`].
pub struct MemoryLibrary {
    disk: Arc<MemoryDisk>,
    state: AtomicVar<LibraryState>,
}

impl MemoryLibrary {
    pub fn new(disk: Arc<MemoryDisk>) -> Self {
        Self {
            disk,
            state: AtomicVar::default(),
        }
    }

    pub fn add(&self, device: DeviceAsset, original: Vec<u8>) {
        self.state.mutate(|s| {
            s.items
                .insert(device.local_identifier.clone(), (device, original))
        });
    }

    /// Add a photo whose original bytes are unique to its identifier.
    pub fn add_photo(&self, local_identifier: &str) -> DeviceAsset {
        let device = sample_device_asset(local_identifier);
        self.add(
            device.clone(),
            format!("original:{local_identifier}").into_bytes(),
        );
        device
    }

    pub fn remove(&self, local_identifier: &str) {
        self.state.mutate(|s| s.items.remove(local_identifier));
    }

    pub fn export_count(&self) -> usize {
        self.state.with(|s| s.exports)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.with(|s| s.deleted.clone())
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.mutate(|s| s.failing = failing);
    }
}

#[async_trait]
impl PhotoLibrary for MemoryLibrary {
    async fn local_identifiers(&self) -> Result<Vec<String>> {
        Ok(self.state.with(|s| s.items.keys().cloned().collect()))
    }

    async fn fetch(&self, local_identifier: &str) -> Result<Option<DeviceAsset>> {
        Ok(self
            .state
            .with(|s| s.items.get(local_identifier).map(|(d, _)| d.clone())))
    }

    async fn export_original(&self, local_identifier: &str, to: &Path) -> Result<ExportedResource> {
        let (device, data) = self.state.mutate(|s| {
            if s.failing {
                return Err(Error::PhotoLibrary("library unavailable".to_string()));
            }
            let item = s
                .items
                .get(local_identifier)
                .cloned()
                .ok_or_else(|| Error::NotFound(local_identifier.to_string()))?;
            s.exports += 1;
            Ok(item)
        })?;
        self.disk.write(to, &data).await?;

        let (uti, transcoded) = match device.asset_type {
            AssetType::Photo => ("public.jpeg", false),
            AssetType::Video => (tripup_core::defaults::MPEG4_UTI, true),
            AssetType::Audio | AssetType::Unknown => ("public.data", false),
        };
        Ok(ExportedResource {
            uti: uti.to_string(),
            transcoded,
        })
    }

    async fn compress_video(&self, source: &Path, to: &Path) -> Result<()> {
        let data = self.disk.read(source).await?;
        let mut low = b"low:".to_vec();
        low.extend_from_slice(&data[..data.len().min(32)]);
        self.disk.write(to, &low).await
    }

    async fn thumbnail(&self, local_identifier: &str, max_dimension: u32) -> Result<Vec<u8>> {
        if !self.state.with(|s| s.items.contains_key(local_identifier)) {
            return Err(Error::NotFound(local_identifier.to_string()));
        }
        Ok(format!("thumb:{local_identifier}:{max_dimension}").into_bytes())
    }

    async fn delete(&self, local_identifiers: &[String]) -> Result<()> {
        self.state.mutate(|s| {
            for id in local_identifiers {
                s.items.remove(id);
                s.deleted.push(id.clone());
            }
        });
        Ok(())
    }
}

// =============================================================================
// MONITOR
// =============================================================================

/// Counts refresh requests without reporting anything back.
#[derive(Default)]
pub struct RecordingMonitor {
    refreshes: AtomicUsize,
}

impl RecordingMonitor {
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl StatusMonitor for RecordingMonitor {
    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// A fresh database, in-memory collaborators and a user keypair.
pub struct Harness {
    pub db: TestDatabase,
    pub disk: Arc<MemoryDisk>,
    pub cloud: Arc<MemoryCloud>,
    pub api: Arc<MemoryApi>,
    pub library: Arc<MemoryLibrary>,
    pub monitor: Arc<RecordingMonitor>,
    pub user: UserKeypair,
    /// Whether collaborators see the user keypair.
    pub user_key_loaded: bool,
    pub owner: Uuid,
    pub paths: AssetPaths,
    pub config: SyncConfig,
}

impl Harness {
    pub async fn new() -> Self {
        let disk = Arc::new(MemoryDisk::default());
        Self {
            db: TestDatabase::new().await,
            cloud: Arc::new(MemoryCloud::new(disk.clone())),
            api: Arc::new(MemoryApi::default()),
            library: Arc::new(MemoryLibrary::new(disk.clone())),
            monitor: Arc::new(RecordingMonitor::default()),
            disk,
            user: UserKeypair::generate(),
            user_key_loaded: true,
            owner: Uuid::new_v4(),
            paths: AssetPaths::new("/tripup"),
            config: SyncConfig::default()
                .with_recoverable_backoff(Duration::from_millis(10))
                .with_background_timeout(Duration::from_secs(5)),
        }
    }

    pub fn with_config(mut self, f: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        self.config = f(self.config);
        self
    }

    /// Run without the user keypair, as on a device that was never set up.
    pub fn without_user_key(mut self) -> Self {
        self.user_key_loaded = false;
        self
    }

    pub fn services(&self) -> SyncServices {
        SyncServices {
            assets: self.db.asset_repository(),
            keys: self.db.key_repository(),
            cloud: self.cloud.clone(),
            api: self.api.clone(),
            library: self.library.clone(),
            disk: self.disk.clone(),
            paths: self.paths.clone(),
            user: self.user_key_loaded.then(|| self.user.clone()),
        }
    }

    /// Start an asset manager over these collaborators.
    pub fn manager(&self) -> AssetManager {
        AssetManager::start(self.services(), self.config.clone(), self.monitor.clone())
    }

    /// Add a photo to the library and record it through the manager's cache.
    ///
    /// # Panics
    ///
    /// Panics if the record cannot be inserted.
    pub async fn add_asset(&self, manager: &AssetManager, local_identifier: &str) -> Arc<MutableAsset> {
        insert_local(&manager.context().cache, self.owner, &self.library, local_identifier).await
    }
}

async fn insert_local(
    cache: &AssetCache,
    owner: Uuid,
    library: &MemoryLibrary,
    local_identifier: &str,
) -> Arc<MutableAsset> {
    let device = library.add_photo(local_identifier);
    cache
        .insert_new(AssetRecord::new_local(owner, &device))
        .await
        .expect("asset record should insert")
}

/// A [`Harness`] plus a standalone operation context.
pub struct TestContext {
    pub harness: Harness,
    pub ctx: Arc<SyncContext>,
}

impl Deref for TestContext {
    type Target = Harness;

    fn deref(&self) -> &Harness {
        &self.harness
    }
}

impl TestContext {
    /// Add a photo to the library and record it.
    ///
    /// # Panics
    ///
    /// Panics if the record cannot be inserted.
    pub async fn local_asset(&self, local_identifier: &str) -> Arc<MutableAsset> {
        insert_local(&self.ctx.cache, self.owner, &self.library, local_identifier).await
    }
}

/// Operation context over a fresh [`Harness`], without a running manager.
pub async fn context() -> TestContext {
    context_with(Harness::new().await)
}

/// Operation context over a prepared [`Harness`].
pub fn context_with(harness: Harness) -> TestContext {
    let registry = Arc::new(AtomicVar::new(OperationRegistry::default()));
    let cache = Arc::new(AssetCache::new(
        harness.db.asset_repository(),
        harness.paths.clone(),
        harness.config.cache_capacity,
        Arc::new(RegistryEvictionPolicy::new(registry)),
    ));
    let ctx = Arc::new(SyncContext::new(
        harness.services(),
        cache,
        harness.config.clone(),
    ));
    TestContext { harness, ctx }
}
