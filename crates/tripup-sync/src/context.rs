//! Collaborators shared by every operation.

use std::sync::Arc;

use tokio::sync::Mutex;

use tripup_core::{AssetApi, AssetRepository, CloudStorage, KeyRepository, PhotoLibrary, StorageBackend};
use tripup_crypto::UserKeypair;
use tripup_db::{AssetCache, AssetPaths};

use crate::config::SyncConfig;
use crate::keychain::Keychain;

/// External systems the pipeline is wired to.
#[derive(Clone)]
pub struct SyncServices {
    pub assets: Arc<dyn AssetRepository>,
    pub keys: Arc<dyn KeyRepository>,
    pub cloud: Arc<dyn CloudStorage>,
    pub api: Arc<dyn AssetApi>,
    pub library: Arc<dyn PhotoLibrary>,
    pub disk: Arc<dyn StorageBackend>,
    pub paths: AssetPaths,
    pub user: Option<UserKeypair>,
}

/// Everything an operation needs, built once by the asset manager.
pub struct SyncContext {
    pub cache: Arc<AssetCache>,
    pub repo: Arc<dyn AssetRepository>,
    pub keychain: Arc<Keychain>,
    pub cloud: Arc<dyn CloudStorage>,
    pub api: Arc<dyn AssetApi>,
    pub library: Arc<dyn PhotoLibrary>,
    pub disk: Arc<dyn StorageBackend>,
    pub paths: AssetPaths,
    pub config: SyncConfig,
    /// Held while a content hash is checked against the database and claimed.
    pub dedup: Mutex<()>,
}

impl SyncContext {
    pub fn new(services: SyncServices, cache: Arc<AssetCache>, config: SyncConfig) -> Self {
        Self {
            cache,
            repo: services.assets,
            keychain: Arc::new(Keychain::new(services.keys, services.user)),
            cloud: services.cloud,
            api: services.api,
            library: services.library,
            disk: services.disk,
            paths: services.paths,
            config,
            dedup: Mutex::new(()),
        }
    }
}
