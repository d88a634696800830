//! Wiring of the pipeline to its real collaborators.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tripup_core::{Result, StorageBackend};
use tripup_crypto::load_user_keypair;
use tripup_db::{AssetPaths, Database, FilesystemBackend};
use tripup_sync::{AssetManager, ModelController, SyncServices};

use crate::config::AppConfig;
use crate::http::{HttpAssetApi, HttpCloudStorage};
use crate::library::DirectoryPhotoLibrary;
use crate::monitor::ReachabilityMonitor;

/// A running pipeline: database, manager, controller and monitor.
pub struct App {
    pub db: Database,
    pub manager: AssetManager,
    pub controller: ModelController,
    pub monitor: Arc<ReachabilityMonitor>,
}

impl App {
    /// Open local state, connect collaborators and start the manager.
    ///
    /// The queues are not released yet; call
    /// [`AssetManager::load_and_start_queues`] when ready.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let paths = AssetPaths::new(&config.data_dir);
        paths.ensure_dirs().await?;

        let db = Database::connect(&config.database_url()).await?;
        let disk: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new());

        let user = match load_user_keypair(&config.key_file) {
            Ok(keypair) => Some(keypair),
            Err(e) => {
                warn!(
                    key_file = %config.key_file.display(),
                    error = %e,
                    "User keypair unavailable, imports and server sync will fail"
                );
                None
            }
        };

        let api = Arc::new(HttpAssetApi::new(
            config.api_url.clone(),
            config.token.clone(),
            config.api_timeout,
        )?);
        let cloud = Arc::new(HttpCloudStorage::new(
            config.storage_url.clone(),
            config.token.clone(),
            config.transfer_timeout,
            disk.clone(),
        )?);
        let library = Arc::new(DirectoryPhotoLibrary::new(&config.library_dir, disk.clone()));
        let monitor = Arc::new(ReachabilityMonitor::new(api.clone()));

        let services = SyncServices {
            assets: db.assets.clone(),
            keys: db.keys.clone(),
            cloud,
            api,
            library,
            disk,
            paths,
            user,
        };
        let manager = AssetManager::start(services, config.sync.clone(), monitor.clone());
        monitor.attach(manager.clone());
        let controller = ModelController::new(manager.clone(), config.owner_id);

        info!(
            data_dir = %config.data_dir.display(),
            library_dir = %config.library_dir.display(),
            api_url = %config.api_url,
            "Pipeline opened"
        );

        Ok(Self {
            db,
            manager,
            controller,
            monitor,
        })
    }

    /// Probe reachability, report it, then release the queues.
    pub async fn start(&self) -> Result<()> {
        let status = self.monitor.probe().await;
        self.manager.handle_status(status)?;
        self.manager.load_and_start_queues().await
    }

    /// Wait until no operation remains, polling every `interval`.
    ///
    /// Returns `false` when work is still outstanding after `limit`.
    pub async fn wait_idle(&self, interval: Duration, limit: Duration) -> bool {
        let wait = async {
            // Let freshly sent commands register their operations first.
            tokio::time::sleep(interval).await;
            while !self.manager.is_idle() {
                tokio::time::sleep(interval).await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    pub async fn close(self) -> Result<()> {
        self.manager.shutdown().await?;
        self.db.pool.close().await;
        Ok(())
    }
}
