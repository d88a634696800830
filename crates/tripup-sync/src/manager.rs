//! The asset manager.
//!
//! All bookkeeping (operation registry, download callbacks, priority import
//! requests, import queuers, queue policy) is owned by one command loop
//! task. [`AssetManager`] is a cheap handle that performs any database or
//! disk reads itself and then sends a [`Command`]; the loop never awaits I/O,
//! so it is the single writer of its state without locks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tripup_core::{
    AppLifecycleEvent, AssetEvent, AtomicVar, DeleteState, Error, EventBus, Quality, Result,
    StatusMonitor, SystemStatus, TransferPriority,
};
use tripup_db::{AssetCache, MutableAsset, PhysicalAssetRef};

use crate::config::SyncConfig;
use crate::context::{SyncContext, SyncServices};
use crate::operations::{
    AssetDeleteOperation, AssetDownloadOperation, AssetImportOperation, AssetUploadOperation,
};
use crate::queue::{OperationHandle, OperationOutcome, OperationQueue, QueuePriority, QueuedOperation};
use crate::queuing::{AssetImportQueuingOperation, ImportQueuingDelegate, QueuingCondition};
use crate::registry::{OperationKind, OperationRegistry, RegistryEvictionPolicy};
use crate::sub_operations::discard;
use crate::tracker::{AssetSyncTracker, SyncSubscription};

// =============================================================================
// COMMANDS
// =============================================================================

/// Work found in the database when the queues (re)start.
#[derive(Default)]
struct StartWork {
    unimported: Vec<Uuid>,
    deletes: Vec<Arc<MutableAsset>>,
    uploads: Vec<Arc<MutableAsset>>,
}

enum FinishedDetail {
    Import,
    Upload,
    Download(Arc<AssetDownloadOperation>),
    Delete(Arc<AssetDeleteOperation>),
}

enum Command {
    Start {
        work: StartWork,
        done: Option<oneshot::Sender<()>>,
    },
    BackgroundImports {
        ids: Vec<Uuid>,
        reply: oneshot::Sender<bool>,
    },
    PriorityImport {
        ids: Vec<Uuid>,
        reply: oneshot::Sender<bool>,
    },
    Import {
        ids: Vec<Uuid>,
    },
    Delete {
        assets: Vec<Arc<MutableAsset>>,
    },
    DeleteLocally {
        assets: Vec<Arc<MutableAsset>>,
    },
    Download {
        target: PhysicalAssetRef,
        reply: oneshot::Sender<bool>,
    },
    Lifecycle(AppLifecycleEvent),
    Status(SystemStatus),
    SubmitImport {
        op: Arc<AssetImportOperation>,
        priority: QueuePriority,
        reply: oneshot::Sender<OperationHandle>,
    },
    SuspendImportQueue,
    ImportsFinished {
        ids: Vec<Uuid>,
        success: bool,
    },
    OperationFinished {
        kind: OperationKind,
        operation_id: Uuid,
        assets: Vec<Uuid>,
        outcome: OperationOutcome,
        detail: FinishedDetail,
    },
    QueuerFinished {
        queuer_id: Uuid,
    },
    ResubmitDelete {
        assets: Vec<Arc<MutableAsset>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Clone)]
struct Queues {
    import: OperationQueue,
    download: OperationQueue,
    delete: OperationQueue,
}

impl Queues {
    fn new(config: &SyncConfig) -> Self {
        Self {
            import: OperationQueue::new("import", config.import_queue_concurrency),
            download: OperationQueue::new("download", config.download_queue_concurrency),
            delete: OperationQueue::new("delete", config.delete_queue_concurrency),
        }
    }

    fn all(&self) -> [&OperationQueue; 3] {
        [&self.import, &self.download, &self.delete]
    }
}

/// Handle to the running asset manager.
#[derive(Clone)]
pub struct AssetManager {
    tx: mpsc::UnboundedSender<Command>,
    ctx: Arc<SyncContext>,
    tracker: Arc<AssetSyncTracker>,
    events: EventBus,
    registry: Arc<AtomicVar<OperationRegistry>>,
    queues: Queues,
    _progress: Arc<SyncSubscription>,
}

impl AssetManager {
    /// Build the shared context and spawn the command loop.
    ///
    /// The import and delete queues stay suspended until
    /// [`load_and_start_queues`](Self::load_and_start_queues) runs.
    pub fn start(
        services: SyncServices,
        config: SyncConfig,
        monitor: Arc<dyn StatusMonitor>,
    ) -> Self {
        let registry = Arc::new(AtomicVar::new(OperationRegistry::default()));
        let cache = Arc::new(AssetCache::new(
            services.assets.clone(),
            services.paths.clone(),
            config.cache_capacity,
            Arc::new(RegistryEvictionPolicy::new(registry.clone())),
        ));
        let ctx = Arc::new(SyncContext::new(services, cache, config.clone()));
        let tracker = Arc::new(AssetSyncTracker::new());
        let events = EventBus::default();
        let queues = Queues::new(&config);
        queues.import.set_suspended(true);
        queues.delete.set_suspended(true);

        let progress = {
            let events = events.clone();
            tracker.subscribe(move |p| {
                events.emit(AssetEvent::SyncProgress {
                    completed: p.completed,
                    total: p.total,
                })
            })
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let auto_backup = Arc::new(AtomicBool::new(config.auto_backup));
        let delegate = Arc::new(ManagerDelegate {
            tx: tx.downgrade(),
            ctx: ctx.clone(),
            events: events.clone(),
            monitor,
        });
        let actor = ManagerActor {
            ctx: ctx.clone(),
            tx: tx.downgrade(),
            tracker: tracker.clone(),
            events: events.clone(),
            registry: registry.clone(),
            queues: queues.clone(),
            delegate,
            auto_backup,
            auto_queuer: None,
            manual_queuer: None,
            priority_requests: Vec::new(),
            downloads: HashMap::new(),
            status: SystemStatus::healthy(),
            started: false,
            resigned: false,
            interrupted: false,
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            ctx,
            tracker,
            events,
            registry,
            queues,
            _progress: Arc::new(progress),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::Internal("asset manager has stopped".to_string()))
    }

    /// Queue pending work found in the database and release the queues.
    ///
    /// Unimported assets go to the auto-backup queuer (when enabled),
    /// unfinished deletions are resumed and staged originals of imported
    /// assets are uploaded.
    ///
    /// Fails with [`Error::Config`] when no user keypair is loaded; the
    /// queues then stay suspended.
    pub async fn load_and_start_queues(&self) -> Result<()> {
        if !self.ctx.keychain.has_user_key() {
            return Err(Error::Config(
                "user keypair not loaded, queues not started".to_string(),
            ));
        }
        let work = gather_start_work(&self.ctx).await?;
        info!(
            subsystem = "sync",
            component = "manager",
            unimported = work.unimported.len(),
            deletes = work.deletes.len(),
            uploads = work.uploads.len(),
            "Starting queues"
        );
        let (done, rx) = oneshot::channel();
        self.send(Command::Start {
            work,
            done: Some(done),
        })?;
        rx.await
            .map_err(|_| Error::Internal("asset manager has stopped".to_string()))
    }

    /// Import up to the background limit of unimported assets.
    ///
    /// Returns false when the run did not finish within the background
    /// deadline or any asset failed.
    pub async fn start_background_imports(&self) -> Result<bool> {
        let mut ids = self.ctx.repo.unimported_ids().await?;
        ids.truncate(self.ctx.config.background_import_limit);
        let (reply, rx) = oneshot::channel();
        self.send(Command::BackgroundImports { ids, reply })?;

        match tokio::time::timeout(self.ctx.config.background_timeout, rx).await {
            Ok(Ok(done)) => Ok(done),
            Ok(Err(_)) => Ok(false),
            Err(_) => {
                warn!(
                    subsystem = "sync",
                    component = "manager",
                    timeout_secs = self.ctx.config.background_timeout.as_secs(),
                    "Background import deadline reached"
                );
                Ok(false)
            }
        }
    }

    /// Import now, ahead of auto-backup. True only if every asset imported.
    pub async fn priority_import(&self, ids: &[Uuid]) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PriorityImport {
            ids: ids.to_vec(),
            reply,
        })?;
        Ok(rx.await.unwrap_or(false))
    }

    /// Hand ids to the auto-backup queuer. Ignored while auto-backup is off.
    pub fn import(&self, ids: &[Uuid]) -> Result<()> {
        self.send(Command::Import { ids: ids.to_vec() })
    }

    /// Delete assets everywhere.
    ///
    /// Assets are marked deleted immediately and removed from the device
    /// library on a best-effort basis. Assets that never reached the server
    /// are terminated at once; the rest go through the delete queue.
    pub async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        let assets = self.ctx.cache.get_many(ids).await?;
        for asset in &assets {
            asset.set_deleted(true).await?;
        }

        let local: Vec<String> = assets.iter().filter_map(|a| a.local_identifier()).collect();
        if !local.is_empty() {
            if let Err(e) = self.ctx.library.delete(&local).await {
                warn!(
                    subsystem = "sync",
                    component = "manager",
                    count = local.len(),
                    error = %e,
                    "Failed to remove items from photo library"
                );
            }
        }
        self.events.emit(AssetEvent::AssetsUpdated {
            ids: assets.iter().map(|a| a.uuid()).collect(),
        });
        self.send(Command::Delete { assets })
    }

    /// Tear down assets the server has already deleted.
    pub async fn delete_locally(&self, ids: &[Uuid]) -> Result<()> {
        let assets = self.ctx.cache.get_many(ids).await?;
        for asset in &assets {
            asset.set_deleted(true).await?;
            if asset.delete_status().is_none() {
                asset
                    .set_delete_status(Some(DeleteState::DeletedFromServer))
                    .await?;
            }
        }
        self.send(Command::DeleteLocally { assets })
    }

    /// Make a rendition available locally.
    ///
    /// Concurrent callers for the same rendition share one download. Returns
    /// false when the asset is unknown, the rendition is not in the cloud or
    /// the download failed.
    pub async fn request_download(&self, id: Uuid, quality: Quality) -> Result<bool> {
        let Some(asset) = self.ctx.cache.get(id).await? else {
            return Ok(false);
        };
        let target = PhysicalAssetRef::new(asset, quality);
        if self.ctx.disk.exists(target.local_path()).await? {
            return Ok(true);
        }
        if target.remote_path().is_none() {
            return Ok(false);
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::Download { target, reply })?;
        Ok(rx.await.unwrap_or(false))
    }

    pub fn handle_lifecycle(&self, event: AppLifecycleEvent) -> Result<()> {
        self.send(Command::Lifecycle(event))
    }

    pub fn handle_status(&self, status: SystemStatus) -> Result<()> {
        self.send(Command::Status(status))
    }

    pub fn tracker(&self) -> &Arc<AssetSyncTracker> {
        &self.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Whether any operation currently references the asset.
    pub fn is_busy(&self, id: &Uuid) -> bool {
        self.registry.with(|r| r.contains(id))
    }

    /// No operation is registered and no tracked import is outstanding.
    pub fn is_idle(&self) -> bool {
        self.registry.with(|r| r.is_empty()) && self.tracker.progress().is_idle()
    }

    pub fn is_import_suspended(&self) -> bool {
        self.queues.import.is_suspended()
    }

    pub fn is_delete_suspended(&self) -> bool {
        self.queues.delete.is_suspended()
    }

    pub fn is_download_suspended(&self) -> bool {
        self.queues.download.is_suspended()
    }

    /// Cancel everything and stop the command loop.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Shutdown { done })?;
        let _ = rx.await;
        Ok(())
    }
}

async fn gather_start_work(ctx: &SyncContext) -> Result<StartWork> {
    let unimported = ctx.repo.unimported_ids().await?;
    let deletes = ctx
        .cache
        .get_many(&ctx.repo.deleted_pending_ids().await?)
        .await?;

    let mut uploads = Vec::new();
    for asset in ctx
        .cache
        .get_many(&ctx.repo.missing_original_ids().await?)
        .await?
    {
        if ctx
            .disk
            .exists(asset.physical(Quality::Original).local_path())
            .await?
        {
            uploads.push(asset);
        } else {
            warn!(
                subsystem = "sync",
                component = "manager",
                asset_id = %asset.uuid(),
                "Original missing locally and remotely"
            );
        }
    }

    Ok(StartWork {
        unimported,
        deletes,
        uploads,
    })
}

/// Permanently remove assets: local files, cloud blobs of assets the server
/// never recorded, key material, the database record and the cache entry.
pub(crate) async fn terminate_assets(
    ctx: &SyncContext,
    events: &EventBus,
    assets: Vec<Arc<MutableAsset>>,
) {
    if assets.is_empty() {
        return;
    }
    let mut ids = Vec::with_capacity(assets.len());
    for asset in assets {
        let id = asset.uuid();
        for quality in Quality::ALL {
            discard(ctx, asset.physical(quality).local_path()).await;
            discard(ctx, &ctx.paths.scratch_path(id, quality)).await;
            if asset.imported() {
                continue;
            }
            if let Some(remote) = asset.remote_path(quality) {
                if let Err(e) = ctx.cloud.delete(&remote).await {
                    warn!(
                        subsystem = "sync",
                        component = "manager",
                        asset_id = %id,
                        %quality,
                        error = %e,
                        "Failed to remove orphaned cloud blob"
                    );
                }
            }
        }
        discard(ctx, &ctx.paths.scratch_file(id, "export")).await;

        if let Some(fingerprint) = asset.fingerprint() {
            if let Err(e) = ctx.keychain.delete(&fingerprint).await {
                warn!(subsystem = "sync", component = "manager", asset_id = %id, error = %e, "Failed to delete asset key");
            }
        }
        if let Err(e) = ctx.repo.delete(id).await {
            warn!(subsystem = "sync", component = "manager", asset_id = %id, error = %e, "Failed to delete asset record");
        }
        ctx.cache.remove(&id);
        ids.push(id);
    }

    info!(
        subsystem = "sync",
        component = "manager",
        count = ids.len(),
        "Assets terminated"
    );
    events.emit(AssetEvent::AssetsRemoved { ids });
}

// =============================================================================
// QUEUER DELEGATE
// =============================================================================

struct ManagerDelegate {
    tx: mpsc::WeakUnboundedSender<Command>,
    ctx: Arc<SyncContext>,
    events: EventBus,
    monitor: Arc<dyn StatusMonitor>,
}

impl ManagerDelegate {
    fn send(&self, command: Command) -> bool {
        self.tx
            .upgrade()
            .is_some_and(|tx| tx.send(command).is_ok())
    }
}

#[async_trait]
impl ImportQueuingDelegate for ManagerDelegate {
    async fn resolve(&self, ids: &[Uuid]) -> Vec<Arc<MutableAsset>> {
        match self.ctx.cache.get_many(ids).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(
                    subsystem = "sync",
                    component = "manager",
                    count = ids.len(),
                    error = %e,
                    "Failed to load assets for import"
                );
                Vec::new()
            }
        }
    }

    async fn submit_import(
        &self,
        op: Arc<AssetImportOperation>,
        priority: QueuePriority,
    ) -> Option<OperationHandle> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::SubmitImport {
            op,
            priority,
            reply,
        }) {
            return None;
        }
        rx.await.ok()
    }

    async fn terminate(&self, assets: Vec<Arc<MutableAsset>>) {
        terminate_assets(&self.ctx, &self.events, assets).await;
    }

    fn suspend_import_queue(&self) {
        self.send(Command::SuspendImportQueue);
    }

    fn request_status_refresh(&self) {
        self.monitor.refresh();
    }

    fn imports_finished(&self, ids: &[Uuid], success: bool) {
        self.send(Command::ImportsFinished {
            ids: ids.to_vec(),
            success,
        });
    }
}

// =============================================================================
// COMMAND LOOP
// =============================================================================

struct PriorityRequest {
    remaining: HashSet<Uuid>,
    success: bool,
    reply: oneshot::Sender<bool>,
}

struct ManagerActor {
    ctx: Arc<SyncContext>,
    tx: mpsc::WeakUnboundedSender<Command>,
    tracker: Arc<AssetSyncTracker>,
    events: EventBus,
    registry: Arc<AtomicVar<OperationRegistry>>,
    queues: Queues,
    delegate: Arc<ManagerDelegate>,
    auto_backup: Arc<AtomicBool>,
    auto_queuer: Option<Arc<AssetImportQueuingOperation>>,
    manual_queuer: Option<Arc<AssetImportQueuingOperation>>,
    priority_requests: Vec<PriorityRequest>,
    downloads: HashMap<(Uuid, Quality), Vec<oneshot::Sender<bool>>>,
    status: SystemStatus,
    started: bool,
    resigned: bool,
    /// Work was cancelled on entering the background and must be reloaded.
    interrupted: bool,
}

impl ManagerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(subsystem = "sync", component = "manager", "Asset manager started");
        while let Some(command) = rx.recv().await {
            if let Command::Shutdown { done } = command {
                self.stop();
                let _ = done.send(());
                break;
            }
            self.handle(command);
        }
        info!(subsystem = "sync", component = "manager", "Asset manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start { work, done } => {
                self.start(work);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Command::BackgroundImports { ids, reply } => {
                self.request_imports(ids, reply, false);
            }
            Command::PriorityImport { ids, reply } => {
                self.request_imports(ids, reply, true);
            }
            Command::Import { ids } => {
                if self.auto_backup.load(Ordering::SeqCst) {
                    self.queue_auto_import(ids);
                } else {
                    debug!(
                        subsystem = "sync",
                        component = "manager",
                        count = ids.len(),
                        "Auto-backup off, import not queued"
                    );
                }
            }
            Command::Delete { assets } => self.delete(assets),
            Command::DeleteLocally { assets } => {
                let assets = self.without_kind(assets, OperationKind::Delete);
                self.tracker.start_tracking(&ids_of(&assets));
                self.submit_delete(assets, Some(DeleteState::DeletedFromServer));
            }
            Command::Download { target, reply } => self.download(target, reply),
            Command::Lifecycle(event) => self.lifecycle(event),
            Command::Status(status) => {
                self.status = status;
                self.apply_status();
            }
            Command::SubmitImport {
                op,
                priority,
                reply,
            } => {
                let handle = self.submit_import(op, priority);
                let _ = reply.send(handle);
            }
            Command::SuspendImportQueue => {
                if !self.queues.import.set_suspended(true) {
                    self.emit_suspension("import", true);
                }
            }
            Command::ImportsFinished { ids, success } => self.imports_finished(ids, success),
            Command::OperationFinished {
                kind,
                operation_id,
                assets,
                outcome,
                detail,
            } => self.operation_finished(kind, operation_id, assets, outcome, detail),
            Command::QueuerFinished { queuer_id } => {
                if self.auto_queuer.as_ref().is_some_and(|q| q.id() == queuer_id) {
                    self.auto_queuer = None;
                }
                if self.manual_queuer.as_ref().is_some_and(|q| q.id() == queuer_id) {
                    self.manual_queuer = None;
                }
            }
            Command::ResubmitDelete { assets } => {
                let assets: Vec<_> = self
                    .without_kind(assets, OperationKind::Delete)
                    .into_iter()
                    .filter(|a| a.delete_status() != Some(DeleteState::DeletedFromDisk))
                    .collect();
                if !assets.is_empty() {
                    self.submit_delete(assets, None);
                }
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn start(&mut self, work: StartWork) {
        self.started = true;
        self.apply_status();

        if self.auto_backup.load(Ordering::SeqCst) && !work.unimported.is_empty() {
            self.queue_auto_import(work.unimported);
        }

        let deletes = self.without_kind(work.deletes, OperationKind::Delete);
        if !deletes.is_empty() {
            self.tracker.start_tracking(&ids_of(&deletes));
            self.submit_delete(deletes, None);
        }

        let uploads = self.without_kind(work.uploads, OperationKind::Upload);
        if !uploads.is_empty() {
            self.submit_upload(uploads);
        }
    }

    fn without_kind(&self, assets: Vec<Arc<MutableAsset>>, kind: OperationKind) -> Vec<Arc<MutableAsset>> {
        self.registry.with(|r| {
            assets
                .into_iter()
                .filter(|a| !r.has_kind(&a.uuid(), kind))
                .collect()
        })
    }

    // -------------------------------------------------------------------------
    // Queue policy
    // -------------------------------------------------------------------------

    fn apply_status(&mut self) {
        if self.resigned {
            return;
        }
        let imports = !self.started || self.status.suspends_imports();
        if self.queues.import.set_suspended(imports) != imports {
            self.emit_suspension("import", imports);
        }
        let deletes = !self.started || self.status.suspends_deletes();
        if self.queues.delete.set_suspended(deletes) != deletes {
            self.emit_suspension("delete", deletes);
        }
        if self.status.cancels_downloads() {
            let cancelled = self.queues.download.cancel_all();
            if cancelled > 0 {
                info!(
                    subsystem = "sync",
                    component = "manager",
                    cancelled,
                    "Downloads cancelled by system status"
                );
            }
        }
        debug!(
            subsystem = "sync",
            component = "manager",
            status = ?self.status,
            import_suspended = imports,
            delete_suspended = deletes,
            "System status applied"
        );
    }

    fn emit_suspension(&self, queue: &str, suspended: bool) {
        self.events.emit(AssetEvent::QueueSuspended {
            queue: queue.to_string(),
            suspended,
        });
    }

    fn lifecycle(&mut self, event: AppLifecycleEvent) {
        info!(subsystem = "sync", component = "manager", ?event, "Lifecycle event");
        match event {
            AppLifecycleEvent::ResignActive => {
                self.resigned = true;
                self.queues.import.suspend_operations(true);
                for queue in self.queues.all() {
                    queue.set_suspended(true);
                }
            }
            AppLifecycleEvent::EnterBackground => {
                self.resigned = false;
                for queuer in [self.auto_queuer.take(), self.manual_queuer.take()]
                    .into_iter()
                    .flatten()
                {
                    queuer.cancel();
                }
                for request in self.priority_requests.drain(..) {
                    let _ = request.reply.send(false);
                }
                for queue in self.queues.all() {
                    queue.cancel_all();
                }
                self.queues.import.suspend_operations(false);
                for queue in self.queues.all() {
                    queue.set_suspended(false);
                }
                let interrupted: Vec<Uuid> = self.registry.with(|r| {
                    let mut ids = r.assets_with_kind(OperationKind::Import);
                    ids.extend(r.assets_with_kind(OperationKind::Delete));
                    ids
                });
                self.tracker.remove_tracking(&interrupted);
                self.interrupted = true;
            }
            AppLifecycleEvent::BecomeActive => {
                self.resigned = false;
                self.queues.download.set_suspended(false);
                self.queues.import.suspend_operations(false);
                self.apply_status();
                if std::mem::take(&mut self.interrupted) {
                    self.reload();
                }
            }
            AppLifecycleEvent::AutoBackupChanged(enabled) => {
                self.auto_backup.store(enabled, Ordering::SeqCst);
                if enabled {
                    self.reload();
                } else if let Some(queuer) = self.auto_queuer.take() {
                    queuer.cancel();
                }
            }
        }
    }

    /// Gather pending work again off the loop and feed it back as `Start`.
    fn reload(&self) {
        let ctx = self.ctx.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match gather_start_work(&ctx).await {
                Ok(work) => {
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Command::Start { work, done: None });
                    }
                }
                Err(e) => warn!(
                    subsystem = "sync",
                    component = "manager",
                    error = %e,
                    "Failed to reload pending work"
                ),
            }
        });
    }

    fn stop(&mut self) {
        for queuer in [self.auto_queuer.take(), self.manual_queuer.take()]
            .into_iter()
            .flatten()
        {
            queuer.cancel();
        }
        for request in self.priority_requests.drain(..) {
            let _ = request.reply.send(false);
        }
        for queue in self.queues.all() {
            queue.cancel_all();
            queue.suspend_operations(false);
            queue.set_suspended(false);
        }
    }

    // -------------------------------------------------------------------------
    // Imports
    // -------------------------------------------------------------------------

    fn request_imports(&mut self, ids: Vec<Uuid>, reply: oneshot::Sender<bool>, manual: bool) {
        if ids.is_empty() {
            let _ = reply.send(true);
            return;
        }
        self.priority_requests.push(PriorityRequest {
            remaining: ids.iter().copied().collect(),
            success: true,
            reply,
        });
        if manual {
            self.queue_manual_import(ids);
        } else {
            self.queue_auto_import(ids);
        }
    }

    fn queue_auto_import(&mut self, ids: Vec<Uuid>) {
        if let Some(queuer) = &self.auto_queuer {
            if queuer.append(ids.clone()) {
                return;
            }
        }
        let auto_backup = self.auto_backup.clone();
        let condition: QueuingCondition = Arc::new(move || auto_backup.load(Ordering::SeqCst));
        let queuer = Arc::new(AssetImportQueuingOperation::automatic(
            self.ctx.clone(),
            self.delegate.clone(),
            ids,
            Some(condition),
        ));
        self.spawn_queuer(queuer.clone());
        self.auto_queuer = Some(queuer);
    }

    fn queue_manual_import(&mut self, ids: Vec<Uuid>) {
        if let Some(queuer) = &self.manual_queuer {
            if queuer.append(ids.clone()) {
                return;
            }
        }
        let queuer = Arc::new(AssetImportQueuingOperation::manual(
            self.ctx.clone(),
            self.delegate.clone(),
            ids,
        ));
        self.spawn_queuer(queuer.clone());
        self.manual_queuer = Some(queuer);
    }

    fn spawn_queuer(&self, queuer: Arc<AssetImportQueuingOperation>) {
        let tx = self.tx.clone();
        debug!(
            subsystem = "sync",
            component = "manager",
            queuer_id = %queuer.id(),
            priority = ?queuer.priority(),
            pending = queuer.pending_count(),
            "Import queuer started"
        );
        tokio::spawn(async move {
            let queuer_id = queuer.id();
            queuer.run().await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::QueuerFinished { queuer_id });
            }
        });
    }

    fn submit_import(&mut self, op: Arc<AssetImportOperation>, priority: QueuePriority) -> OperationHandle {
        let ids = op.asset_ids();
        self.tracker.start_tracking(&ids);
        let dependencies = self.unfinished(&ids, &[OperationKind::Import]);
        if self.resigned {
            op.set_suspended(true);
        }
        let handle = self
            .queues
            .import
            .add_with_dependencies(op, priority, dependencies);
        self.register(OperationKind::Import, &handle, ids, FinishedDetail::Import);
        handle
    }

    fn imports_finished(&mut self, ids: Vec<Uuid>, success: bool) {
        if success {
            self.tracker.complete_tracking(&ids);
            self.events.emit(AssetEvent::ImportCompleted { ids: ids.clone() });
        } else {
            self.tracker.remove_tracking(&ids);
            self.events.emit(AssetEvent::ImportFailed { ids: ids.clone() });
        }

        let mut open = Vec::with_capacity(self.priority_requests.len());
        for mut request in self.priority_requests.drain(..) {
            for id in &ids {
                if request.remaining.remove(id) && !success {
                    request.success = false;
                }
            }
            if request.remaining.is_empty() {
                let _ = request.reply.send(request.success);
            } else {
                open.push(request);
            }
        }
        self.priority_requests = open;
    }

    fn submit_upload(&mut self, assets: Vec<Arc<MutableAsset>>) {
        let ids = ids_of(&assets);
        self.tracker.start_tracking(&ids);
        let dependencies = self.unfinished(&ids, &[OperationKind::Import]);
        let op = Arc::new(AssetUploadOperation::new(self.ctx.clone(), assets));
        let handle = self
            .queues
            .import
            .add_with_dependencies(op, QueuePriority::Normal, dependencies);
        self.register(OperationKind::Upload, &handle, ids, FinishedDetail::Upload);
    }

    // -------------------------------------------------------------------------
    // Deletes
    // -------------------------------------------------------------------------

    fn delete(&mut self, assets: Vec<Arc<MutableAsset>>) {
        let (remote, local_only): (Vec<_>, Vec<_>) = self.registry.with(|r| {
            assets.into_iter().partition(|a| {
                a.imported()
                    || a.delete_status().is_some()
                    || r.has_kind(&a.uuid(), OperationKind::Import)
                    || r.has_kind(&a.uuid(), OperationKind::Upload)
            })
        });
        debug!(
            subsystem = "sync",
            component = "manager",
            remote = remote.len(),
            local_only = local_only.len(),
            "Delete requested"
        );

        if !local_only.is_empty() {
            let ctx = self.ctx.clone();
            let events = self.events.clone();
            tokio::spawn(async move { terminate_assets(&ctx, &events, local_only).await });
        }

        let remote = self.without_kind(remote, OperationKind::Delete);
        if !remote.is_empty() {
            self.tracker.start_tracking(&ids_of(&remote));
            self.submit_delete(remote, None);
        }
    }

    fn submit_delete(&mut self, assets: Vec<Arc<MutableAsset>>, seed: Option<DeleteState>) {
        let ids = ids_of(&assets);
        let dependencies = self.unfinished(
            &ids,
            &[OperationKind::Import, OperationKind::Upload, OperationKind::Download],
        );
        let op = Arc::new(match seed {
            Some(state) => {
                AssetDeleteOperation::seeded(self.ctx.clone(), assets, Some(state), dependencies.clone())
            }
            None => AssetDeleteOperation::new(self.ctx.clone(), assets, dependencies.clone()),
        });
        let handle = self.queues.delete.add_with_dependencies(
            op.clone(),
            QueuePriority::Normal,
            dependencies,
        );
        self.register(OperationKind::Delete, &handle, ids, FinishedDetail::Delete(op));
    }

    fn delete_finished(&mut self, op: Arc<AssetDeleteOperation>, outcome: OperationOutcome) {
        let ids = op.asset_ids();
        match outcome {
            OperationOutcome::Succeeded => {
                self.tracker.complete_tracking(&ids);
                let ctx = self.ctx.clone();
                let events = self.events.clone();
                let assets = op.assets().to_vec();
                tokio::spawn(async move { terminate_assets(&ctx, &events, assets).await });
            }
            OperationOutcome::Cancelled => self.tracker.remove_tracking(&ids),
            OperationOutcome::Failed if op.was_blocked() => {
                self.handle(Command::ResubmitDelete {
                    assets: op.assets().to_vec(),
                });
            }
            OperationOutcome::Failed => {
                let tx = self.tx.clone();
                let backoff = self.ctx.config.recoverable_backoff;
                let assets = op.assets().to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Command::ResubmitDelete { assets });
                    }
                });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Downloads
    // -------------------------------------------------------------------------

    fn download(&mut self, target: PhysicalAssetRef, reply: oneshot::Sender<bool>) {
        let key = (target.uuid(), target.quality);
        if let Some(waiting) = self.downloads.get_mut(&key) {
            waiting.push(reply);
            return;
        }
        self.downloads.insert(key, vec![reply]);

        let id = target.uuid();
        let op = Arc::new(AssetDownloadOperation::new(
            self.ctx.clone(),
            vec![target],
            TransferPriority::High,
        ));
        let handle = self.queues.download.add(op.clone(), QueuePriority::High);
        self.register(OperationKind::Download, &handle, vec![id], FinishedDetail::Download(op));
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    fn unfinished(&self, ids: &[Uuid], kinds: &[OperationKind]) -> Vec<OperationHandle> {
        self.registry
            .with(|r| r.handles_of(ids, kinds))
            .into_iter()
            .filter(|h| !h.is_finished())
            .collect()
    }

    /// Record the operation and report back to the loop when it finishes.
    fn register(
        &mut self,
        kind: OperationKind,
        handle: &OperationHandle,
        assets: Vec<Uuid>,
        detail: FinishedDetail,
    ) {
        self.registry.mutate(|r| r.register(kind, handle, &assets));
        let handle = handle.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = handle.finished().await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::OperationFinished {
                    kind,
                    operation_id: handle.id(),
                    assets,
                    outcome,
                    detail,
                });
            }
        });
    }

    fn operation_finished(
        &mut self,
        kind: OperationKind,
        operation_id: Uuid,
        assets: Vec<Uuid>,
        outcome: OperationOutcome,
        detail: FinishedDetail,
    ) {
        let freed = self.registry.mutate(|r| r.unregister(operation_id, &assets));
        debug!(
            subsystem = "sync",
            component = "manager",
            kind = kind.as_str(),
            operation_id = %operation_id,
            ?outcome,
            freed = freed.len(),
            "Operation unregistered"
        );

        match detail {
            FinishedDetail::Import => {}
            FinishedDetail::Upload => {
                if outcome.is_success() {
                    self.tracker.complete_tracking(&assets);
                } else {
                    self.tracker.remove_tracking(&assets);
                }
            }
            FinishedDetail::Download(op) => {
                let completed: HashSet<(Uuid, Quality)> = op.completed().into_iter().collect();
                for key in op.targets() {
                    let success = completed.contains(&key);
                    for reply in self.downloads.remove(&key).into_iter().flatten() {
                        let _ = reply.send(success);
                    }
                }
            }
            FinishedDetail::Delete(op) => self.delete_finished(op, outcome),
        }
    }
}

fn ids_of(assets: &[Arc<MutableAsset>]) -> Vec<Uuid> {
    assets.iter().map(|a| a.uuid()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use std::time::Duration;
    use tripup_core::{AssetRepository, ImportStage};

    async fn started(harness: &Harness) -> AssetManager {
        let manager = harness.manager();
        manager.load_and_start_queues().await.unwrap();
        manager
    }

    async fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..500 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_queues_suspended_until_started() {
        let harness = Harness::new().await;
        let manager = harness.manager();
        assert!(manager.is_import_suspended());
        assert!(manager.is_delete_suspended());
        assert!(!manager.is_download_suspended());

        manager.load_and_start_queues().await.unwrap();
        assert!(!manager.is_import_suspended());
        assert!(!manager.is_delete_suspended());
    }

    #[tokio::test]
    async fn test_missing_user_key_keeps_queues_suspended() {
        let harness = Harness::new().await.without_user_key();
        let manager = harness.manager();

        let err = manager.load_and_start_queues().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(manager.is_import_suspended());
        assert!(manager.is_delete_suspended());
    }

    #[tokio::test]
    async fn test_priority_import_succeeds_for_all() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        let a = harness.add_asset(&manager, "IMG_1").await;
        let b = harness.add_asset(&manager, "IMG_2").await;

        assert!(manager.priority_import(&[a.uuid(), b.uuid()]).await.unwrap());
        assert!(a.imported());
        assert!(b.imported());
        assert_eq!(a.import_status(), ImportStage::Success);
        wait_until(|| !manager.is_busy(&a.uuid()) && !manager.is_busy(&b.uuid())).await;
        wait_until(|| manager.is_idle()).await;
    }

    #[tokio::test]
    async fn test_priority_import_fails_if_any_asset_fails() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        let good = harness.add_asset(&manager, "IMG_1").await;
        let bad = harness.add_asset(&manager, "IMG_2").await;
        harness.library.remove("IMG_2");

        assert!(!manager.priority_import(&[good.uuid(), bad.uuid()]).await.unwrap());
        assert!(good.imported());
        wait_until(|| !manager.context().cache.contains(&bad.uuid())).await;
        assert!(harness.db.db.assets.fetch(bad.uuid()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_suspends_and_resumes_imports() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        let mut events = manager.events().subscribe();

        manager
            .handle_status(SystemStatus {
                network_available: false,
                ..SystemStatus::healthy()
            })
            .unwrap();
        wait_until(|| manager.is_import_suspended() && manager.is_delete_suspended()).await;

        manager
            .handle_status(SystemStatus {
                cloud_space_low: true,
                ..SystemStatus::healthy()
            })
            .unwrap();
        wait_until(|| !manager.is_delete_suspended()).await;
        assert!(manager.is_import_suspended());

        manager.handle_status(SystemStatus::healthy()).unwrap();
        wait_until(|| !manager.is_import_suspended()).await;

        let first = events.recv().await.unwrap();
        assert_eq!(
            first.payload,
            AssetEvent::QueueSuspended {
                queue: "import".to_string(),
                suspended: true
            }
        );
    }

    #[tokio::test]
    async fn test_resign_active_suspends_all_queues() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;

        manager.handle_lifecycle(AppLifecycleEvent::ResignActive).unwrap();
        wait_until(|| {
            manager.is_import_suspended()
                && manager.is_delete_suspended()
                && manager.is_download_suspended()
        })
        .await;

        // Status updates are ignored until the app is active again.
        manager.handle_status(SystemStatus::healthy()).unwrap();
        manager.handle_lifecycle(AppLifecycleEvent::BecomeActive).unwrap();
        wait_until(|| !manager.is_download_suspended() && !manager.is_import_suspended()).await;
    }

    #[tokio::test]
    async fn test_enter_background_unsuspends_queues() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        manager.handle_lifecycle(AppLifecycleEvent::ResignActive).unwrap();
        manager.handle_lifecycle(AppLifecycleEvent::EnterBackground).unwrap();
        wait_until(|| {
            !manager.is_import_suspended()
                && !manager.is_delete_suspended()
                && !manager.is_download_suspended()
        })
        .await;
    }

    #[tokio::test]
    async fn test_delete_local_only_asset_terminates_without_server() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        manager
            .handle_lifecycle(AppLifecycleEvent::AutoBackupChanged(false))
            .unwrap();
        let asset = harness.add_asset(&manager, "IMG_1").await;

        manager.delete(&[asset.uuid()]).await.unwrap();
        wait_until(|| !manager.context().cache.contains(&asset.uuid())).await;
        assert!(harness.api.deleted().is_empty());
        assert_eq!(harness.library.deleted(), vec!["IMG_1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_imported_asset_goes_through_server() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        let asset = harness.add_asset(&manager, "IMG_1").await;
        assert!(manager.priority_import(&[asset.uuid()]).await.unwrap());
        let low = asset.physical(Quality::Low).local_path().to_path_buf();
        assert!(harness.disk.contains(&low));

        manager.delete(&[asset.uuid()]).await.unwrap();
        wait_until(|| !manager.context().cache.contains(&asset.uuid())).await;
        assert_eq!(harness.api.deleted(), vec![asset.uuid()]);
        assert!(!harness.disk.contains(&low));
        assert!(manager.tracker().progress().is_idle());
    }

    #[tokio::test]
    async fn test_concurrent_downloads_share_one_operation() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        let asset = harness.add_asset(&manager, "IMG_1").await;
        assert!(manager.priority_import(&[asset.uuid()]).await.unwrap());
        harness
            .disk
            .remove(asset.physical(Quality::Low).local_path());

        let gate = harness.cloud.hold_downloads().await;
        let first = tokio::spawn({
            let manager = manager.clone();
            let id = asset.uuid();
            async move { manager.request_download(id, Quality::Low).await.unwrap() }
        });
        let second = tokio::spawn({
            let manager = manager.clone();
            let id = asset.uuid();
            async move { manager.request_download(id, Quality::Low).await.unwrap() }
        });
        wait_until(|| harness.cloud.waiting_downloads() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(gate);

        assert!(first.await.unwrap());
        assert!(second.await.unwrap());
        assert_eq!(harness.cloud.download_count(), 1);
        assert!(manager.request_download(asset.uuid(), Quality::Low).await.unwrap());
        assert_eq!(harness.cloud.download_count(), 1);
    }

    #[tokio::test]
    async fn test_download_without_remote_is_false() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        manager
            .handle_lifecycle(AppLifecycleEvent::AutoBackupChanged(false))
            .unwrap();
        let asset = harness.add_asset(&manager, "IMG_1").await;
        assert!(!manager.request_download(asset.uuid(), Quality::Low).await.unwrap());
        assert!(!manager.request_download(Uuid::new_v4(), Quality::Low).await.unwrap());
    }

    #[tokio::test]
    async fn test_background_imports_finish_within_deadline() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        manager
            .handle_lifecycle(AppLifecycleEvent::AutoBackupChanged(false))
            .unwrap();
        harness.add_asset(&manager, "IMG_1").await;
        manager
            .handle_lifecycle(AppLifecycleEvent::AutoBackupChanged(true))
            .unwrap();

        assert!(manager.start_background_imports().await.unwrap());
        assert!(manager.context().repo.unimported_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_command_loop() {
        let harness = Harness::new().await;
        let manager = started(&harness).await;
        manager.shutdown().await.unwrap();
        wait_until(|| manager.import(&[]).is_err()).await;
    }
}
