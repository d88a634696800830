//! Keeps the asset model in step with the device library and the server.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tripup_core::{
    Asset, AssetEvent, AssetRecord, EventEnvelope, Error, Geolocation, ImportStage, PixelSize,
    Quality, Result, ServerAsset,
};
use tripup_crypto::{decrypt_string, AssetKey};

use crate::context::SyncContext;
use crate::manager::AssetManager;

/// Counts of one server delta application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerSyncSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Entry point for UI-facing model changes.
pub struct ModelController {
    manager: AssetManager,
    owner_id: Uuid,
}

impl ModelController {
    pub fn new(manager: AssetManager, owner_id: Uuid) -> Self {
        Self { manager, owner_id }
    }

    fn ctx(&self) -> &Arc<SyncContext> {
        self.manager.context()
    }

    pub fn manager(&self) -> &AssetManager {
        &self.manager
    }

    /// Record library items not yet known and hand them to auto-backup.
    ///
    /// Identifiers linked to an existing asset by content deduplication
    /// count as known. Returns the ids of the new records.
    pub async fn sync_photo_library(&self) -> Result<Vec<Uuid>> {
        let ctx = self.ctx();
        let known: HashSet<String> = ctx.repo.known_local_identifiers().await?.into_iter().collect();

        let mut added = Vec::new();
        for local_identifier in ctx.library.local_identifiers().await? {
            if known.contains(&local_identifier) {
                continue;
            }
            let Some(device) = ctx.library.fetch(&local_identifier).await? else {
                continue;
            };
            let asset = ctx
                .cache
                .insert_new(AssetRecord::new_local(self.owner_id, &device))
                .await?;
            added.push(asset.uuid());
        }

        info!(
            subsystem = "sync",
            component = "controller",
            op = "library_scan",
            known = known.len(),
            added = added.len(),
            "Photo library scanned"
        );
        if !added.is_empty() {
            self.manager.events().emit(AssetEvent::AssetsAdded { ids: added.clone() });
            self.manager.import(&added)?;
        }
        Ok(added)
    }

    /// Apply the server change feed since the last successful sync.
    pub async fn apply_server_changes(&self) -> Result<ServerSyncSummary> {
        let ctx = self.ctx();
        let since = ctx.repo.last_server_sync().await?;
        let changes = ctx.api.fetch_changes(since).await?;
        debug!(
            subsystem = "sync",
            component = "controller",
            since = ?since,
            changes = changes.len(),
            "Server changes fetched"
        );

        let mut latest = since;
        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();

        for change in changes {
            latest = latest.max(Some(change.updated_at));
            let existing = ctx.cache.get(change.uuid).await?;

            if change.deleted {
                if existing.is_some_and(|a| !a.deleted()) {
                    deleted.push(change.uuid);
                }
                continue;
            }

            match existing {
                Some(asset) => {
                    if asset.deleted() {
                        continue;
                    }
                    let mut changed = false;
                    if asset.favourite() != change.favourite {
                        asset.set_favourite(change.favourite).await?;
                        changed = true;
                    }
                    for quality in Quality::ALL {
                        let remote = match quality {
                            Quality::Low => &change.remote_path_low,
                            Quality::Original => &change.remote_path_original,
                        };
                        if remote.is_some() && asset.remote_path(quality) != *remote {
                            asset.set_remote_path(quality, remote.clone()).await?;
                            changed = true;
                        }
                    }
                    if asset.cloud_filesize() != change.cloud_filesize {
                        asset.set_cloud_filesize(change.cloud_filesize).await?;
                    }
                    if !asset.imported() {
                        asset.set_imported(true).await?;
                        asset.set_import_status(ImportStage::Success).await?;
                        changed = true;
                    }
                    if changed {
                        updated.push(change.uuid);
                    }
                }
                None => {
                    let record = self.record_from_server(&change).await?;
                    ctx.cache.insert_new(record).await?;
                    added.push(change.uuid);
                }
            }
        }

        if !deleted.is_empty() {
            self.manager.delete_locally(&deleted).await?;
        }
        if let Some(at) = latest {
            if Some(at) != since {
                ctx.repo.set_last_server_sync(at).await?;
            }
        }

        let summary = ServerSyncSummary {
            added: added.len(),
            updated: updated.len(),
            deleted: deleted.len(),
        };
        info!(
            subsystem = "sync",
            component = "controller",
            op = "server_delta",
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            "Server changes applied"
        );

        let events = self.manager.events();
        if !added.is_empty() {
            events.emit(AssetEvent::AssetsAdded { ids: added });
        }
        if !updated.is_empty() {
            events.emit(AssetEvent::AssetsUpdated { ids: updated });
        }
        Ok(summary)
    }

    /// Build the local record of an asset created on another device.
    async fn record_from_server(&self, change: &ServerAsset) -> Result<AssetRecord> {
        let keychain = &self.ctx().keychain;
        let fingerprint = keychain.store_sealed(&change.sealed_key).await?;
        let key = keychain.asset_key(&fingerprint).await?;

        let creation_date = open_field(&key, &change.encrypted_creation_date)?
            .and_then(|value| parse_or_warn(change.uuid, "creation_date", parse_date(&value)));
        let location = open_field(&key, &change.encrypted_location)?
            .and_then(|value| parse_or_warn(change.uuid, "location", value.parse::<Geolocation>()));
        let duration = open_field(&key, &change.encrypted_duration)?.and_then(|value| {
            parse_or_warn(
                change.uuid,
                "duration",
                value
                    .parse::<f64>()
                    .map_err(|e| Error::InvalidInput(e.to_string())),
            )
        });

        Ok(AssetRecord {
            uuid: change.uuid,
            owner_id: change.owner_id,
            asset_type: change.asset_type,
            creation_date,
            location,
            pixel_size: PixelSize {
                width: change.pixel_width,
                height: change.pixel_height,
            },
            duration,
            imported: true,
            favourite: change.favourite,
            deleted: false,
            md5: open_field(&key, &change.encrypted_md5)?,
            fingerprint: Some(fingerprint),
            local_identifier: None,
            original_uti: change.original_uti.clone(),
            import_status: ImportStage::Success,
            delete_status: None,
            cloud_filesize: change.cloud_filesize,
            remote_path_low: change.remote_path_low.clone(),
            remote_path_original: change.remote_path_original.clone(),
        })
    }

    pub async fn asset(&self, id: Uuid) -> Result<Option<Asset>> {
        Ok(self.ctx().cache.get(id).await?.map(|a| a.asset()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.manager.events().subscribe()
    }
}

fn open_field(key: &AssetKey, field: &Option<String>) -> Result<Option<String>> {
    field
        .as_deref()
        .map(|value| decrypt_string(key, value).map_err(|e| Error::Crypto(e.to_string())))
        .transpose()
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(e.to_string()))
}

fn parse_or_warn<T>(id: Uuid, field: &'static str, parsed: Result<T>) -> Option<T> {
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                subsystem = "sync",
                component = "controller",
                asset_id = %id,
                field,
                error = %e,
                "Dropping unreadable server field"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use chrono::TimeZone;
    use std::time::Duration;
    use tripup_core::{AppLifecycleEvent, AssetRepository, AssetType};
    use tripup_crypto::{encrypt_string, seal_key};

    fn server_asset(harness: &Harness, updated_at: DateTime<Utc>) -> (ServerAsset, AssetKey) {
        let key = AssetKey::generate();
        let change = ServerAsset {
            uuid: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            asset_type: AssetType::Photo,
            remote_path_low: Some("remote/low".to_string()),
            remote_path_original: Some("remote/original".to_string()),
            original_uti: Some("public.heic".to_string()),
            pixel_width: 800,
            pixel_height: 600,
            cloud_filesize: 4096,
            sealed_key: seal_key(&key, &harness.user.public).unwrap(),
            encrypted_md5: Some(encrypt_string(&key, "abc123").unwrap()),
            encrypted_creation_date: Some(
                encrypt_string(&key, "2024-05-01T10:00:00+00:00").unwrap(),
            ),
            encrypted_location: Some(encrypt_string(&key, "48.85,2.35").unwrap()),
            encrypted_duration: None,
            favourite: true,
            deleted: false,
            updated_at,
        };
        (change, key)
    }

    async fn controller(harness: &Harness) -> ModelController {
        let manager = harness.manager();
        manager.load_and_start_queues().await.unwrap();
        ModelController::new(manager, harness.owner)
    }

    #[tokio::test]
    async fn test_library_scan_records_new_items_once() {
        let harness = Harness::new().await;
        let controller = controller(&harness).await;
        controller
            .manager()
            .handle_lifecycle(AppLifecycleEvent::AutoBackupChanged(false))
            .unwrap();
        harness.library.add_photo("IMG_1");
        harness.library.add_photo("IMG_2");
        let mut events = controller.subscribe();

        let added = controller.sync_photo_library().await.unwrap();
        assert_eq!(added.len(), 2);
        assert!(controller.sync_photo_library().await.unwrap().is_empty());

        let event = events.recv().await.unwrap();
        assert_eq!(event.payload, AssetEvent::AssetsAdded { ids: added.clone() });
        let asset = controller.asset(added[0]).await.unwrap().unwrap();
        assert!(!asset.imported);
    }

    #[tokio::test]
    async fn test_server_delta_adds_remote_asset() {
        let harness = Harness::new().await;
        let controller = controller(&harness).await;
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (change, key) = server_asset(&harness, at);
        harness.api.push_change(change.clone());

        let summary = controller.apply_server_changes().await.unwrap();
        assert_eq!(summary.added, 1);

        let record = harness.db.db.assets.fetch(change.uuid).await.unwrap().unwrap();
        assert!(record.imported);
        assert!(record.favourite);
        assert_eq!(record.import_status, ImportStage::Success);
        assert_eq!(record.md5.as_deref(), Some("abc123"));
        assert_eq!(record.fingerprint, Some(key.fingerprint()));
        assert_eq!(record.location.map(|l| l.latitude), Some(48.85));
        assert_eq!(record.creation_date, Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        assert_eq!(harness.db.db.assets.last_server_sync().await.unwrap(), Some(at));

        // Already applied entries are not fetched again.
        let again = controller.apply_server_changes().await.unwrap();
        assert_eq!(again, ServerSyncSummary::default());
    }

    #[tokio::test]
    async fn test_server_delta_updates_existing_asset() {
        let harness = Harness::new().await;
        let controller = controller(&harness).await;
        let first = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (mut change, _) = server_asset(&harness, first);
        harness.api.push_change(change.clone());
        controller.apply_server_changes().await.unwrap();

        change.favourite = false;
        change.updated_at = first + chrono::Duration::minutes(5);
        harness.api.push_change(change.clone());
        let summary = controller.apply_server_changes().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert!(!controller.asset(change.uuid).await.unwrap().unwrap().favourite);
    }

    #[tokio::test]
    async fn test_server_deletion_removes_asset_locally() {
        let harness = Harness::new().await;
        let controller = controller(&harness).await;
        let first = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let (mut change, _) = server_asset(&harness, first);
        harness.api.push_change(change.clone());
        controller.apply_server_changes().await.unwrap();

        change.deleted = true;
        change.updated_at = first + chrono::Duration::minutes(5);
        harness.api.push_change(change.clone());
        let summary = controller.apply_server_changes().await.unwrap();
        assert_eq!(summary.deleted, 1);

        for _ in 0..200 {
            if harness.db.db.assets.fetch(change.uuid).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(harness.db.db.assets.fetch(change.uuid).await.unwrap().is_none());
        // Deletion originated on the server, so nothing is sent back.
        assert!(harness.api.deleted().is_empty());
    }
}
