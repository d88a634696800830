//! SQLite implementation of [`AssetRepository`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, trace};
use uuid::Uuid;

use tripup_core::{
    AssetRecord, AssetRepository, DeleteState, Error, Geolocation, ImportStage, PixelSize,
    Quality, Result,
};

const ASSET_COLUMNS: &str = "uuid, owner_id, asset_type, creation_date, latitude, longitude, \
     altitude, pixel_width, pixel_height, duration, imported, favourite, deleted, md5, \
     fingerprint, local_identifier, original_uti, import_status, delete_status, cloud_filesize, \
     remote_path_low, remote_path_original";

const LAST_SERVER_SYNC_KEY: &str = "last_server_sync";

/// Asset table access.
#[derive(Clone)]
pub struct SqliteAssetRepository {
    pool: SqlitePool,
}

impl SqliteAssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn update_column<T>(&self, id: Uuid, column: &'static str, value: T) -> Result<()>
    where
        T: for<'e> sqlx::Encode<'e, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite> + Send + 'static,
    {
        let sql = format!("UPDATE assets SET {column} = ? WHERE uuid = ?");
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::AssetNotFound(id));
        }
        trace!(subsystem = "db", component = "assets", asset_id = %id, column, "Column updated");
        Ok(())
    }

    async fn ids(&self, sql: &str) -> Result<Vec<Uuid>> {
        let rows: Vec<String> = sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(|s| parse_uuid(s)).collect()
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("corrupt uuid {s:?}: {e}")))
}

fn record_from_row(row: &SqliteRow) -> Result<AssetRecord> {
    let uuid: String = row.try_get("uuid")?;
    let owner_id: String = row.try_get("owner_id")?;
    let asset_type: String = row.try_get("asset_type")?;
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    let import_status: String = row.try_get("import_status")?;
    let delete_status: Option<String> = row.try_get("delete_status")?;
    let pixel_width: i64 = row.try_get("pixel_width")?;
    let pixel_height: i64 = row.try_get("pixel_height")?;
    let cloud_filesize: i64 = row.try_get("cloud_filesize")?;

    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Geolocation {
            latitude,
            longitude,
            altitude: row.try_get("altitude")?,
        }),
        _ => None,
    };

    Ok(AssetRecord {
        uuid: parse_uuid(&uuid)?,
        owner_id: parse_uuid(&owner_id)?,
        asset_type: asset_type.parse()?,
        creation_date: row.try_get("creation_date")?,
        location,
        pixel_size: PixelSize {
            width: pixel_width.max(0) as u32,
            height: pixel_height.max(0) as u32,
        },
        duration: row.try_get("duration")?,
        imported: row.try_get("imported")?,
        favourite: row.try_get("favourite")?,
        deleted: row.try_get("deleted")?,
        md5: row.try_get("md5")?,
        fingerprint: row.try_get("fingerprint")?,
        local_identifier: row.try_get("local_identifier")?,
        original_uti: row.try_get("original_uti")?,
        import_status: import_status.parse()?,
        delete_status: delete_status.as_deref().map(str::parse).transpose()?,
        cloud_filesize: cloud_filesize.max(0) as u64,
        remote_path_low: row.try_get("remote_path_low")?,
        remote_path_original: row.try_get("remote_path_original")?,
    })
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn insert(&self, record: &AssetRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO assets ({ASSET_COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(record.uuid.to_string())
            .bind(record.owner_id.to_string())
            .bind(record.asset_type.as_str())
            .bind(record.creation_date)
            .bind(record.location.map(|l| l.latitude))
            .bind(record.location.map(|l| l.longitude))
            .bind(record.location.and_then(|l| l.altitude))
            .bind(record.pixel_size.width as i64)
            .bind(record.pixel_size.height as i64)
            .bind(record.duration)
            .bind(record.imported)
            .bind(record.favourite)
            .bind(record.deleted)
            .bind(record.md5.as_deref())
            .bind(record.fingerprint.as_deref())
            .bind(record.local_identifier.as_deref())
            .bind(record.original_uti.as_deref())
            .bind(record.import_status.as_str())
            .bind(record.delete_status.map(|s| s.as_str()))
            .bind(record.cloud_filesize as i64)
            .bind(record.remote_path_low.as_deref())
            .bind(record.remote_path_original.as_deref())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "assets",
            op = "insert",
            asset_id = %record.uuid,
            imported = record.imported,
            "Asset inserted"
        );
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE uuid = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query("DELETE FROM assets WHERE uuid = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("DELETE FROM local_identifier_links WHERE asset_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(subsystem = "db", component = "assets", op = "delete", asset_id = %id, "Asset deleted");
        Ok(())
    }

    async fn set_fingerprint(&self, id: Uuid, fingerprint: Option<&str>) -> Result<()> {
        self.update_column(id, "fingerprint", fingerprint.map(str::to_string))
            .await
    }

    async fn set_original_uti(&self, id: Uuid, uti: Option<&str>) -> Result<()> {
        self.update_column(id, "original_uti", uti.map(str::to_string))
            .await
    }

    async fn set_local_identifier(&self, id: Uuid, local_identifier: Option<&str>) -> Result<()> {
        self.update_column(id, "local_identifier", local_identifier.map(str::to_string))
            .await
    }

    async fn set_md5(&self, id: Uuid, md5: Option<&str>) -> Result<()> {
        self.update_column(id, "md5", md5.map(str::to_string)).await
    }

    async fn set_cloud_filesize(&self, id: Uuid, size: u64) -> Result<()> {
        self.update_column(id, "cloud_filesize", size as i64).await
    }

    async fn set_import_status(&self, id: Uuid, status: ImportStage) -> Result<()> {
        self.update_column(id, "import_status", status.as_str().to_string())
            .await
    }

    async fn set_delete_status(&self, id: Uuid, status: Option<DeleteState>) -> Result<()> {
        self.update_column(id, "delete_status", status.map(|s| s.as_str().to_string()))
            .await
    }

    async fn set_imported(&self, id: Uuid, imported: bool) -> Result<()> {
        self.update_column(id, "imported", imported).await
    }

    async fn set_favourite(&self, id: Uuid, favourite: bool) -> Result<()> {
        self.update_column(id, "favourite", favourite).await
    }

    async fn set_deleted(&self, id: Uuid, deleted: bool) -> Result<()> {
        self.update_column(id, "deleted", deleted).await
    }

    async fn set_remote_path(&self, id: Uuid, quality: Quality, path: Option<&str>) -> Result<()> {
        let column = match quality {
            Quality::Low => "remote_path_low",
            Quality::Original => "remote_path_original",
        };
        self.update_column(id, column, path.map(str::to_string))
            .await
    }

    async fn unimported_ids(&self) -> Result<Vec<Uuid>> {
        self.ids(
            "SELECT uuid FROM assets \
             WHERE imported = 0 AND deleted = 0 AND import_status != 'fatal' \
             ORDER BY creation_date, rowid",
        )
        .await
    }

    async fn deleted_pending_ids(&self) -> Result<Vec<Uuid>> {
        self.ids("SELECT uuid FROM assets WHERE deleted = 1 ORDER BY rowid")
            .await
    }

    async fn missing_original_ids(&self) -> Result<Vec<Uuid>> {
        self.ids(
            "SELECT uuid FROM assets \
             WHERE imported = 1 AND deleted = 0 AND remote_path_original IS NULL \
             ORDER BY rowid",
        )
        .await
    }

    async fn find_by_md5(&self, md5: &str, exclude: Uuid) -> Result<Option<Uuid>> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT uuid FROM assets \
             WHERE md5 = ? AND uuid != ? AND deleted = 0 AND import_status != 'fatal' \
             ORDER BY imported DESC, rowid LIMIT 1",
        )
        .bind(md5)
        .bind(exclude.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        found.as_deref().map(parse_uuid).transpose()
    }

    async fn find_by_local_identifier(&self, local_identifier: &str) -> Result<Option<Uuid>> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT uuid FROM assets WHERE local_identifier = ?1 \
             UNION ALL \
             SELECT asset_id FROM local_identifier_links WHERE local_identifier = ?1 \
             LIMIT 1",
        )
        .bind(local_identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        found.as_deref().map(parse_uuid).transpose()
    }

    async fn link_local_identifier(&self, local_identifier: &str, asset_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO local_identifier_links (local_identifier, asset_id) VALUES (?, ?) \
             ON CONFLICT (local_identifier) DO UPDATE SET asset_id = excluded.asset_id",
        )
        .bind(local_identifier)
        .bind(asset_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "assets",
            op = "link",
            asset_id = %asset_id,
            local_identifier,
            "Device reference linked to existing asset"
        );
        Ok(())
    }

    async fn known_local_identifiers(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT local_identifier FROM assets WHERE local_identifier IS NOT NULL \
             UNION \
             SELECT local_identifier FROM local_identifier_links",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(ids)
    }

    async fn last_server_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?")
                .bind(LAST_SERVER_SYNC_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| Error::Internal(format!("corrupt sync timestamp: {e}")))
            })
            .transpose()
    }

    async fn set_last_server_sync(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_state (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SERVER_SYNC_KEY)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{sample_device_asset, TestDatabase};

    #[tokio::test]
    async fn test_insert_fetch_roundtrip() {
        let db = TestDatabase::new().await;
        let repo = &db.db.assets;
        let mut record = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("IMG_1"));
        record.location = Some(Geolocation {
            latitude: 51.5,
            longitude: -0.12,
            altitude: None,
        });
        record.duration = Some(3.5);

        repo.insert(&record).await.unwrap();
        let fetched = repo.fetch(record.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.uuid, record.uuid);
        assert_eq!(fetched.location, record.location);
        assert_eq!(fetched.pixel_size, record.pixel_size);
        assert_eq!(fetched.import_status, ImportStage::Pending);
        assert_eq!(fetched.local_identifier.as_deref(), Some("IMG_1"));
        assert!(fetched.delete_status.is_none());
    }

    #[tokio::test]
    async fn test_field_setters() {
        let db = TestDatabase::new().await;
        let repo = &db.db.assets;
        let record = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("IMG_2"));
        repo.insert(&record).await.unwrap();

        repo.set_fingerprint(record.uuid, Some("fp")).await.unwrap();
        repo.set_import_status(record.uuid, ImportStage::FetchedFromIos)
            .await
            .unwrap();
        repo.set_delete_status(record.uuid, Some(DeleteState::DeletedFromServer))
            .await
            .unwrap();
        repo.set_remote_path(record.uuid, Quality::Low, Some("remote/low"))
            .await
            .unwrap();
        repo.set_cloud_filesize(record.uuid, 4096).await.unwrap();

        let fetched = repo.fetch(record.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.fingerprint.as_deref(), Some("fp"));
        assert_eq!(fetched.import_status, ImportStage::FetchedFromIos);
        assert_eq!(fetched.delete_status, Some(DeleteState::DeletedFromServer));
        assert_eq!(fetched.remote_path_low.as_deref(), Some("remote/low"));
        assert!(fetched.remote_path_original.is_none());
        assert_eq!(fetched.cloud_filesize, 4096);
    }

    #[tokio::test]
    async fn test_setter_on_missing_asset() {
        let db = TestDatabase::new().await;
        let id = Uuid::new_v4();
        let result = db.db.assets.set_imported(id, true).await;
        assert!(matches!(result, Err(Error::AssetNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_find_by_md5_excludes_self() {
        let db = TestDatabase::new().await;
        let repo = &db.db.assets;
        let a = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("A"));
        let b = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("B"));
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();
        repo.set_md5(a.uuid, Some("abc")).await.unwrap();

        assert_eq!(repo.find_by_md5("abc", a.uuid).await.unwrap(), None);
        assert_eq!(repo.find_by_md5("abc", b.uuid).await.unwrap(), Some(a.uuid));
    }

    #[tokio::test]
    async fn test_local_identifier_links() {
        let db = TestDatabase::new().await;
        let repo = &db.db.assets;
        let a = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("A"));
        repo.insert(&a).await.unwrap();
        repo.link_local_identifier("B", a.uuid).await.unwrap();

        assert_eq!(repo.find_by_local_identifier("A").await.unwrap(), Some(a.uuid));
        assert_eq!(repo.find_by_local_identifier("B").await.unwrap(), Some(a.uuid));
        assert_eq!(repo.find_by_local_identifier("C").await.unwrap(), None);

        let mut known = repo.known_local_identifiers().await.unwrap();
        known.sort();
        assert_eq!(known, vec!["A".to_string(), "B".to_string()]);

        repo.delete(a.uuid).await.unwrap();
        assert!(repo.known_local_identifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_queries() {
        let db = TestDatabase::new().await;
        let repo = &db.db.assets;
        let fresh = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("1"));
        let imported = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("2"));
        let deleted = AssetRecord::new_local(Uuid::new_v4(), &sample_device_asset("3"));
        for r in [&fresh, &imported, &deleted] {
            repo.insert(r).await.unwrap();
        }
        repo.set_imported(imported.uuid, true).await.unwrap();
        repo.set_deleted(deleted.uuid, true).await.unwrap();

        assert_eq!(repo.unimported_ids().await.unwrap(), vec![fresh.uuid]);
        assert_eq!(repo.deleted_pending_ids().await.unwrap(), vec![deleted.uuid]);
        assert_eq!(repo.missing_original_ids().await.unwrap(), vec![imported.uuid]);
    }

    #[tokio::test]
    async fn test_last_server_sync() {
        let db = TestDatabase::new().await;
        let repo = &db.db.assets;
        assert!(repo.last_server_sync().await.unwrap().is_none());

        let at = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        repo.set_last_server_sync(at).await.unwrap();
        assert_eq!(repo.last_server_sync().await.unwrap(), Some(at));
    }
}
