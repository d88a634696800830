//! Key material table, indexed by fingerprint.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use tripup_core::{Error, KeyRepository, Result};

/// SQLite implementation of [`KeyRepository`].
#[derive(Clone)]
pub struct SqliteKeyRepository {
    pool: SqlitePool,
}

impl SqliteKeyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyRepository for SqliteKeyRepository {
    /// Store key material. Re-inserting the same fingerprint replaces it.
    async fn insert_key(&self, fingerprint: &str, key: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO asset_keys (fingerprint, key) VALUES (?, ?)
            ON CONFLICT (fingerprint) DO UPDATE SET key = excluded.key
            "#,
        )
        .bind(fingerprint)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(subsystem = "db", component = "keys", op = "insert", fingerprint, "Key stored");
        Ok(())
    }

    async fn key(&self, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        let key: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT key FROM asset_keys WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(key)
    }

    /// Remove key material. Missing fingerprints are not an error.
    async fn delete_key(&self, fingerprint: &str) -> Result<()> {
        sqlx::query("DELETE FROM asset_keys WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::TestDatabase;

    #[tokio::test]
    async fn test_insert_get_delete_key() {
        let db = TestDatabase::new().await;
        let keys = &db.db.keys;

        keys.insert_key("fp1", &[1, 2, 3]).await.unwrap();
        assert_eq!(keys.key("fp1").await.unwrap(), Some(vec![1, 2, 3]));

        keys.insert_key("fp1", &[4, 5]).await.unwrap();
        assert_eq!(keys.key("fp1").await.unwrap(), Some(vec![4, 5]));

        keys.delete_key("fp1").await.unwrap();
        assert_eq!(keys.key("fp1").await.unwrap(), None);
        keys.delete_key("fp1").await.unwrap();
    }
}
