//! Schema creation.
//!
//! Statements are idempotent so `migrate` runs on every start.

use sqlx::SqlitePool;
use tracing::info;

use tripup_core::{Error, Result};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        uuid TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        asset_type TEXT NOT NULL,
        creation_date TEXT,
        latitude REAL,
        longitude REAL,
        altitude REAL,
        pixel_width INTEGER NOT NULL DEFAULT 0,
        pixel_height INTEGER NOT NULL DEFAULT 0,
        duration REAL,
        imported INTEGER NOT NULL DEFAULT 0,
        favourite INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        md5 TEXT,
        fingerprint TEXT,
        local_identifier TEXT,
        original_uti TEXT,
        import_status TEXT NOT NULL DEFAULT 'pending',
        delete_status TEXT,
        cloud_filesize INTEGER NOT NULL DEFAULT 0,
        remote_path_low TEXT,
        remote_path_original TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_assets_md5 ON assets (md5)",
    "CREATE INDEX IF NOT EXISTS idx_assets_local_identifier ON assets (local_identifier)",
    r#"
    CREATE TABLE IF NOT EXISTS asset_keys (
        fingerprint TEXT PRIMARY KEY NOT NULL,
        key BLOB NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS local_identifier_links (
        local_identifier TEXT PRIMARY KEY NOT NULL,
        asset_id TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_links_asset_id ON local_identifier_links (asset_id)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )
    "#,
];

/// Create every table and index.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
    }
    info!(
        subsystem = "db",
        component = "schema",
        op = "migrate",
        statements = STATEMENTS.len(),
        "Schema ready"
    );
    Ok(())
}
