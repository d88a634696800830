//! # tripup-db
//!
//! SQLite persistence layer for TripUp asset sync.
//!
//! This crate provides:
//! - Connection pool management and schema creation
//! - Repository implementations for assets and key material
//! - The live-asset cache holding one `MutableAsset` per uuid
//! - The on-disk layout of physical assets and the filesystem backend
//!
//! ## Example
//!
//! ```rust,ignore
//! use tripup_db::Database;
//!
//! let db = Database::connect("sqlite://tripup.sqlite").await?;
//! let pending = db.assets.unimported_ids().await?;
//! ```

pub mod assets;
pub mod cache;
pub mod file_storage;
pub mod keys;
pub mod mutable_asset;
pub mod pool;
pub mod schema;

// Test fixtures for integration tests
pub mod test_fixtures;

use std::sync::Arc;

use sqlx::SqlitePool;

pub use tripup_core::*;

pub use assets::SqliteAssetRepository;
pub use cache::{AssetCache, EvictionPolicy};
pub use file_storage::{compute_md5, AssetPaths, FilesystemBackend};
pub use keys::SqliteKeyRepository;
pub use mutable_asset::{MutableAsset, MutablePhysicalAsset, PhysicalAssetRef};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: SqlitePool,
    /// Asset records, local-identifier links and sync state.
    pub assets: Arc<SqliteAssetRepository>,
    /// Per-asset key material.
    pub keys: Arc<SqliteKeyRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            assets: Arc::new(SqliteAssetRepository::new(pool.clone())),
            keys: Arc::new(SqliteKeyRepository::new(pool.clone())),
            pool,
        }
    }

    /// Connect to the given URL and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        schema::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(pool::MEMORY_URL).await
    }
}
