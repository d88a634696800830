//! Test fixtures for database-backed tests.
//!
//! Always compiled so integration tests in other crates can build an
//! in-memory database with the full schema.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tripup_db::test_fixtures::{sample_device_asset, TestDatabase};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let test_db = TestDatabase::new().await;
//!     let record = AssetRecord::new_local(owner, &sample_device_asset("IMG_0001"));
//!     test_db.db.assets.insert(&record).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use tripup_core::{AssetRepository, AssetType, DeviceAsset, KeyRepository, PixelSize};

use crate::Database;

/// Fresh in-memory database with the schema applied.
pub struct TestDatabase {
    pub db: Database,
}

impl TestDatabase {
    /// # Panics
    ///
    /// Panics if the in-memory database cannot be created.
    pub async fn new() -> Self {
        let db = Database::in_memory()
            .await
            .expect("in-memory database should open");
        Self { db }
    }

    pub fn asset_repository(&self) -> Arc<dyn AssetRepository> {
        self.db.assets.clone()
    }

    pub fn key_repository(&self) -> Arc<dyn KeyRepository> {
        self.db.keys.clone()
    }
}

/// A photo as the device library would describe it.
pub fn sample_device_asset(local_identifier: &str) -> DeviceAsset {
    DeviceAsset {
        local_identifier: local_identifier.to_string(),
        asset_type: AssetType::Photo,
        creation_date: Utc.with_ymd_and_hms(2024, 7, 14, 9, 30, 0).single(),
        location: None,
        pixel_size: PixelSize {
            width: 4032,
            height: 3024,
        },
        duration: None,
        favourite: false,
    }
}

/// A video as the device library would describe it.
pub fn sample_device_video(local_identifier: &str) -> DeviceAsset {
    DeviceAsset {
        asset_type: AssetType::Video,
        duration: Some(12.5),
        pixel_size: PixelSize {
            width: 1920,
            height: 1080,
        },
        ..sample_device_asset(local_identifier)
    }
}
