//! # tripup-sync
//!
//! Asset import, upload, download and delete pipeline for TripUp.
//!
//! This crate provides:
//! - Priority operation queues with dependencies, suspension and cancellation
//! - The import pipeline (key, fetch, compress, encrypt, upload, create) with
//!   per-asset fatal isolation and resumable stages
//! - Delete, download and late-original upload operations
//! - The asset manager that owns queue policy and operation bookkeeping
//! - The model controller applying library scans and server deltas
//! - Sync progress tracking and change events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tripup_sync::{AssetManager, ModelController, SyncConfig, SyncServices};
//!
//! let manager = AssetManager::start(services, SyncConfig::from_env(), monitor);
//! manager.load_and_start_queues().await?;
//!
//! let controller = ModelController::new(manager.clone(), owner_id);
//! let added = controller.sync_photo_library().await?;
//!
//! let mut events = controller.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event.payload);
//! }
//!
//! manager.shutdown().await?;
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod keychain;
pub mod manager;
pub mod operations;
pub mod queue;
pub mod queuing;
pub mod registry;
pub mod sub_operations;
pub mod testing;
pub mod tracker;

// Re-export core types
pub use tripup_core::*;

pub use config::SyncConfig;
pub use context::{SyncContext, SyncServices};
pub use controller::{ModelController, ServerSyncSummary};
pub use keychain::Keychain;
pub use manager::AssetManager;
pub use operations::{
    AssetDeleteOperation, AssetDownloadOperation, AssetImportOperation, AssetUploadOperation,
};
pub use queue::{OperationHandle, OperationOutcome, OperationQueue, QueuePriority, QueuedOperation};
pub use queuing::{AssetImportQueuingOperation, ImportQueuingDelegate};
pub use registry::{OperationKind, OperationRegistry};
pub use tracker::{AssetSyncTracker, SyncProgress, SyncSubscription};
