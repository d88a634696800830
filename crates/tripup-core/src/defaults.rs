//! Centralized default constants for the TripUp sync core.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration types in other crates start from these constants and only
//! override them from the environment.

// =============================================================================
// IMPORT QUEUING
// =============================================================================

/// Number of assets handed to a single import operation.
pub const IMPORT_BATCH_SIZE: usize = 5;

/// Maximum import batches in flight per queuer.
pub const IMPORT_MAX_CONCURRENT_BATCHES: usize = 3;

/// Maximum assets imported by one background task run.
pub const BACKGROUND_IMPORT_LIMIT: usize = 100;

/// Deadline for a background import run to report back, in seconds.
///
/// The OS grants background tasks roughly 30 seconds; this leaves headroom.
pub const BACKGROUND_IMPORT_TIMEOUT_SECS: u64 = 25;

/// Pause before a recoverable import batch is resubmitted, in milliseconds.
pub const RECOVERABLE_BACKOFF_MS: u64 = 2_000;

/// Whether auto-backup is enabled on first launch.
pub const AUTO_BACKUP_ENABLED: bool = true;

// =============================================================================
// OPERATION QUEUES
// =============================================================================

/// Concurrent operations on the import queue.
pub const IMPORT_QUEUE_CONCURRENCY: usize = 3;

/// Concurrent operations on the download queue.
pub const DOWNLOAD_QUEUE_CONCURRENCY: usize = 4;

/// Concurrent operations on the delete queue.
pub const DELETE_QUEUE_CONCURRENCY: usize = 2;

/// Physical assets transferred concurrently inside one composite operation.
pub const SUB_OPERATION_CONCURRENCY: usize = 4;

// =============================================================================
// CACHE
// =============================================================================

/// Soft capacity of the live-asset cache.
pub const CACHE_CAPACITY: usize = 500;

// =============================================================================
// MEDIA
// =============================================================================

/// Longest edge, in pixels, of the low-quality image rendition.
pub const LOW_QUALITY_MAX_DIMENSION: u32 = 1024;

/// JPEG quality of the low-quality image rendition.
pub const LOW_QUALITY_JPEG_QUALITY: u8 = 80;

/// Uniform type identifier recorded for low-quality image renditions.
pub const LOW_QUALITY_IMAGE_UTI: &str = "public.jpeg";

/// Uniform type identifier recorded for transcoded videos.
pub const MPEG4_UTI: &str = "public.mpeg-4";

// =============================================================================
// STORAGE LAYOUT
// =============================================================================

/// Directory (under the data dir) holding one file per asset and quality.
pub const ASSETS_DIR: &str = "assets";

/// Directory (under the data dir) for in-flight encrypted transfers.
pub const SCRATCH_DIR: &str = "tmp";

/// SQLite database file name (under the data dir).
pub const DATABASE_FILE: &str = "tripup.sqlite";

// =============================================================================
// EVENTS
// =============================================================================

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// HTTP
// =============================================================================

/// Timeout for REST API requests in seconds.
pub const API_TIMEOUT_SECS: u64 = 30;

/// Timeout for cloud blob transfers in seconds.
pub const TRANSFER_TIMEOUT_SECS: u64 = 300;
