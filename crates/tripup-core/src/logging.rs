//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields so
//! a log pipeline can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Risk of data loss, requires attention |
//! | WARN  | Recoverable failure, automatic retry applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, state transitions, queue suspension |
//! | TRACE | Per-asset iteration inside a batch |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "sync", "db", "crypto", "api", "storage", "library"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "manager", "queue", "import", "queuer", "tracker", "cache"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "fetch_from_ios", "upload", "create_on_server"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Asset UUID being operated on.
pub const ASSET_ID: &str = "asset_id";

/// Composite operation UUID.
pub const OPERATION_ID: &str = "operation_id";

/// Quality tier ("low" or "original").
pub const QUALITY: &str = "quality";

/// Operation queue name ("import", "download", "delete").
pub const QUEUE: &str = "queue";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of assets in a batch.
pub const BATCH_SIZE: &str = "batch_size";

/// Byte length of a file moved through the pipeline.
pub const BYTES: &str = "bytes";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Import stage reached.
pub const STAGE: &str = "stage";

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
