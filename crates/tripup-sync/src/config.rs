//! Pipeline configuration.

use std::time::Duration;

use tripup_core::defaults;

/// Tunables for queuing, concurrency and media processing.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Assets handed to a single import operation.
    pub import_batch_size: usize,
    /// Import batches in flight per queuer.
    pub import_max_batches: usize,
    /// Assets imported per background run.
    pub background_import_limit: usize,
    /// Deadline for a background run to report back.
    pub background_timeout: Duration,
    /// Pause before a recoverable import or delete is resubmitted.
    pub recoverable_backoff: Duration,
    /// Whether new library items are imported automatically.
    pub auto_backup: bool,
    /// Soft capacity of the live-asset cache.
    pub cache_capacity: usize,
    /// Longest edge of the low-quality image rendition.
    pub low_quality_max_dimension: u32,
    pub import_queue_concurrency: usize,
    pub download_queue_concurrency: usize,
    pub delete_queue_concurrency: usize,
    /// Physical assets processed concurrently inside one operation.
    pub sub_operation_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            import_batch_size: defaults::IMPORT_BATCH_SIZE,
            import_max_batches: defaults::IMPORT_MAX_CONCURRENT_BATCHES,
            background_import_limit: defaults::BACKGROUND_IMPORT_LIMIT,
            background_timeout: Duration::from_secs(defaults::BACKGROUND_IMPORT_TIMEOUT_SECS),
            recoverable_backoff: Duration::from_millis(defaults::RECOVERABLE_BACKOFF_MS),
            auto_backup: defaults::AUTO_BACKUP_ENABLED,
            cache_capacity: defaults::CACHE_CAPACITY,
            low_quality_max_dimension: defaults::LOW_QUALITY_MAX_DIMENSION,
            import_queue_concurrency: defaults::IMPORT_QUEUE_CONCURRENCY,
            download_queue_concurrency: defaults::DOWNLOAD_QUEUE_CONCURRENCY,
            delete_queue_concurrency: defaults::DELETE_QUEUE_CONCURRENCY,
            sub_operation_concurrency: defaults::SUB_OPERATION_CONCURRENCY,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TRIPUP_IMPORT_BATCH_SIZE` | `5` | Assets per import operation |
    /// | `TRIPUP_IMPORT_MAX_BATCHES` | `3` | Import batches in flight per queuer |
    /// | `TRIPUP_BACKGROUND_IMPORT_LIMIT` | `100` | Assets per background run |
    /// | `TRIPUP_BACKGROUND_TIMEOUT_SECS` | `25` | Background run deadline |
    /// | `TRIPUP_RECOVERABLE_BACKOFF_MS` | `2000` | Pause before resubmitting |
    /// | `TRIPUP_AUTO_BACKUP` | `true` | Import new library items automatically |
    /// | `TRIPUP_CACHE_CAPACITY` | `500` | Live-asset cache soft capacity |
    /// | `TRIPUP_LOW_QUALITY_MAX_DIMENSION` | `1024` | Low-quality longest edge |
    pub fn from_env() -> Self {
        let base = Self::default();

        let auto_backup = std::env::var("TRIPUP_AUTO_BACKUP")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(base.auto_backup);

        Self {
            import_batch_size: env_parse::<usize>("TRIPUP_IMPORT_BATCH_SIZE")
                .unwrap_or(base.import_batch_size)
                .max(1),
            import_max_batches: env_parse::<usize>("TRIPUP_IMPORT_MAX_BATCHES")
                .unwrap_or(base.import_max_batches)
                .max(1),
            background_import_limit: env_parse("TRIPUP_BACKGROUND_IMPORT_LIMIT")
                .unwrap_or(base.background_import_limit),
            background_timeout: env_parse("TRIPUP_BACKGROUND_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.background_timeout),
            recoverable_backoff: env_parse("TRIPUP_RECOVERABLE_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.recoverable_backoff),
            auto_backup,
            cache_capacity: env_parse("TRIPUP_CACHE_CAPACITY").unwrap_or(base.cache_capacity),
            low_quality_max_dimension: env_parse("TRIPUP_LOW_QUALITY_MAX_DIMENSION")
                .unwrap_or(base.low_quality_max_dimension),
            ..base
        }
    }

    pub fn with_import_batch_size(mut self, size: usize) -> Self {
        self.import_batch_size = size.max(1);
        self
    }

    pub fn with_import_max_batches(mut self, batches: usize) -> Self {
        self.import_max_batches = batches.max(1);
        self
    }

    pub fn with_background_import_limit(mut self, limit: usize) -> Self {
        self.background_import_limit = limit;
        self
    }

    pub fn with_background_timeout(mut self, timeout: Duration) -> Self {
        self.background_timeout = timeout;
        self
    }

    pub fn with_recoverable_backoff(mut self, backoff: Duration) -> Self {
        self.recoverable_backoff = backoff;
        self
    }

    pub fn with_auto_backup(mut self, enabled: bool) -> Self {
        self.auto_backup = enabled;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_low_quality_max_dimension(mut self, dimension: u32) -> Self {
        self.low_quality_max_dimension = dimension;
        self
    }

    /// Set the concurrency of the import, download and delete queues.
    pub fn with_queue_concurrency(mut self, import: usize, download: usize, delete: usize) -> Self {
        self.import_queue_concurrency = import.max(1);
        self.download_queue_concurrency = download.max(1);
        self.delete_queue_concurrency = delete.max(1);
        self
    }

    pub fn with_sub_operation_concurrency(mut self, concurrency: usize) -> Self {
        self.sub_operation_concurrency = concurrency.max(1);
        self
    }
}
