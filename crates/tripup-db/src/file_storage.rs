//! On-disk layout of physical assets and the filesystem disk backend.
//!
//! Layout under the data directory:
//!
//! ```text
//! {data}/assets/low/{uuid}        low-quality rendition (kept)
//! {data}/assets/original/{uuid}   original rendition (removed once uploaded)
//! {data}/tmp/{uuid}_{quality}     scratch files for in-flight transfers
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use tripup_core::defaults::{ASSETS_DIR, SCRATCH_DIR};
use tripup_core::{Quality, Result, StorageBackend};

/// Deterministic local paths for physical assets.
#[derive(Debug, Clone)]
pub struct AssetPaths {
    root: PathBuf,
}

impl AssetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical location of one rendition.
    pub fn local_path(&self, id: Uuid, quality: Quality) -> PathBuf {
        self.root
            .join(ASSETS_DIR)
            .join(quality.as_str())
            .join(id.to_string())
    }

    /// Scratch file for an in-flight transfer of one rendition.
    pub fn scratch_path(&self, id: Uuid, quality: Quality) -> PathBuf {
        self.scratch_dir().join(format!("{id}_{quality}"))
    }

    /// Scratch file with an arbitrary suffix (export, encrypt staging).
    pub fn scratch_file(&self, id: Uuid, suffix: &str) -> PathBuf {
        self.scratch_dir().join(format!("{id}_{suffix}"))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Create every directory of the layout.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for quality in Quality::ALL {
            fs::create_dir_all(self.root.join(ASSETS_DIR).join(quality.as_str())).await?;
        }
        fs::create_dir_all(self.scratch_dir()).await?;
        Ok(())
    }
}

/// Filesystem implementation of the disk contract. Paths are absolute.
#[derive(Debug, Clone, Default)]
pub struct FilesystemBackend;

impl FilesystemBackend {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "file_storage: create_dir_all failed");
                e
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        debug!(path = %path.display(), size = data.len(), "file_storage: write");
        Self::ensure_parent(path).await?;

        // Atomic write: temp file + rename
        let temp_path = path.with_extension("partial");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "file_storage: File::create failed");
            e
        })?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %path.display(), error = %e, "file_storage: rename failed");
            e
        })?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Self::ensure_parent(to).await?;
        fs::rename(from, to).await.map_err(|e| {
            warn!(from = %from.display(), to = %to.display(), error = %e, "file_storage: rename failed");
            e
        })?;
        Ok(())
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }
}

/// Lowercase hex MD5 of `data`, the content hash used for deduplication.
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
