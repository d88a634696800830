//! Photo library backed by a plain directory.
//!
//! Each regular file directly inside the directory is one library item; its
//! file name is the local identifier. Media kind and UTI come from the file
//! extension, photo dimensions from the image header.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use tripup_core::defaults::MPEG4_UTI;
use tripup_core::{
    AssetType, DeviceAsset, Error, ExportedResource, PhotoLibrary, PixelSize, Result,
    StorageBackend,
};
use tripup_sync::sub_operations::compress::downsample_jpeg;

/// Media kind and uniform type identifier for a file extension.
fn classify(path: &Path) -> (AssetType, Option<&'static str>) {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => (AssetType::Photo, Some("public.jpeg")),
        "png" => (AssetType::Photo, Some("public.png")),
        "heic" => (AssetType::Photo, Some("public.heic")),
        "gif" => (AssetType::Photo, Some("com.compuserve.gif")),
        "webp" => (AssetType::Photo, Some("org.webmproject.webp")),
        "tif" | "tiff" => (AssetType::Photo, Some("public.tiff")),
        "mp4" | "m4v" => (AssetType::Video, Some(MPEG4_UTI)),
        "mov" => (AssetType::Video, Some("com.apple.quicktime-movie")),
        "m4a" => (AssetType::Audio, Some("com.apple.m4a-audio")),
        "mp3" => (AssetType::Audio, Some("public.mp3")),
        "wav" => (AssetType::Audio, Some("com.microsoft.waveform-audio")),
        _ => (AssetType::Unknown, None),
    }
}

/// [`PhotoLibrary`] over the files of one directory.
pub struct DirectoryPhotoLibrary {
    root: PathBuf,
    disk: Arc<dyn StorageBackend>,
}

impl DirectoryPhotoLibrary {
    pub fn new(root: impl Into<PathBuf>, disk: Arc<dyn StorageBackend>) -> Self {
        Self {
            root: root.into(),
            disk,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a local identifier to a file inside the library directory.
    fn item_path(&self, local_identifier: &str) -> Result<PathBuf> {
        let valid = !local_identifier.is_empty()
            && !local_identifier.starts_with('.')
            && !local_identifier.contains(['/', '\\']);
        if !valid {
            return Err(Error::InvalidInput(format!(
                "invalid local identifier: {local_identifier}"
            )));
        }
        Ok(self.root.join(local_identifier))
    }

    async fn pixel_size(path: &Path) -> PixelSize {
        let owned = path.to_path_buf();
        let dimensions = tokio::task::spawn_blocking(move || image::image_dimensions(&owned)).await;
        match dimensions {
            Ok(Ok((width, height))) => PixelSize { width, height },
            Ok(Err(e)) => {
                debug!(path = %path.display(), error = %e, "Could not read image dimensions");
                PixelSize::default()
            }
            Err(e) => {
                warn!(error = %e, "Dimension probe task failed");
                PixelSize::default()
            }
        }
    }
}

#[async_trait]
impl PhotoLibrary for DirectoryPhotoLibrary {
    async fn local_identifiers(&self) -> Result<Vec<String>> {
        let mut identifiers = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "Photo library directory does not exist");
                return Ok(identifiers);
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    identifiers.push(name.to_string());
                }
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    async fn fetch(&self, local_identifier: &str) -> Result<Option<DeviceAsset>> {
        let path = self.item_path(local_identifier)?;
        let metadata = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (asset_type, _) = classify(&path);
        let pixel_size = match asset_type {
            AssetType::Photo => Self::pixel_size(&path).await,
            _ => PixelSize::default(),
        };
        let creation_date = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(Some(DeviceAsset {
            local_identifier: local_identifier.to_string(),
            asset_type,
            creation_date,
            location: None,
            pixel_size,
            duration: None,
            favourite: false,
        }))
    }

    async fn export_original(
        &self,
        local_identifier: &str,
        to: &Path,
    ) -> Result<ExportedResource> {
        let path = self.item_path(local_identifier)?;
        let data = self.disk.read(&path).await.map_err(|e| {
            Error::PhotoLibrary(format!("failed to export {local_identifier}: {e}"))
        })?;
        self.disk.write(to, &data).await?;

        // Containers other than MP4 count as transcoded; the bytes are copied as is.
        Ok(match classify(&path) {
            (AssetType::Video, Some(uti)) if uti != MPEG4_UTI => ExportedResource {
                uti: MPEG4_UTI.to_string(),
                transcoded: true,
            },
            (_, uti) => ExportedResource {
                uti: uti.unwrap_or("public.data").to_string(),
                transcoded: false,
            },
        })
    }

    async fn compress_video(&self, source: &Path, to: &Path) -> Result<()> {
        // No encoder available; the low rendition is the source itself.
        let data = self.disk.read(source).await?;
        self.disk.write(to, &data).await
    }

    async fn thumbnail(&self, local_identifier: &str, max_dimension: u32) -> Result<Vec<u8>> {
        let path = self.item_path(local_identifier)?;
        let (asset_type, _) = classify(&path);
        if asset_type != AssetType::Photo {
            return Err(Error::PhotoLibrary(format!(
                "no thumbnail for {asset_type} item {local_identifier}"
            )));
        }
        let data = self.disk.read(&path).await?;
        tokio::task::spawn_blocking(move || downsample_jpeg(&data, max_dimension))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .map_err(|e| Error::PhotoLibrary(format!("thumbnail failed: {e}")))
    }

    async fn delete(&self, local_identifiers: &[String]) -> Result<()> {
        for local_identifier in local_identifiers {
            let path = self.item_path(local_identifier)?;
            self.disk.delete(&path).await?;
            debug!(local_identifier = %local_identifier, "Removed library item");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;
    use tripup_db::FilesystemBackend;

    fn library(dir: &TempDir) -> DirectoryPhotoLibrary {
        DirectoryPhotoLibrary::new(dir.path(), Arc::new(FilesystemBackend::new()))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(
            classify(Path::new("a.JPG")),
            (AssetType::Photo, Some("public.jpeg"))
        );
        assert_eq!(classify(Path::new("b.mp4")), (AssetType::Video, Some(MPEG4_UTI)));
        assert_eq!(classify(Path::new("c.m4a")).0, AssetType::Audio);
        assert_eq!(classify(Path::new("notes.txt")), (AssetType::Unknown, None));
    }

    #[tokio::test]
    async fn test_lists_regular_files_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a.mov"), b"x").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("album")).unwrap();

        let ids = library(&dir).local_identifiers().await.unwrap();
        assert_eq!(ids, vec!["a.mov".to_string(), "b.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let lib = DirectoryPhotoLibrary::new(
            dir.path().join("missing"),
            Arc::new(FilesystemBackend::new()),
        );
        assert!(lib.local_identifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_reads_dimensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("IMG_1.png"), png(40, 30)).unwrap();

        let item = library(&dir).fetch("IMG_1.png").await.unwrap().unwrap();
        assert_eq!(item.asset_type, AssetType::Photo);
        assert_eq!(item.pixel_size, PixelSize { width: 40, height: 30 });
        assert!(item.creation_date.is_some());
        assert!(library(&dir).fetch("gone.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_library() {
        let dir = TempDir::new().unwrap();
        let err = library(&dir).fetch("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_export_copies_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"video bytes").unwrap();
        let target = dir.path().join("out").join("clip");

        let exported = library(&dir)
            .export_original("clip.mp4", &target)
            .await
            .unwrap();
        assert_eq!(exported.uti, MPEG4_UTI);
        assert!(!exported.transcoded);
        assert_eq!(std::fs::read(&target).unwrap(), b"video bytes");
    }

    #[tokio::test]
    async fn test_export_marks_quicktime_transcoded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mov"), b"mov bytes").unwrap();

        let exported = library(&dir)
            .export_original("clip.mov", &dir.path().join("clip_out"))
            .await
            .unwrap();
        assert_eq!(exported.uti, MPEG4_UTI);
        assert!(exported.transcoded);
    }

    #[tokio::test]
    async fn test_thumbnail_is_bounded_jpeg() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.png"), png(300, 100)).unwrap();

        let thumb = library(&dir).thumbnail("big.png", 60).await.unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (60, 20));
        assert_eq!(image::guess_format(&thumb).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_delete_removes_items() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        let lib = library(&dir);

        lib.delete(&["a.jpg".to_string()]).await.unwrap();
        assert!(!dir.path().join("a.jpg").exists());
        assert!(lib.local_identifiers().await.unwrap().is_empty());
    }
}
