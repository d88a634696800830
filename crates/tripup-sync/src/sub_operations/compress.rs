//! Low-quality rendition generation.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::ImageResult;
use tracing::debug;

use tripup_core::defaults::LOW_QUALITY_JPEG_QUALITY;
use tripup_core::{AssetType, Quality};
use tripup_db::MutableAsset;

use super::{run_batch, OperationControl, SubOperationError, SubResult};
use crate::context::SyncContext;

/// Produce the low-quality rendition of each asset from its local original.
pub async fn compress(
    ctx: &SyncContext,
    control: &OperationControl,
    assets: Vec<Arc<MutableAsset>>,
) -> Vec<(Arc<MutableAsset>, SubResult<()>)> {
    run_batch(assets, control, ctx.config.sub_operation_concurrency, |asset| {
        compress_one(ctx, asset)
    })
    .await
}

pub(crate) async fn compress_one(ctx: &SyncContext, asset: Arc<MutableAsset>) -> SubResult<()> {
    let low = asset.physical(Quality::Low).local_path().to_path_buf();
    if ctx.disk.exists(&low).await? {
        return Ok(());
    }
    let original = asset.physical(Quality::Original).local_path().to_path_buf();
    let max_dimension = ctx.config.low_quality_max_dimension;

    match asset.asset_type() {
        AssetType::Photo => {
            let data = ctx.disk.read(&original).await?;
            let rendered = tokio::task::spawn_blocking(move || downsample_jpeg(&data, max_dimension))
                .await
                .map_err(|e| SubOperationError::Recoverable(e.to_string()))?;
            let bytes = match rendered {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(
                        subsystem = "sync",
                        component = "compress",
                        asset_id = %asset.uuid(),
                        error = %e,
                        "Original not decodable, using library thumbnail"
                    );
                    let Some(local_identifier) = asset.local_identifier() else {
                        return Err(SubOperationError::Fatal(asset.uuid()));
                    };
                    ctx.library.thumbnail(&local_identifier, max_dimension).await?
                }
            };
            ctx.disk.write(&low, &bytes).await?;
        }
        AssetType::Video => {
            ctx.library.compress_video(&original, &low).await?;
        }
        AssetType::Audio | AssetType::Unknown => {
            let data = ctx.disk.read(&original).await?;
            ctx.disk.write(&low, &data).await?;
        }
    }
    Ok(())
}

/// Decode an image, fit it within `max_dimension` and re-encode it as JPEG.
///
/// Images already within bounds keep their size.
pub fn downsample_jpeg(data: &[u8], max_dimension: u32) -> ImageResult<Vec<u8>> {
    let image = image::load_from_memory(data)?;
    let image = if image.width() > max_dimension || image.height() > max_dimension {
        image.thumbnail(max_dimension, max_dimension)
    } else {
        image
    };

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, LOW_QUALITY_JPEG_QUALITY);
    encoder.encode_image(&image.to_rgb8())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, image::Rgb([200, 40, 90]));
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_downsample_preserves_aspect() {
        let jpeg = downsample_jpeg(&png(2048, 1024), 1024).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (1024, 512));
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_small_image_keeps_size() {
        let jpeg = downsample_jpeg(&png(300, 200), 1024).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (300, 200));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(downsample_jpeg(b"not an image", 1024).is_err());
    }
}
