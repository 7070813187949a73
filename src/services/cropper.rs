//! Cut item images out of flyer pages.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::shard_dir;

/// Normalized units added around every bounding box.
pub const CROP_PADDING: f64 = 5.0;

/// Upper bound of the normalized coordinate space.
const NORMALIZED_MAX: f64 = 1000.0;

/// Errors that can occur while cropping.
#[derive(Debug, Error)]
pub enum CropError {
    #[error("invalid bounding box: {0:?}")]
    InvalidBox(Vec<f64>),

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("bounding box maps to an empty region")]
    EmptyRegion,

    #[error("failed to encode png: {0}")]
    Encode(#[source] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pixel rectangle, half-open on the max edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Map a normalized `[ymin, xmin, ymax, xmax]` box onto an image of the given
/// size: pad by [`CROP_PADDING`], clamp to `0..=1000`, scale with truncation,
/// clamp to the image bounds.
pub fn pixel_rect(bbox: [f64; 4], width: u32, height: u32) -> PixelRect {
    let clamp = |v: f64| v.clamp(0.0, NORMALIZED_MAX);
    let scale = |norm: f64, dim: u32| -> u32 {
        let px = (norm * f64::from(dim) / NORMALIZED_MAX) as i64;
        px.clamp(0, i64::from(dim)) as u32
    };

    let [ymin, xmin, ymax, xmax] = bbox;
    PixelRect {
        y_min: scale(clamp(ymin - CROP_PADDING), height),
        x_min: scale(clamp(xmin - CROP_PADDING), width),
        y_max: scale(clamp(ymax + CROP_PADDING), height),
        x_max: scale(clamp(xmax + CROP_PADDING), width),
    }
}

/// Crop `bbox` out of an encoded page image and write it as a PNG named by a
/// fresh UUID into a shard directory under `output_dir`. Returns the path.
pub fn crop_item(image_data: &[u8], bbox: &[f64], output_dir: &Path) -> Result<PathBuf, CropError> {
    let bbox: [f64; 4] = bbox
        .try_into()
        .map_err(|_| CropError::InvalidBox(bbox.to_vec()))?;

    let img = image::load_from_memory(image_data).map_err(CropError::Decode)?;
    let rect = pixel_rect(bbox, img.width(), img.height());
    if rect.is_empty() {
        return Err(CropError::EmptyRegion);
    }

    let cropped = img.crop_imm(rect.x_min, rect.y_min, rect.width(), rect.height());

    let filename = format!("{}.png", Uuid::new_v4());
    let dir = shard_dir(output_dir, &filename);
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(filename);
    cropped
        .save_with_format(&path, ImageFormat::Png)
        .map_err(CropError::Encode)?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn rect(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> PixelRect {
        PixelRect {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_pixel_rect_padding() {
        assert_eq!(
            pixel_rect([100.0, 100.0, 200.0, 200.0], 1000, 1000),
            rect(95, 95, 205, 205)
        );
    }

    #[test]
    fn test_pixel_rect_clamps_low_edge() {
        assert_eq!(pixel_rect([0.0, 0.0, 10.0, 10.0], 1000, 1000), rect(0, 0, 15, 15));
    }

    #[test]
    fn test_pixel_rect_clamps_high_edge() {
        assert_eq!(
            pixel_rect([995.0, 995.0, 1000.0, 1000.0], 1000, 1000),
            rect(990, 990, 1000, 1000)
        );
    }

    #[test]
    fn test_pixel_rect_scales_and_truncates() {
        // 1240x1754 page, typical flyer scan
        let r = pixel_rect([100.0, 100.0, 200.0, 200.0], 1240, 1754);
        assert_eq!(r, rect(117, 166, 254, 359));
    }

    #[test]
    fn test_crop_item_writes_sharded_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = crop_item(&jpeg(200, 100), &[100.0, 100.0, 200.0, 200.0], dir.path()).unwrap();

        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "png");
        // three shard levels between the root and the file
        let rel = path.strip_prefix(dir.path()).unwrap();
        assert_eq!(rel.components().count(), 4);

        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (22, 11));
    }

    #[test]
    fn test_crop_item_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            crop_item(&jpeg(10, 10), &[1.0, 2.0, 3.0], dir.path()),
            Err(CropError::InvalidBox(_))
        ));
        assert!(matches!(
            crop_item(b"not an image", &[0.0, 0.0, 10.0, 10.0], dir.path()),
            Err(CropError::Decode(_))
        ));
        // inverted box collapses to nothing
        assert!(matches!(
            crop_item(&jpeg(100, 100), &[600.0, 600.0, 100.0, 100.0], dir.path()),
            Err(CropError::EmptyRegion)
        ));
    }
}
