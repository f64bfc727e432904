//! Image preparation for the multimodal backend.
//!
//! Resizes to a fixed width keeping the aspect ratio, then splits the
//! interleaved RGBA pixels into three planes (alpha is dropped).

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use llamart_core::error::ImageError;
use llamart_core::image::PlanarRgbImage;
use std::path::Path;
use tracing::debug;

/// Width the multimodal encoder expects.
pub const DEFAULT_TARGET_WIDTH: u32 = 336;

/// Tallest resized image accepted unless configured otherwise.
pub const DEFAULT_MAX_HEIGHT: u32 = 4096;

/// Converts source bitmaps into [`PlanarRgbImage`]s of a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePreprocessor {
    target_width: u32,
    max_height: u32,
}

impl ImagePreprocessor {
    pub fn new(target_width: u32) -> Self {
        Self {
            target_width: target_width.max(1),
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = max_height.max(1);
        self
    }

    pub fn target_width(&self) -> u32 {
        self.target_width
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    /// Output size for a source, or the reason it cannot be prepared.
    ///
    /// Cheap: looks at dimensions only, nothing is allocated.
    pub fn output_size(&self, source_width: u32, source_height: u32) -> Result<(u32, u32), ImageError> {
        if source_width == 0 || source_height == 0 {
            return Err(ImageError::NoPixelBuffer);
        }
        let resized = self.target_height(source_width, source_height);
        if resized > self.max_height {
            return Err(ImageError::TooLarge {
                width: source_width,
                height: source_height,
                resized,
                max: self.max_height,
            });
        }
        Ok((self.target_width, resized))
    }

    /// Height after an aspect-preserving resize to the target width.
    pub fn target_height(&self, source_width: u32, source_height: u32) -> u32 {
        let scaled = u64::from(self.target_width) * u64::from(source_height) / u64::from(source_width.max(1));
        u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
    }

    /// Resize and de-interleave a decoded image.
    ///
    /// Nearest-neighbour sampling keeps the output deterministic.
    pub fn prepare(&self, source: &DynamicImage) -> Result<PlanarRgbImage, ImageError> {
        self.output_size(source.width(), source.height())?;
        self.prepare_rgba(&source.to_rgba8())
    }

    /// Same as [`prepare`](Self::prepare) for a raw RGBA buffer.
    pub fn prepare_raw(&self, width: u32, height: u32, rgba: Vec<u8>) -> Result<PlanarRgbImage, ImageError> {
        let bitmap = RgbaImage::from_raw(width, height, rgba).ok_or(ImageError::NoPixelBuffer)?;
        self.prepare_rgba(&bitmap)
    }

    /// Decode an image file and prepare it.
    pub fn prepare_path(&self, path: &Path) -> Result<PlanarRgbImage, ImageError> {
        let source = image::open(path)
            .map_err(|e| ImageError::Decode(format!("{}: {e}", path.display())))?;
        self.prepare(&source)
    }

    fn prepare_rgba(&self, bitmap: &RgbaImage) -> Result<PlanarRgbImage, ImageError> {
        let (source_width, source_height) = bitmap.dimensions();
        let (width, height) = self.output_size(source_width, source_height)?;
        let resized = imageops::resize(bitmap, width, height, FilterType::Nearest);

        let plane = (width as usize) * (height as usize);
        let mut planes = vec![0u8; plane * 3];
        for (index, pixel) in resized.pixels().enumerate() {
            let [r, g, b, _alpha] = pixel.0;
            planes[index] = r;
            planes[plane + index] = g;
            planes[2 * plane + index] = b;
        }

        debug!(source_width, source_height, width, height, "Image prepared");
        PlanarRgbImage::from_planes(width, height, planes)
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_WIDTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn height_keeps_aspect_ratio() {
        let pre = ImagePreprocessor::default();
        assert_eq!(pre.target_height(672, 448), 224);
        assert_eq!(pre.target_height(336, 336), 336);
        assert_eq!(pre.target_height(10_000, 1), 1);
    }

    #[test]
    fn tall_image_is_too_large() {
        let pre = ImagePreprocessor::default();
        let err = pre.output_size(1, 10_000).unwrap_err();
        assert!(matches!(
            err,
            ImageError::TooLarge { resized: 3_360_000, max: DEFAULT_MAX_HEIGHT, .. }
        ));
        assert_eq!(err.code(), "image.too_large");

        // Rejected before the source is converted or resized.
        let strip = DynamicImage::ImageRgba8(RgbaImage::new(1, 10_000));
        assert!(matches!(pre.prepare(&strip), Err(ImageError::TooLarge { .. })));
    }

    #[test]
    fn height_limit_is_inclusive() {
        let pre = ImagePreprocessor::new(4).with_max_height(6);
        assert_eq!(pre.output_size(2, 3).unwrap(), (4, 6));
        assert!(pre.output_size(2, 4).is_err());
    }

    #[test]
    fn splits_channels_into_planes_and_drops_alpha() {
        let pre = ImagePreprocessor::new(2);
        let source = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([10, 20, 30, 0])
            } else {
                Rgba([40, 50, 60, 255])
            }
        });
        let image = pre.prepare(&DynamicImage::ImageRgba8(source)).unwrap();
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(image.planes(), &[10, 40, 20, 50, 30, 60]);
        assert_eq!(image.red(), &[10, 40]);
        assert_eq!(image.blue(), &[30, 60]);
    }

    #[test]
    fn downscales_to_target_width() {
        let pre = ImagePreprocessor::new(4);
        let source = RgbaImage::from_pixel(8, 6, Rgba([1, 2, 3, 4]));
        let image = pre.prepare(&DynamicImage::ImageRgba8(source)).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
        assert_eq!(image.planes().len(), 3 * 4 * 3);
        assert!(image.green().iter().all(|&g| g == 2));
    }

    #[test]
    fn prepare_is_deterministic() {
        let pre = ImagePreprocessor::new(5);
        let source = DynamicImage::ImageRgba8(RgbaImage::from_fn(13, 7, |x, y| {
            Rgba([(x * 19) as u8, (y * 31) as u8, (x + y) as u8, 255])
        }));
        assert_eq!(pre.prepare(&source).unwrap(), pre.prepare(&source).unwrap());
    }

    #[test]
    fn empty_bitmap_has_no_pixel_buffer() {
        let pre = ImagePreprocessor::default();
        let empty = DynamicImage::ImageRgba8(RgbaImage::new(0, 0));
        assert!(matches!(pre.prepare(&empty), Err(ImageError::NoPixelBuffer)));
    }

    #[test]
    fn short_raw_buffer_has_no_pixel_buffer() {
        let pre = ImagePreprocessor::default();
        let err = pre.prepare_raw(4, 4, vec![0; 7]).unwrap_err();
        assert_eq!(err.code(), "image.no_pixel_buffer");
    }

    #[test]
    fn undecodable_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = ImagePreprocessor::default().prepare_path(&path).unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn decodes_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.png");
        RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255])).save(&path).unwrap();
        let image = ImagePreprocessor::new(2).prepare_path(&path).unwrap();
        assert_eq!(image.red(), &[9, 9, 9, 9]);
    }
}
