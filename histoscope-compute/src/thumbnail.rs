//! Downsampled 8-bit previews for data browsers.

use histoscope_core::{ImageData, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for thumbnail generation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThumbnailConfig {
    /// Bounding box the thumbnail is fitted into.
    pub width: usize,
    pub height: usize,
    /// Data range mapped to black..white; the finite data range when `None`.
    pub display_range: Option<(f64, f64)>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 72,
            height: 72,
            display_range: None,
        }
    }
}

impl ThumbnailConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_display_range(mut self, range: Option<(f64, f64)>) -> Self {
        self.display_range = range;
        self
    }
}

/// Grayscale preview image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Thumbnail {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Thumbnail {
    /// Nearest-neighbour downsample of `image` into the configured box,
    /// preserving aspect ratio. Images smaller than the box keep their size.
    ///
    /// Returns `Ok(None)` for empty images, a zero-sized box, or when no
    /// display range can be determined.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::unnecessary_wraps
    )]
    pub fn compute(image: &ImageData, config: &ThumbnailConfig) -> Result<Option<Self>> {
        if image.is_empty() || config.width == 0 || config.height == 0 {
            return Ok(None);
        }
        let range = config.display_range.or_else(|| {
            image
                .finite_range()
                .map(|(lo, hi)| (f64::from(lo), f64::from(hi)))
        });
        let Some((lo, hi)) = range else {
            return Ok(None);
        };

        let (src_w, src_h) = (image.width(), image.height());
        let scale = (config.width as f64 / src_w as f64)
            .min(config.height as f64 / src_h as f64)
            .min(1.0);
        let width = ((src_w as f64 * scale).round() as usize).max(1);
        let height = ((src_h as f64 * scale).round() as usize).max(1);

        let span = hi - lo;
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            let sy = (((y as f64 + 0.5) * src_h as f64 / height as f64) as usize).min(src_h - 1);
            for x in 0..width {
                let sx = (((x as f64 + 0.5) * src_w as f64 / width as f64) as usize).min(src_w - 1);
                let v = f64::from(image.pixels()[sy * src_w + sx]);
                let level = if !v.is_finite() || span <= 0.0 {
                    0.0
                } else {
                    ((v - lo) / span).clamp(0.0, 1.0) * 255.0
                };
                pixels.push(level.round() as u8);
            }
        }

        Ok(Some(Self {
            width,
            height,
            pixels,
        }))
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_aspect() {
        let image = ImageData::from_fn(200, 100, |x, _| x as f32);
        let t = Thumbnail::compute(&image, &ThumbnailConfig::new().with_size(50, 50))
            .unwrap()
            .unwrap();
        assert_eq!((t.width(), t.height()), (50, 25));
        assert_eq!(t.pixels().len(), 50 * 25);
    }

    #[test]
    fn test_small_image_not_upscaled() {
        let image = ImageData::from_fn(4, 2, |x, _| x as f32);
        let t = Thumbnail::compute(&image, &ThumbnailConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!((t.width(), t.height()), (4, 2));
        assert_eq!(&t.pixels()[..4], &[0, 85, 170, 255]);
    }

    #[test]
    fn test_display_range_clamps() {
        let image = ImageData::new(3, 1, vec![0.0, 5.0, 10.0]).unwrap();
        let config = ThumbnailConfig::new().with_display_range(Some((4.0, 6.0)));
        let t = Thumbnail::compute(&image, &config).unwrap().unwrap();
        assert_eq!(t.pixels(), &[0, 128, 255]);
    }

    #[test]
    fn test_empty_image_has_no_thumbnail() {
        let image = ImageData::new(0, 0, Vec::new()).unwrap();
        assert!(Thumbnail::compute(&image, &ThumbnailConfig::default())
            .unwrap()
            .is_none());
    }
}
