//! Raw image data supplied by subjects.

use std::path::Path;

use crate::{Error, Result};

/// A 2D single-channel image stored row-major as `f32`.
///
/// `pixels[y * width + x]` is the sample at column `x`, row `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
}

impl ImageData {
    /// Creates an image, validating that the buffer matches the dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if `width * height != pixels.len()`.
    pub fn new(width: usize, height: usize, pixels: Vec<f32>) -> Result<Self> {
        if width.checked_mul(height) != Some(pixels.len()) {
            return Err(Error::InvalidDimensions {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Creates an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decodes little-endian `f32` samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimensions`] if the byte count does not match.
    pub fn from_le_bytes(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidDimensions {
                width,
                height,
                len: bytes.len() / 4,
            });
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(width, height, pixels)
    }

    /// Reads a raw little-endian `f32` file, skipping `header_bytes` first.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`Error::InvalidDimensions`] if its size does not match.
    pub fn read_raw(
        path: impl AsRef<Path>,
        width: usize,
        height: usize,
        header_bytes: usize,
    ) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let body = bytes.get(header_bytes..).unwrap_or_default();
        Self::from_le_bytes(width, height, body)
    }

    #[must_use]
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    #[inline]
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Sample at `(x, y)`, or `None` when out of bounds.
    #[must_use]
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x < self.width && y < self.height {
            Some(self.pixels[y * self.width + x])
        } else {
            None
        }
    }

    /// Minimum and maximum over finite samples.
    ///
    /// Returns `None` if the image holds no finite sample.
    #[must_use]
    pub fn finite_range(&self) -> Option<(f32, f32)> {
        self.pixels
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_new_rejects_mismatched_buffer() {
        let err = ImageData::new(4, 4, vec![0.0; 15]).unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { len: 15, .. }));
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let img = ImageData::from_fn(3, 2, |x, y| (y * 10 + x) as f32);
        assert_eq!(img.get(2, 1), Some(12.0));
        assert_eq!(img.pixels()[4], 11.0);
        assert_eq!(img.get(3, 0), None);
    }

    #[test]
    fn test_finite_range_skips_nan() {
        let img = ImageData::new(2, 2, vec![f32::NAN, -1.0, 4.0, f32::INFINITY]).unwrap();
        assert_eq!(img.finite_range(), Some((-1.0, 4.0)));

        let empty = ImageData::new(0, 0, Vec::new()).unwrap();
        assert_eq!(empty.finite_range(), None);
    }

    #[test]
    fn test_read_raw_with_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xAA; 8]).unwrap();
        for v in [1.0f32, 2.0, 3.0, 4.0] {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let img = ImageData::read_raw(file.path(), 2, 2, 8).unwrap();
        assert_eq!(img.pixels(), &[1.0, 2.0, 3.0, 4.0]);

        assert!(ImageData::read_raw(file.path(), 3, 2, 8).is_err());
    }
}
