//! Intensity histogram of an image.

use histoscope_core::{Error, ImageData, Result};
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pixels per rayon work item when binning.
const CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for histogram computation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistogramConfig {
    /// Number of buckets between the finite minimum and maximum.
    pub bins: usize,
    /// Scale bucket heights so the tallest one is 1.0.
    pub normalize: bool,
    /// Data range to bin; pixels outside it are ignored. The finite data
    /// range when `None`.
    pub range: Option<(f64, f64)>,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bins: 512,
            normalize: true,
            range: None,
        }
    }
}

impl HistogramConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_range(mut self, range: Option<(f64, f64)>) -> Self {
        self.range = range;
        self
    }
}

/// Bucketed pixel intensities.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    counts: Vec<u64>,
    heights: Vec<f32>,
    range: (f32, f32),
}

impl Histogram {
    /// Bins the finite pixels of `image` that fall inside the configured range.
    ///
    /// Returns `Ok(None)` when the image has no finite pixel. When the range
    /// is a single value, every pixel equal to it lands in bucket 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if `config.bins` is zero.
    pub fn compute(image: &ImageData, config: &HistogramConfig) -> Result<Option<Self>> {
        let bins = config.bins;
        if bins == 0 {
            return Err(Error::ConfigError("histogram needs at least one bin".into()));
        }
        let Some(finite) = image.finite_range() else {
            return Ok(None);
        };
        #[allow(clippy::cast_possible_truncation)]
        let (lo, hi) = config
            .range
            .map_or(finite, |(lo, hi)| (lo.min(hi) as f32, lo.max(hi) as f32));
        let span = hi - lo;

        let counts = image
            .pixels()
            .par_chunks(CHUNK_SIZE)
            .fold(
                || vec![0u64; bins],
                |mut acc, chunk| {
                    for &v in chunk.iter().filter(|&&v| v >= lo && v <= hi) {
                        acc[bin_index(v, lo, span, bins)] += 1;
                    }
                    acc
                },
            )
            .reduce(
                || vec![0u64; bins],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );

        Ok(Some(Self::from_counts(counts, (lo, hi), config.normalize)))
    }

    /// Builds a histogram from precomputed counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(counts: Vec<u64>, range: (f32, f32), normalize: bool) -> Self {
        let peak = counts.iter().copied().max().unwrap_or(0);
        let heights = counts
            .iter()
            .map(|&c| {
                if !normalize {
                    c as f32
                } else if peak == 0 {
                    0.0
                } else {
                    (c as f64 / peak as f64) as f32
                }
            })
            .collect();
        Self {
            counts,
            heights,
            range,
        }
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Bucket heights, normalised to `[0, 1]` unless disabled.
    #[must_use]
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Data range `(min, max)` covered by the buckets.
    #[must_use]
    pub fn range(&self) -> (f32, f32) {
        self.range
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Height of the bucket under `fraction` of the histogram's width.
    ///
    /// `fraction` is clamped to `[0, 1)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn sample(&self, fraction: f64) -> f32 {
        if self.heights.is_empty() {
            return 0.0;
        }
        let n = self.heights.len();
        let idx = ((fraction.max(0.0) * n as f64) as usize).min(n - 1);
        self.heights[idx]
    }
}

#[inline]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bin_index(v: f32, lo: f32, span: f32, bins: usize) -> usize {
    if span <= 0.0 {
        return 0;
    }
    let t = f64::from(v - lo) / f64::from(span);
    ((t * bins as f64) as usize).min(bins - 1)
}
