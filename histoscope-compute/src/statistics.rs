//! Summary statistics over finite pixels.

use histoscope_core::ImageData;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Count, extrema, mean, and population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Statistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    const EMPTY: Self = Self {
        count: 0,
        sum: 0.0,
        sum_sq: 0.0,
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    fn push(mut self, v: f64) -> Self {
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Statistics {
    /// Returns `None` if the image holds no finite pixel.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(image: &ImageData) -> Option<Self> {
        let acc = image
            .pixels()
            .par_iter()
            .filter(|v| v.is_finite())
            .fold(|| Accumulator::EMPTY, |acc, &v| acc.push(f64::from(v)))
            .reduce(|| Accumulator::EMPTY, Accumulator::merge);
        if acc.count == 0 {
            return None;
        }
        let n = acc.count as f64;
        let mean = acc.sum / n;
        let variance = (acc.sum_sq / n - mean * mean).max(0.0);
        Some(Self {
            count: acc.count,
            min: acc.min,
            max: acc.max,
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_basic_statistics() {
        let image = ImageData::new(4, 1, vec![2.0, 4.0, 4.0, 6.0]).unwrap();
        let s = Statistics::compute(&image).unwrap();
        assert_eq!(s.count, 4);
        assert_relative_eq!(s.mean, 4.0);
        assert_relative_eq!(s.min, 2.0);
        assert_relative_eq!(s.max, 6.0);
        assert_relative_eq!(s.std_dev, 2.0f64.sqrt());
    }

    #[test]
    fn test_ignores_non_finite() {
        let image = ImageData::new(3, 1, vec![1.0, f32::NAN, 3.0]).unwrap();
        let s = Statistics::compute(&image).unwrap();
        assert_eq!(s.count, 2);
        assert_relative_eq!(s.mean, 2.0);
    }

    #[test]
    fn test_empty_is_none() {
        let image = ImageData::new(1, 1, vec![f32::NAN]).unwrap();
        assert!(Statistics::compute(&image).is_none());
    }
}
