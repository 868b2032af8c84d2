//! Cache slot identifiers and cached-value storage types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A type-erased derived value stored in a subject's cache.
///
/// Readers downcast to the concrete type they expect; a mismatch is treated
/// the same as a missing value.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Named cache slots on a subject.
///
/// Each derived value owns exactly one slot. Slots double as task keys for
/// shared-task dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CacheSlot {
    /// Normalised histogram buckets.
    HistogramData,
    /// Downsampled preview image for data browsers.
    Thumbnail,
    /// Summary statistics over the raw data.
    Statistics,
}

impl CacheSlot {
    /// All slots, in declaration order.
    pub const ALL: [CacheSlot; 3] = [
        CacheSlot::HistogramData,
        CacheSlot::Thumbnail,
        CacheSlot::Statistics,
    ];

    /// Stable name for logging and persistence.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CacheSlot::HistogramData => "histogram_data",
            CacheSlot::Thumbnail => "thumbnail_data",
            CacheSlot::Statistics => "statistics_data",
        }
    }
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tri-state staleness marker for a locally shadowed cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyState {
    /// Never computed, or the last computation produced no value.
    #[default]
    Unset,
    /// Holds the result of the latest computation.
    Clean,
    /// Upstream changed since the last computation.
    Dirty,
}

impl DirtyState {
    /// Returns true unless the entry is known to be fresh.
    #[must_use]
    #[inline]
    pub fn needs_compute(self) -> bool {
        !matches!(self, DirtyState::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_names_are_unique() {
        let mut names: Vec<_> = CacheSlot::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CacheSlot::ALL.len());
        assert_eq!(CacheSlot::HistogramData.to_string(), "histogram_data");
    }

    #[test]
    fn test_dirty_state_needs_compute() {
        assert!(DirtyState::Unset.needs_compute());
        assert!(DirtyState::Dirty.needs_compute());
        assert!(!DirtyState::Clean.needs_compute());
        assert_eq!(DirtyState::default(), DirtyState::Unset);
    }
}
