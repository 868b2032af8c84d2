//! [`Processor`] implementations for the derived values a data item carries.

use std::sync::Arc;

use histoscope_core::{property, CacheSlot, ImageData, PropertyValue, Result};

use crate::histogram::{Histogram, HistogramConfig};
use crate::lazy::Processor;
use crate::statistics::Statistics;
use crate::thumbnail::{Thumbnail, ThumbnailConfig};

/// Histogram of the item's pixels for the histogram panel.
#[derive(Debug, Default, Clone, Copy)]
pub struct HistogramProcessor;

impl Processor for HistogramProcessor {
    type Output = Arc<Histogram>;
    type Context = HistogramConfig;

    fn slot(&self) -> CacheSlot {
        CacheSlot::HistogramData
    }

    fn calculate(
        &self,
        context: &HistogramConfig,
        data: &ImageData,
    ) -> Result<Option<Arc<Histogram>>> {
        Ok(Histogram::compute(data, context)?.map(Arc::new))
    }

    fn depends_on_property(&self, key: &str, _value: &PropertyValue) -> bool {
        key == property::DISPLAY_LIMITS
    }
}

/// Browser thumbnail, re-rendered when display limits change.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThumbnailProcessor;

impl Processor for ThumbnailProcessor {
    type Output = Arc<Thumbnail>;
    type Context = ThumbnailConfig;

    fn slot(&self) -> CacheSlot {
        CacheSlot::Thumbnail
    }

    fn calculate(
        &self,
        context: &ThumbnailConfig,
        data: &ImageData,
    ) -> Result<Option<Arc<Thumbnail>>> {
        Ok(Thumbnail::compute(data, context)?.map(Arc::new))
    }

    fn depends_on_property(&self, key: &str, _value: &PropertyValue) -> bool {
        key == property::DISPLAY_LIMITS
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StatisticsProcessor;

impl Processor for StatisticsProcessor {
    type Output = Statistics;
    type Context = ();

    fn slot(&self) -> CacheSlot {
        CacheSlot::Statistics
    }

    fn calculate(&self, _context: &(), data: &ImageData) -> Result<Option<Statistics>> {
        Ok(Statistics::compute(data))
    }
}
