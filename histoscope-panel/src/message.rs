//! Message types for async communication.
//!
//! Messages are sent from the recompute worker and dispatcher threads to the
//! UI thread via channels, and drained there by `handle_messages`.

use std::sync::Arc;

use histoscope_compute::Histogram;
use histoscope_core::DataItem;

/// Identifies a display item within one data browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayItemId(pub u64);

/// What the histogram panel should show next.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// The item the histogram was computed from.
    pub item: Arc<DataItem>,
    /// `None` when the item has no finite data.
    pub histogram: Option<Arc<Histogram>>,
}

/// Messages sent from the histogram worker to the UI thread.
#[derive(Debug)]
pub enum PanelMessage {
    /// A pass finished; `None` clears the panel.
    HistogramReady(Option<HistogramSnapshot>),
}

/// Messages sent to the data browser from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserMessage {
    /// A thumbnail computation stored a new value.
    ThumbnailUpdated(DisplayItemId),

    /// The item's raw content or a displayed property changed.
    ContentChanged(DisplayItemId),
}

impl BrowserMessage {
    #[must_use]
    pub fn id(self) -> DisplayItemId {
        match self {
            Self::ThumbnailUpdated(id) | Self::ContentChanged(id) => id,
        }
    }
}
