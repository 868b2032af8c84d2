//! histoscope-panel: Headless controllers for the histogram panel and the
//! data browser.
//!
//! Both controllers are driven from a single UI thread. Background results
//! arrive over channels and are applied in `handle_messages`.
//!

mod histogram_panel;
mod library;
mod message;
mod util;

pub use histogram_panel::{
    Adornments, HistogramPanel, HistogramPanelConfig, HistogramRecompute, Point,
};
pub use library::{DataListController, DisplayItem};
pub use message::{BrowserMessage, DisplayItemId, HistogramSnapshot, PanelMessage};
