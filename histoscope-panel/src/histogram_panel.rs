//! Histogram panel: shows the intensity distribution of the selected data
//! item and lets the user drag out new display limits.
//!
//! Selection changes are handed to a [`ThrottledRecomputeWorker`], which
//! computes on its own thread and posts [`PanelMessage`]s back. The UI thread
//! drains them in [`HistogramPanel::handle_messages`]; everything else on the
//! panel is UI-thread only.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use histoscope_compute::{
    Histogram, HistogramConfig, HistogramProcessor, Processor, RecomputeHandler,
    ThrottledRecomputeWorker, WorkerConfig,
};
use histoscope_core::{CacheSlot, DataItem, Result, Subject};

use crate::message::{HistogramSnapshot, PanelMessage};
use crate::util::usize_to_f64;

/// Horizontal spacing of histogram path samples, in pixels.
const PATH_STEP: usize = 2;

/// Full display range in normalized canvas coordinates.
const FULL_RANGE: (f64, f64) = (0.0, 1.0);

/// Configuration for [`HistogramPanel`].
#[derive(Debug, Clone)]
pub struct HistogramPanelConfig {
    pub worker: WorkerConfig,
    pub histogram: HistogramConfig,
}

impl Default for HistogramPanelConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::new().with_thread_name("histogram-panel"),
            histogram: HistogramConfig::default(),
        }
    }
}

impl HistogramPanelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_histogram(mut self, histogram: HistogramConfig) -> Self {
        self.histogram = histogram;
        self
    }
}

/// Worker-side steps: build a histogram for the item, post it to the panel.
///
/// Histograms are stored in the item's `HistogramData` slot, so reselecting
/// an unchanged item reuses the previous result.
pub struct HistogramRecompute {
    config: HistogramConfig,
    processor: HistogramProcessor,
    tx: Sender<PanelMessage>,
}

impl HistogramRecompute {
    pub fn new(config: HistogramConfig, tx: Sender<PanelMessage>) -> Self {
        Self {
            config,
            processor: HistogramProcessor,
            tx,
        }
    }

    fn histogram_for(&self, item: &DataItem) -> Result<Option<Arc<Histogram>>> {
        let config = self.config.clone().with_range(item.display_range());
        let slot = self.processor.slot();
        if let Some(cached) = cached_histogram(item, slot, &config) {
            log::trace!("reusing cached histogram for '{}'", item.title());
            return Ok(Some(cached));
        }
        let data = match item.data() {
            Some(data) if !item.is_closed() => data,
            _ => return Ok(None),
        };
        let histogram = self.processor.calculate(&config, &data)?;
        match &histogram {
            Some(h) => item.set_cached_value(slot, Arc::new(Arc::clone(h))),
            None => item.remove_cached_value(slot),
        }
        Ok(histogram)
    }
}

impl RecomputeHandler<DataItem> for HistogramRecompute {
    type Output = HistogramSnapshot;

    fn compute(&mut self, item: &Arc<DataItem>) -> Result<Option<HistogramSnapshot>> {
        let histogram = self.histogram_for(item)?;
        Ok(Some(HistogramSnapshot {
            item: Arc::clone(item),
            histogram,
        }))
    }

    fn publish(&mut self, output: Option<HistogramSnapshot>) {
        if self.tx.send(PanelMessage::HistogramReady(output)).is_err() {
            log::debug!("histogram panel gone; dropping result");
        }
    }
}

/// A fresh histogram already stored on the item, if it matches `config`.
#[allow(clippy::cast_possible_truncation)]
fn cached_histogram(
    item: &DataItem,
    slot: CacheSlot,
    config: &HistogramConfig,
) -> Option<Arc<Histogram>> {
    if item.is_cached_value_dirty(slot) {
        return None;
    }
    let value = item.get_cached_value(slot)?;
    let histogram = value.downcast_ref::<Arc<Histogram>>()?;
    let same_range = config
        .range
        .map_or(true, |(lo, hi)| histogram.range() == (lo as f32, hi as f32));
    (histogram.len() == config.bins && same_range).then(|| Arc::clone(histogram))
}

/// A point on the canvas, in pixels from the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Overlay drawn on top of the histogram: the lower limit as a 2 px black
/// line, the upper limit as a 2 px white line, and a 1 px black border.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Adornments {
    pub lower_x: f64,
    pub upper_x: f64,
    pub width: f64,
    pub height: f64,
}

/// Headless histogram panel.
pub struct HistogramPanel {
    worker: Option<ThrottledRecomputeWorker<DataItem, HistogramRecompute>>,
    rx: Receiver<PanelMessage>,

    data_item: Option<Arc<DataItem>>,
    histogram: Option<Arc<Histogram>>,

    /// Drawn display limits in normalized canvas coordinates.
    display_limits: (f64, f64),
    pressed: bool,
    drag_start: f64,

    width: f64,
    height: f64,

    histogram_dirty: bool,
    adornments_dirty: bool,
    needs_redraw: bool,
    path: Vec<Point>,
    adornments: Adornments,
}

impl HistogramPanel {
    /// Creates the panel and starts its worker thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the worker thread cannot be spawned.
    pub fn new(config: HistogramPanelConfig) -> Result<Self> {
        let (tx, rx) = channel();
        let handler = HistogramRecompute::new(config.histogram, tx);
        let worker = ThrottledRecomputeWorker::spawn(config.worker, handler)?;
        Ok(Self {
            worker: Some(worker),
            rx,
            data_item: None,
            histogram: None,
            display_limits: FULL_RANGE,
            pressed: false,
            drag_start: 0.0,
            width: 0.0,
            height: 0.0,
            histogram_dirty: true,
            adornments_dirty: true,
            needs_redraw: false,
            path: Vec::new(),
            adornments: Adornments::default(),
        })
    }

    /// The selection changed, or the selected item's content changed.
    pub fn selected_data_item_changed(&self, item: Option<Arc<DataItem>>) {
        if let Some(worker) = &self.worker {
            worker.notify(item);
        }
    }

    /// Applies results posted by the worker. Returns `true` if any arrived.
    pub fn handle_messages(&mut self) -> bool {
        let mut handled = false;
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                PanelMessage::HistogramReady(snapshot) => self.apply_snapshot(snapshot),
            }
            handled = true;
        }
        handled
    }

    fn apply_snapshot(&mut self, snapshot: Option<HistogramSnapshot>) {
        let (item, histogram) = match snapshot {
            Some(s) => (Some(s.item), s.histogram),
            None => (None, None),
        };
        self.data_item = item;
        self.histogram = histogram;
        // Keep the drawn limits while the user is dragging them.
        if !self.pressed {
            self.display_limits = FULL_RANGE;
        }
        self.histogram_dirty = true;
        self.adornments_dirty = true;
        self.needs_redraw = true;
    }

    pub fn size_changed(&mut self, width: f64, height: f64) {
        if width > 0.0 && height > 0.0 {
            self.width = width;
            self.height = height;
            self.histogram_dirty = true;
            self.adornments_dirty = true;
            self.needs_redraw = true;
        }
    }

    fn set_display_limits(&mut self, limits: (f64, f64)) {
        self.display_limits = limits;
        self.adornments_dirty = true;
        self.needs_redraw = true;
    }

    fn canvas_fraction(&self, x: f64) -> Option<f64> {
        (self.width > 0.0).then(|| x / self.width)
    }

    pub fn mouse_pressed(&mut self, x: f64) {
        let Some(start) = self.canvas_fraction(x) else {
            return;
        };
        self.pressed = true;
        self.drag_start = start;
        self.set_display_limits((start, start));
    }

    pub fn mouse_position_changed(&mut self, x: f64) {
        if !self.pressed {
            return;
        }
        if let Some(current) = self.canvas_fraction(x) {
            let start = self.drag_start;
            self.set_display_limits((start.min(current), start.max(current)));
        }
    }

    /// Ends a drag, writing the dragged range to the item as data values.
    pub fn mouse_released(&mut self) {
        self.pressed = false;
        let (lower, upper) = self.display_limits;
        let span = upper - lower;
        if span <= 0.0 || span >= 1.0 {
            return;
        }
        let Some(item) = &self.data_item else {
            return;
        };
        let Some((data_min, data_max)) = item.display_range() else {
            return;
        };
        let data_span = data_max - data_min;
        let limits = (data_min + lower * data_span, data_min + upper * data_span);
        log::debug!("display limits for '{}' set to {limits:?}", item.title());
        item.set_display_limits(Some(limits));
    }

    /// Resets the drawn limits and clears the item's display limits.
    pub fn mouse_double_clicked(&mut self) {
        self.set_display_limits(FULL_RANGE);
        if let Some(item) = &self.data_item {
            item.set_display_limits(None);
        }
    }

    /// Fill outline of the histogram for the current canvas size.
    ///
    /// Empty when there is no histogram to draw.
    pub fn histogram_path(&mut self) -> &[Point] {
        if self.histogram_dirty {
            self.histogram_dirty = false;
            self.path = build_path(self.histogram.as_deref(), self.width, self.height);
        }
        &self.path
    }

    pub fn adornments(&mut self) -> Adornments {
        if self.adornments_dirty {
            self.adornments_dirty = false;
            let (lower, upper) = self.display_limits;
            self.adornments = Adornments {
                lower_x: lower * self.width,
                upper_x: upper * self.width,
                width: self.width,
                height: self.height,
            };
        }
        self.adornments
    }

    /// Returns whether the canvas needs repainting, and clears the request.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }

    #[must_use]
    pub fn data_item(&self) -> Option<&Arc<DataItem>> {
        self.data_item.as_ref()
    }

    #[must_use]
    pub fn histogram(&self) -> Option<&Arc<Histogram>> {
        self.histogram.as_ref()
    }

    /// Drawn limits in normalized canvas coordinates.
    #[must_use]
    pub fn display_limits(&self) -> (f64, f64) {
        self.display_limits
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.pressed
    }

    /// Worker passes completed so far.
    #[must_use]
    pub fn pass_count(&self) -> u64 {
        self.worker.as_ref().map_or(0, ThrottledRecomputeWorker::pass_count)
    }

    /// Stops the worker, then forgets the displayed item.
    ///
    /// Results still queued from the worker are discarded.
    pub fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.close();
        }
        while self.rx.try_recv().is_ok() {}
        self.apply_snapshot(None);
    }
}

impl Drop for HistogramPanel {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close();
        }
    }
}

fn build_path(histogram: Option<&Histogram>, width: f64, height: f64) -> Vec<Point> {
    let Some(histogram) = histogram.filter(|h| !h.is_empty()) else {
        return Vec::new();
    };
    if width <= 0.0 || height <= 0.0 {
        return Vec::new();
    }
    let level = |fraction: f64| height * (1.0 - f64::from(histogram.sample(fraction)));

    let mut path = vec![Point::new(0.0, height), Point::new(0.0, level(0.0))];
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let columns = width as usize;
    for i in (1..columns).step_by(PATH_STEP) {
        let x = usize_to_f64(i);
        path.push(Point::new(x, level(x / width)));
    }
    path.push(Point::new(width, height));
    path
}
