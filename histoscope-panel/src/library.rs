//! Data browser: an ordered list of display items with text summaries and
//! lazily computed thumbnails.
//!
//! Thumbnail computations and change notifications arrive on other threads
//! and are forwarded as [`BrowserMessage`]s; [`DataListController::handle_messages`]
//! turns them into the set of rows that need repainting.

use std::collections::BTreeSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use chrono::{DateTime, Local};
use histoscope_compute::{LazyCachedComputation, Thumbnail, ThumbnailConfig, ThumbnailProcessor};
use histoscope_core::{
    property, DataItem, PropertyValue, Subject, SubjectHandle, SubjectListener, SubjectRegistry,
};

use crate::message::{BrowserMessage, DisplayItemId};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Forwards changes that affect a row's text or thumbnail.
struct ChangeForwarder {
    id: DisplayItemId,
    tx: Sender<BrowserMessage>,
}

impl ChangeForwarder {
    fn send(&self) {
        if self.tx.send(BrowserMessage::ContentChanged(self.id)).is_err() {
            log::debug!("data browser gone; dropping change for {:?}", self.id);
        }
    }
}

impl SubjectListener for ChangeForwarder {
    fn content_changed(&self) {
        self.send();
    }

    fn property_changed(&self, key: &str, _value: &PropertyValue) {
        if key == property::TITLE || key == property::DISPLAY_LIMITS {
            self.send();
        }
    }
}

/// One row of the data browser.
pub struct DisplayItem {
    id: DisplayItemId,
    item: Arc<DataItem>,
    handle: SubjectHandle,
    thumbnail: LazyCachedComputation<ThumbnailProcessor>,
    thumbnail_config: ThumbnailConfig,
    tx: Sender<BrowserMessage>,
    _forwarder: Arc<ChangeForwarder>,
}

impl DisplayItem {
    fn new(
        id: DisplayItemId,
        item: Arc<DataItem>,
        registry: &Arc<SubjectRegistry<dyn Subject>>,
        thumbnail_config: ThumbnailConfig,
        tx: Sender<BrowserMessage>,
    ) -> Self {
        let handle = registry.insert(Arc::clone(&item) as Arc<dyn Subject>);
        let thumbnail =
            LazyCachedComputation::new(ThumbnailProcessor, Arc::clone(registry), handle);
        item.add_listener(thumbnail.listener());

        let forwarder = Arc::new(ChangeForwarder { id, tx: tx.clone() });
        let weak = Arc::downgrade(&forwarder);
        item.add_listener(weak);

        Self {
            id,
            item,
            handle,
            thumbnail,
            thumbnail_config,
            tx,
            _forwarder: forwarder,
        }
    }

    #[must_use]
    pub fn id(&self) -> DisplayItemId {
        self.id
    }

    #[must_use]
    pub fn data_item(&self) -> &Arc<DataItem> {
        &self.item
    }

    #[must_use]
    pub fn title_str(&self) -> String {
        self.item.title()
    }

    /// Size and element type, e.g. `512x512, f32`; empty without data.
    #[must_use]
    pub fn format_str(&self) -> String {
        self.item
            .data()
            .map(|d| format!("{}x{}, f32", d.width(), d.height()))
            .unwrap_or_default()
    }

    /// Creation time in local time.
    #[must_use]
    pub fn datetime_str(&self) -> String {
        DateTime::<Local>::from(self.item.created())
            .format(DATETIME_FORMAT)
            .to_string()
    }

    /// `Live <frame>` for live items, followed by `<valid>/<height>` while a
    /// frame is partially acquired; empty otherwise.
    #[must_use]
    pub fn status_str(&self) -> String {
        let Some(live) = self.item.live_status() else {
            return String::new();
        };
        let mut status = format!("Live {}", live.frame_index);
        if let (Some(valid), Some(data)) = (live.valid_rows, self.item.data()) {
            status.push_str(&format!(" {valid}/{}", data.height()));
        }
        status
    }

    /// Best available thumbnail; schedules a refresh when stale.
    ///
    /// A refresh posts [`BrowserMessage::ThumbnailUpdated`] when it produces
    /// a thumbnail; rows without data never ask for a repaint.
    pub fn thumbnail(&self) -> Option<Arc<Thumbnail>> {
        let config = self
            .thumbnail_config
            .clone()
            .with_display_range(self.item.display_range());
        let tx = self.tx.clone();
        let id = self.id;
        self.thumbnail.get_data(
            &config,
            Some(Box::new(move |thumbnail| {
                if thumbnail.is_none() {
                    return;
                }
                if tx.send(BrowserMessage::ThumbnailUpdated(id)).is_err() {
                    log::debug!("data browser gone; dropping thumbnail for {id:?}");
                }
            })),
        )
    }

    /// Waits for an in-flight thumbnail and unregisters the item.
    fn close(&self, registry: &SubjectRegistry<dyn Subject>) {
        self.thumbnail.close();
        registry.remove(self.handle);
    }
}

/// Ordered display items plus a single selection.
pub struct DataListController {
    registry: Arc<SubjectRegistry<dyn Subject>>,
    items: Vec<DisplayItem>,
    selected: Option<usize>,
    next_id: u64,
    thumbnail_config: ThumbnailConfig,
    tx: Sender<BrowserMessage>,
    rx: Receiver<BrowserMessage>,
}

impl Default for DataListController {
    fn default() -> Self {
        Self::new(ThumbnailConfig::default())
    }
}

impl DataListController {
    pub fn new(thumbnail_config: ThumbnailConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            registry: Arc::new(SubjectRegistry::new()),
            items: Vec::new(),
            selected: None,
            next_id: 0,
            thumbnail_config,
            tx,
            rx,
        }
    }

    /// Inserts `item` before `before_index` (clamped to the end).
    pub fn display_item_inserted(
        &mut self,
        item: Arc<DataItem>,
        before_index: usize,
    ) -> DisplayItemId {
        let id = DisplayItemId(self.next_id);
        self.next_id += 1;
        let index = before_index.min(self.items.len());
        let display_item = DisplayItem::new(
            id,
            item,
            &self.registry,
            self.thumbnail_config.clone(),
            self.tx.clone(),
        );
        self.items.insert(index, display_item);
        if let Some(selected) = self.selected.as_mut() {
            if *selected >= index {
                *selected += 1;
            }
        }
        log::debug!("display item {} inserted at {index}", id.0);
        id
    }

    /// Removes the row at `index`, returning its data item.
    pub fn display_item_removed(&mut self, index: usize) -> Option<Arc<DataItem>> {
        if index >= self.items.len() {
            log::warn!("display item index {index} out of range");
            return None;
        }
        let display_item = self.items.remove(index);
        display_item.close(&self.registry);
        self.selected = match self.selected {
            Some(s) if s == index => None,
            Some(s) if s > index => Some(s - 1),
            other => other,
        };
        Some(Arc::clone(&display_item.item))
    }

    #[must_use]
    pub fn display_item_count(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn display_item(&self, index: usize) -> Option<&DisplayItem> {
        self.items.get(index)
    }

    #[must_use]
    pub fn index_of(&self, id: DisplayItemId) -> Option<usize> {
        self.items.iter().position(|d| d.id == id)
    }

    /// Changes the selection and returns the newly selected data item, which
    /// is what the histogram panel should be told about.
    pub fn set_selected_index(&mut self, index: Option<usize>) -> Option<Arc<DataItem>> {
        self.selected = index.filter(|&i| i < self.items.len());
        self.selected_item()
    }

    #[must_use]
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    #[must_use]
    pub fn selected_item(&self) -> Option<Arc<DataItem>> {
        self.selected
            .and_then(|i| self.items.get(i))
            .map(|d| Arc::clone(&d.item))
    }

    /// Drains pending notifications and returns the rows to repaint.
    pub fn handle_messages(&mut self) -> Vec<DisplayItemId> {
        let mut changed = BTreeSet::new();
        while let Ok(msg) = self.rx.try_recv() {
            changed.insert(msg.id());
        }
        changed
            .into_iter()
            .filter(|&id| self.index_of(id).is_some())
            .collect()
    }

    /// Closes every display item.
    pub fn close(&mut self) {
        for display_item in self.items.drain(..) {
            display_item.close(&self.registry);
        }
        self.selected = None;
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for DataListController {
    fn drop(&mut self) {
        self.close();
    }
}
