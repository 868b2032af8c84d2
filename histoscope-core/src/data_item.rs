//! Reference subject implementation: a data item holding one image.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::dispatch::TaskDispatcher;
use crate::property::{DISPLAY_LIMITS, TITLE};
use crate::subject::RefCount;
use crate::{
    CacheSlot, CachedValue, Error, ImageData, Job, PropertyValue, Result, Subject,
    SubjectListener,
};

/// Hook invoked when the last application-level reference is released.
pub type ReleaseHook = Box<dyn Fn(&DataItem) + Send + Sync>;

#[derive(Default)]
struct CacheCell {
    value: Option<CachedValue>,
    dirty: bool,
}

/// Acquisition state of a data item fed by a live source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveStatus {
    pub frame_index: u64,
    /// Rows filled so far in a partially acquired frame.
    pub valid_rows: Option<usize>,
}

/// A thread-safe subject holding an image, its properties, and its caches.
pub struct DataItem {
    refs: RefCount,
    closed: AtomicBool,
    created: SystemTime,
    data: RwLock<Option<Arc<ImageData>>>,
    properties: RwLock<HashMap<String, PropertyValue>>,
    cache: Mutex<HashMap<CacheSlot, CacheCell>>,
    live: Mutex<Option<LiveStatus>>,
    listeners: Mutex<Vec<Weak<dyn SubjectListener>>>,
    dispatcher: Arc<dyn TaskDispatcher>,
    release_hook: Option<ReleaseHook>,
}

impl DataItem {
    /// Creates an empty data item that schedules work on `dispatcher`.
    pub fn new(title: &str, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(TITLE.to_string(), PropertyValue::from(title));
        Self {
            refs: RefCount::new(),
            closed: AtomicBool::new(false),
            created: SystemTime::now(),
            data: RwLock::new(None),
            properties: RwLock::new(properties),
            cache: Mutex::new(HashMap::new()),
            live: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            dispatcher,
            release_hook: None,
        }
    }

    /// Sets the initial image.
    #[must_use]
    pub fn with_data(self, data: ImageData) -> Self {
        *self.data.write() = Some(Arc::new(data));
        self
    }

    /// Registers a hook fired when the reference count drops to zero.
    #[must_use]
    pub fn with_release_hook(mut self, hook: impl Fn(&DataItem) + Send + Sync + 'static) -> Self {
        self.release_hook = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn title(&self) -> String {
        self.property(TITLE)
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Current application-level reference count.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.refs.get()
    }

    /// Replaces the image and notifies listeners.
    pub fn set_data(&self, data: Option<ImageData>) {
        *self.data.write() = data.map(Arc::new);
        for cell in self.cache.lock().values_mut() {
            cell.dirty = true;
        }
        for listener in self.live_listeners() {
            listener.content_changed();
        }
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.read().get(key).cloned()
    }

    /// Sets a property and notifies listeners. Setting `None` removes it.
    pub fn set_property(&self, key: &str, value: PropertyValue) {
        {
            let mut properties = self.properties.write();
            if value.is_none() {
                properties.remove(key);
            } else {
                properties.insert(key.to_string(), value.clone());
            }
        }
        for listener in self.live_listeners() {
            listener.property_changed(key, &value);
        }
    }

    /// User-chosen display limits in data space.
    #[must_use]
    pub fn display_limits(&self) -> Option<(f64, f64)> {
        self.property(DISPLAY_LIMITS).and_then(|v| v.as_range())
    }

    pub fn set_display_limits(&self, limits: Option<(f64, f64)>) {
        self.set_property(DISPLAY_LIMITS, PropertyValue::from(limits));
    }

    /// Range used to map data to display: the display limits when set,
    /// otherwise the finite data range.
    #[must_use]
    pub fn display_range(&self) -> Option<(f64, f64)> {
        self.display_limits().or_else(|| {
            self.data()
                .and_then(|d| d.finite_range())
                .map(|(lo, hi)| (f64::from(lo), f64::from(hi)))
        })
    }

    #[must_use]
    pub fn live_status(&self) -> Option<LiveStatus> {
        *self.live.lock()
    }

    pub fn set_live_status(&self, status: Option<LiveStatus>) {
        *self.live.lock() = status;
    }

    /// Registers a change listener. Dead listeners are pruned on notification.
    pub fn add_listener(&self, listener: Weak<dyn SubjectListener>) {
        self.listeners.lock().push(listener);
    }

    /// Marks the item closed; pending derived-value jobs see no data.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("data item '{}' closed", self.title());
        }
    }

    fn live_listeners(&self) -> Vec<Arc<dyn SubjectListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Subject for DataItem {
    fn add_ref(&self) {
        self.refs.increment();
    }

    fn remove_ref(&self) {
        if self.refs.decrement() {
            log::trace!("last reference to '{}' released", self.title());
            if let Some(hook) = &self.release_hook {
                hook(self);
            }
        }
    }

    fn is_cached_value_dirty(&self, slot: CacheSlot) -> bool {
        self.cache.lock().get(&slot).is_some_and(|c| c.dirty)
    }

    fn set_cached_value_dirty(&self, slot: CacheSlot) {
        self.cache.lock().entry(slot).or_default().dirty = true;
    }

    fn set_cached_value(&self, slot: CacheSlot, value: CachedValue) {
        let mut cache = self.cache.lock();
        let cell = cache.entry(slot).or_default();
        cell.value = Some(value);
        cell.dirty = false;
    }

    fn remove_cached_value(&self, slot: CacheSlot) {
        self.cache.lock().remove(&slot);
    }

    fn get_cached_value(&self, slot: CacheSlot) -> Option<CachedValue> {
        self.cache.lock().get(&slot).and_then(|c| c.value.clone())
    }

    fn add_shared_task(&self, slot: CacheSlot, key: Option<u64>, job: Job) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SubjectClosed);
        }
        self.dispatcher.add_shared_task(slot, key, job)
    }

    fn data(&self) -> Option<Arc<ImageData>> {
        self.data.read().clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataItem")
            .field("title", &self.title())
            .field("refs", &self.refs.get())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InlineDispatcher;
    use std::sync::atomic::AtomicUsize;

    fn item() -> DataItem {
        DataItem::new("sample", Arc::new(InlineDispatcher::default()))
    }

    #[derive(Default)]
    struct Recorder {
        content: AtomicUsize,
        keys: Mutex<Vec<String>>,
    }

    impl SubjectListener for Recorder {
        fn content_changed(&self) {
            self.content.fetch_add(1, Ordering::SeqCst);
        }
        fn property_changed(&self, key: &str, _value: &PropertyValue) {
            self.keys.lock().push(key.to_string());
        }
    }

    #[test]
    fn test_cache_dirty_lifecycle() {
        let item = item();
        let slot = CacheSlot::HistogramData;
        assert!(!item.is_cached_value_dirty(slot));

        item.set_cached_value_dirty(slot);
        assert!(item.is_cached_value_dirty(slot));

        item.set_cached_value(slot, Arc::new(3u32));
        assert!(!item.is_cached_value_dirty(slot));
        let v = item.get_cached_value(slot).unwrap();
        assert_eq!(v.downcast_ref::<u32>(), Some(&3));

        item.set_cached_value_dirty(slot);
        item.remove_cached_value(slot);
        assert!(!item.is_cached_value_dirty(slot));
        assert!(item.get_cached_value(slot).is_none());
    }

    #[test]
    fn test_release_hook_fires_on_last_reference() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let item = item().with_release_hook(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        item.add_ref();
        item.add_ref();
        item.remove_ref();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        item.remove_ref();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(item.ref_count(), 0);
    }

    #[test]
    fn test_listeners_notified_and_pruned() {
        let item = item();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn SubjectListener> = Arc::downgrade(&recorder) as Weak<dyn SubjectListener>;
        item.add_listener(weak);

        item.set_data(Some(ImageData::from_fn(2, 2, |x, _| x as f32)));
        item.set_display_limits(Some((0.0, 1.0)));
        assert_eq!(recorder.content.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.keys.lock(), vec![DISPLAY_LIMITS.to_string()]);

        drop(recorder);
        item.set_data(None);
        assert!(item.listeners.lock().is_empty());
    }

    #[test]
    fn test_display_range_prefers_limits() {
        let item = item().with_data(ImageData::from_fn(4, 1, |x, _| x as f32));
        assert_eq!(item.display_range(), Some((0.0, 3.0)));
        item.set_display_limits(Some((1.0, 2.0)));
        assert_eq!(item.display_range(), Some((1.0, 2.0)));
        item.set_display_limits(None);
        assert_eq!(item.display_limits(), None);
    }

    #[test]
    fn test_title_and_close() {
        let item = item();
        assert_eq!(item.title(), "sample");
        assert!(!item.is_closed());
        item.close();
        assert!(item.is_closed());
        let err = item
            .add_shared_task(CacheSlot::Thumbnail, None, Box::new(|| Ok(())))
            .unwrap_err();
        assert!(matches!(err, Error::SubjectClosed));
    }
}
