//! Lazily computed, cache-invalidated derived values.
//!
//! A [`LazyCachedComputation`] answers reads synchronously with the best
//! value it has, and refreshes stale values on the owning subject's shared
//! task dispatcher with at most one computation in flight per instance.
//!
//! Staleness is the union of a local shadow flag and the subject's own dirty
//! flag for the processor's cache slot. A computation that started before a
//! newer dirty signal still stores its (older) result, but the entry stays
//! dirty so the next read schedules a fresh computation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use histoscope_core::{
    CacheSlot, DirtyState, ImageData, Job, PropertyValue, Result, Subject, SubjectHandle,
    SubjectListener, SubjectRegistry,
};
use parking_lot::{Condvar, Mutex};

/// Callback receiving the freshly computed value, or the default when there
/// was nothing to compute from.
pub type Completion<T> = Box<dyn FnOnce(Option<T>) + Send + 'static>;

/// Source of per-instance task keys, so queued jobs only coalesce with jobs
/// from the same computation.
static NEXT_TASK_KEY: AtomicU64 = AtomicU64::new(0);

/// Pure calculation and configuration for one derived value.
pub trait Processor: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;
    /// Caller-supplied rendering parameters.
    type Context: Clone + Send + 'static;

    /// The cache slot this value occupies on its subject.
    fn slot(&self) -> CacheSlot;

    /// Derives the value from raw upstream data.
    ///
    /// # Errors
    ///
    /// Errors are logged, leave the cached value untouched, and are handed to
    /// the dispatcher.
    fn calculate(&self, context: &Self::Context, data: &ImageData) -> Result<Option<Self::Output>>;

    /// Fallback returned while nothing has been computed.
    fn default_data(&self) -> Option<Self::Output> {
        None
    }

    /// The subject providing raw data. Defaults to the owning subject.
    fn data_item(&self, owner: &Arc<dyn Subject>) -> Option<Arc<dyn Subject>> {
        Some(Arc::clone(owner))
    }

    /// Whether a change to property `key` invalidates the value.
    fn depends_on_property(&self, _key: &str, _value: &PropertyValue) -> bool {
        false
    }
}

struct CacheEntry<T> {
    value: Option<T>,
    dirty: DirtyState,
    in_progress: bool,
    /// Bumped on every dirty signal.
    generation: u64,
}

struct Inner<P: Processor> {
    processor: P,
    registry: Arc<SubjectRegistry<dyn Subject>>,
    owner: SubjectHandle,
    task_key: u64,
    entry: Mutex<CacheEntry<P::Output>>,
    finished: Condvar,
    closed: AtomicBool,
}

impl<P: Processor> Inner<P> {
    fn mark_dirty(&self) {
        if let Some(owner) = self.registry.get(self.owner) {
            owner.set_cached_value_dirty(self.processor.slot());
        }
        let mut entry = self.entry.lock();
        entry.dirty = DirtyState::Dirty;
        entry.generation = entry.generation.wrapping_add(1);
    }

    fn current_or_default(&self) -> Option<P::Output> {
        let value = self.entry.lock().value.clone();
        value.or_else(|| self.processor.default_data())
    }
}

impl<P: Processor> SubjectListener for Inner<P> {
    fn content_changed(&self) {
        self.mark_dirty();
    }

    fn property_changed(&self, key: &str, value: &PropertyValue) {
        if self.processor.depends_on_property(key, value) {
            self.mark_dirty();
        }
    }
}

/// Marks a computation in flight; dropping it (run or not) clears the mark.
struct InFlight<P: Processor> {
    inner: Arc<Inner<P>>,
}

impl<P: Processor> Drop for InFlight<P> {
    fn drop(&mut self) {
        self.inner.entry.lock().in_progress = false;
        self.inner.finished.notify_all();
    }
}

/// Single-flight, dirty-gated asynchronous cache for one derived value.
pub struct LazyCachedComputation<P: Processor> {
    inner: Arc<Inner<P>>,
}

impl<P: Processor> LazyCachedComputation<P> {
    /// Creates a computation for the subject behind `owner`.
    pub fn new(
        processor: P,
        registry: Arc<SubjectRegistry<dyn Subject>>,
        owner: SubjectHandle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                processor,
                registry,
                owner,
                task_key: NEXT_TASK_KEY.fetch_add(1, Ordering::Relaxed),
                entry: Mutex::new(CacheEntry {
                    value: None,
                    dirty: DirtyState::Unset,
                    in_progress: false,
                    generation: 0,
                }),
                finished: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn processor(&self) -> &P {
        &self.inner.processor
    }

    #[must_use]
    pub fn owner(&self) -> SubjectHandle {
        self.inner.owner
    }

    /// Weak listener to register on the owning subject.
    #[must_use]
    pub fn listener(&self) -> Weak<dyn SubjectListener> {
        let weak: Weak<Inner<P>> = Arc::downgrade(&self.inner);
        weak
    }

    /// Invalidates the local shadow and the subject's cache slot.
    pub fn mark_dirty(&self) {
        self.inner.mark_dirty();
    }

    /// Raw content of the subject changed.
    pub fn on_subject_content_changed(&self) {
        self.inner.content_changed();
    }

    /// A property of the subject changed.
    pub fn on_subject_property_changed(&self, key: &str, value: &PropertyValue) {
        self.inner.property_changed(key, value);
    }

    /// Returns the best available value without blocking on computation.
    ///
    /// When the value is stale and no computation is in flight, schedules one
    /// on the subject's dispatcher. `on_complete` runs on the dispatcher
    /// thread after that computation stores its result; it is dropped
    /// unused if no computation was scheduled by this call.
    pub fn get_data(
        &self,
        context: &P::Context,
        on_complete: Option<Completion<P::Output>>,
    ) -> Option<P::Output> {
        debug_assert!(
            !self.inner.closed.load(Ordering::SeqCst),
            "get_data called after close"
        );
        let inner = &self.inner;
        let Some(owner) = inner.registry.get(inner.owner) else {
            return inner.current_or_default();
        };
        let slot = inner.processor.slot();
        let owner_dirty = owner.is_cached_value_dirty(slot);

        let scheduled_generation = {
            let mut entry = inner.entry.lock();
            if entry.dirty == DirtyState::Unset && !owner_dirty {
                let stored = owner
                    .get_cached_value(slot)
                    .and_then(|v| v.downcast_ref::<P::Output>().cloned());
                if let Some(value) = stored {
                    entry.value = Some(value);
                    entry.dirty = DirtyState::Clean;
                }
            }
            let stale = entry.dirty.needs_compute() || owner_dirty;
            if stale && !entry.in_progress {
                entry.in_progress = true;
                Some(entry.generation)
            } else {
                None
            }
        };

        if let Some(generation) = scheduled_generation {
            let guard = InFlight {
                inner: Arc::clone(inner),
            };
            let source = inner.processor.data_item(&owner);
            let job_owner = Arc::clone(&owner);
            let context = context.clone();
            let job: Job = Box::new(move || {
                run_computation(guard, &job_owner, source, &context, generation, on_complete)
            });
            if let Err(e) = owner.add_shared_task(slot, Some(inner.task_key), job) {
                log::warn!("could not schedule {slot} computation: {e}");
            }
        }

        inner.current_or_default()
    }

    /// Last computed value, without scheduling anything.
    #[must_use]
    pub fn cached(&self) -> Option<P::Output> {
        self.inner.entry.lock().value.clone()
    }

    #[must_use]
    pub fn dirty_state(&self) -> DirtyState {
        self.inner.entry.lock().dirty
    }

    #[must_use]
    pub fn is_computing(&self) -> bool {
        self.inner.entry.lock().in_progress
    }

    /// Blocks until the in-flight computation, if any, has finished.
    ///
    /// No completion callback fires after this returns. Must not be called
    /// from a completion callback.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut entry = self.inner.entry.lock();
        while entry.in_progress {
            self.inner.finished.wait(&mut entry);
        }
    }
}

fn run_computation<P: Processor>(
    guard: InFlight<P>,
    owner: &Arc<dyn Subject>,
    source: Option<Arc<dyn Subject>>,
    context: &P::Context,
    generation: u64,
    on_complete: Option<Completion<P::Output>>,
) -> Result<()> {
    let inner = &guard.inner;
    let slot = inner.processor.slot();

    let data = source.filter(|s| !s.is_closed()).and_then(|s| s.data());
    let calculated = match data {
        Some(data) => inner.processor.calculate(context, &data),
        None => Ok(None),
    };
    let calculated = match calculated {
        Ok(value) => value,
        Err(e) => {
            log::error!("{slot} computation failed: {e}");
            return Err(e);
        }
    };

    let result = if let Some(value) = calculated {
        owner.set_cached_value(slot, Arc::new(value.clone()));
        let superseded = {
            let mut entry = inner.entry.lock();
            entry.value = Some(value.clone());
            let superseded = entry.generation != generation;
            entry.dirty = if superseded {
                DirtyState::Dirty
            } else {
                DirtyState::Clean
            };
            superseded
        };
        if superseded {
            log::trace!("{slot} changed during computation; kept dirty");
            owner.set_cached_value_dirty(slot);
        }
        Some(value)
    } else {
        owner.remove_cached_value(slot);
        {
            let mut entry = inner.entry.lock();
            entry.value = None;
            entry.dirty = DirtyState::Unset;
        }
        inner.processor.default_data()
    };

    if let Some(done) = on_complete {
        done(result);
    }
    drop(guard);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use histoscope_core::{DataItem, Error, InlineDispatcher, QueueConfig, SharedTaskQueue};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Sum {
        calls: Arc<AtomicUsize>,
    }

    impl Processor for Sum {
        type Output = f64;
        type Context = ();

        fn slot(&self) -> CacheSlot {
            CacheSlot::Statistics
        }

        fn calculate(&self, _context: &(), data: &ImageData) -> Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if data.pixels().iter().any(|v| v.is_nan()) {
                return Err(Error::compute("nan in data"));
            }
            Ok(Some(data.pixels().iter().map(|&v| f64::from(v)).sum()))
        }

        fn default_data(&self) -> Option<f64> {
            Some(-1.0)
        }

        fn depends_on_property(&self, key: &str, _value: &PropertyValue) -> bool {
            key == "gain"
        }
    }

    fn setup(
        dispatcher: Arc<dyn histoscope_core::TaskDispatcher>,
        image: Option<ImageData>,
    ) -> (Arc<DataItem>, LazyCachedComputation<Sum>, Arc<AtomicUsize>) {
        let mut item = DataItem::new("sample", dispatcher);
        if let Some(image) = image {
            item = item.with_data(image);
        }
        let item = Arc::new(item);
        let registry: Arc<SubjectRegistry<dyn Subject>> = Arc::new(SubjectRegistry::new());
        let handle = registry.insert(Arc::clone(&item) as Arc<dyn Subject>);
        let calls = Arc::new(AtomicUsize::new(0));
        let computation = LazyCachedComputation::new(
            Sum {
                calls: Arc::clone(&calls),
            },
            registry,
            handle,
        );
        item.add_listener(computation.listener());
        (item, computation, calls)
    }

    fn ones(n: usize) -> ImageData {
        ImageData::from_fn(n, 1, |_, _| 1.0)
    }

    #[test]
    fn test_inline_computes_on_first_read() {
        let (_item, comp, calls) = setup(Arc::new(InlineDispatcher::default()), Some(ones(4)));
        assert_eq!(comp.get_data(&(), None), Some(4.0));
        assert_eq!(comp.dirty_state(), DirtyState::Clean);
        assert_eq!(comp.get_data(&(), None), Some(4.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_content_change_triggers_recompute() {
        let (item, comp, calls) = setup(Arc::new(InlineDispatcher::default()), Some(ones(4)));
        comp.get_data(&(), None);
        item.set_data(Some(ones(6)));
        assert!(item.is_cached_value_dirty(CacheSlot::Statistics));
        assert_eq!(comp.dirty_state(), DirtyState::Dirty);
        assert_eq!(comp.get_data(&(), None), Some(6.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_property_dependency() {
        let (item, comp, calls) = setup(Arc::new(InlineDispatcher::default()), Some(ones(2)));
        comp.get_data(&(), None);
        item.set_property("unrelated", PropertyValue::Int(1));
        assert_eq!(comp.dirty_state(), DirtyState::Clean);
        item.set_property("gain", PropertyValue::Float(2.0));
        assert_eq!(comp.dirty_state(), DirtyState::Dirty);
        comp.get_data(&(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_keeps_previous_value() {
        let dispatcher = Arc::new(InlineDispatcher::default());
        let (item, comp, _calls) = setup(dispatcher.clone(), Some(ones(3)));
        assert_eq!(comp.get_data(&(), None), Some(3.0));

        item.set_data(Some(ImageData::from_fn(2, 1, |_, _| f32::NAN)));
        assert_eq!(comp.get_data(&(), None), Some(3.0));
        assert_eq!(dispatcher.failure_count(), 1);
        assert!(!comp.is_computing());
        assert_eq!(comp.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn test_owner_removed_returns_best_value() {
        let (_item, comp, calls) = setup(Arc::new(InlineDispatcher::default()), Some(ones(2)));
        comp.get_data(&(), None);
        comp.inner.registry.remove(comp.owner());
        comp.mark_dirty();
        assert_eq!(comp.get_data(&(), None), Some(2.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adopts_fresh_subject_cache() {
        let (item, comp, calls) = setup(Arc::new(InlineDispatcher::default()), Some(ones(2)));
        item.set_cached_value(CacheSlot::Statistics, Arc::new(42.0f64));
        assert_eq!(comp.get_data(&(), None), Some(42.0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_completion_receives_value() {
        let queue = Arc::new(SharedTaskQueue::new(&QueueConfig::new().with_num_threads(2)).unwrap());
        let (_item, comp, _calls) = setup(queue.clone(), Some(ones(5)));
        let (tx, rx) = mpsc::channel();
        let first = comp.get_data(
            &(),
            Some(Box::new(move |v| {
                tx.send(v).ok();
            })),
        );
        assert!(first == Some(-1.0) || first == Some(5.0));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(5.0));
        comp.close();
        assert_eq!(comp.cached(), Some(5.0));
    }
}
