//! The subject contract consumed by derived-value computations.
//!
//! A subject is an externally owned, mutable source object (typically a data
//! item holding an image). Computations never own a subject outright: they
//! borrow an application-level reference through [`SubjectRef`], which
//! releases it exactly once when dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{CacheSlot, CachedValue, ImageData, Job, PropertyValue, Result};

/// Reference counting, cache storage, and task dispatch on a source object.
///
/// All methods may be called from any thread.
pub trait Subject: Send + Sync {
    /// Acquires one application-level reference.
    fn add_ref(&self);

    /// Releases one reference. Dropping the last one hands the subject back
    /// to its owner for disposal.
    fn remove_ref(&self);

    /// Whether the named cache slot has been invalidated since it was last set.
    fn is_cached_value_dirty(&self, slot: CacheSlot) -> bool;

    fn set_cached_value_dirty(&self, slot: CacheSlot);

    /// Stores a value and marks the slot clean.
    fn set_cached_value(&self, slot: CacheSlot, value: CachedValue);

    /// Clears both the value and the dirty mark.
    fn remove_cached_value(&self, slot: CacheSlot);

    /// Fast-path read of a stored value.
    fn get_cached_value(&self, _slot: CacheSlot) -> Option<CachedValue> {
        None
    }

    /// Schedules `job` asynchronously, keyed by `slot` and `key`.
    ///
    /// # Errors
    ///
    /// Fails if the subject's dispatcher no longer accepts work.
    fn add_shared_task(&self, slot: CacheSlot, key: Option<u64>, job: Job) -> Result<()>;

    /// Upstream raw data, if loaded.
    fn data(&self) -> Option<Arc<ImageData>>;

    fn is_closed(&self) -> bool;
}

/// Receives change notifications from a subject.
pub trait SubjectListener: Send + Sync {
    /// Raw content was replaced or modified.
    fn content_changed(&self);

    /// A named property changed.
    fn property_changed(&self, _key: &str, _value: &PropertyValue) {}
}

/// Scoped application-level reference to a subject.
///
/// Acquires one reference on construction and releases it exactly once on
/// drop, including during unwinding. Handing a reference to another owner is
/// a move of the guard.
pub struct SubjectRef<S: Subject + ?Sized> {
    subject: Arc<S>,
}

impl<S: Subject + ?Sized> SubjectRef<S> {
    /// Acquires a reference on `subject`.
    pub fn acquire(subject: Arc<S>) -> Self {
        subject.add_ref();
        Self { subject }
    }

    /// The underlying shared handle.
    #[must_use]
    pub fn subject(&self) -> &Arc<S> {
        &self.subject
    }
}

impl<S: Subject + ?Sized> Clone for SubjectRef<S> {
    fn clone(&self) -> Self {
        Self::acquire(Arc::clone(&self.subject))
    }
}

impl<S: Subject + ?Sized> Deref for SubjectRef<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.subject
    }
}

impl<S: Subject + ?Sized> Drop for SubjectRef<S> {
    fn drop(&mut self) {
        self.subject.remove_ref();
    }
}

impl<S: Subject + ?Sized> fmt::Debug for SubjectRef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectRef")
            .field("subject", &Arc::as_ptr(&self.subject).cast::<()>())
            .finish()
    }
}

/// Atomic application-level reference counter.
#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements and returns true when the count reached zero.
    ///
    /// A decrement at zero is a bookkeeping bug; it is logged and ignored.
    pub fn decrement(&self) -> bool {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
        {
            Ok(previous) => previous == 1,
            Err(_) => {
                log::warn!("reference released more times than acquired");
                false
            }
        }
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{InlineDispatcher, TaskDispatcher};

    #[derive(Default)]
    struct Counted {
        refs: RefCount,
        adds: AtomicUsize,
        removes: AtomicUsize,
    }

    impl Subject for Counted {
        fn add_ref(&self) {
            self.adds.fetch_add(1, Ordering::SeqCst);
            self.refs.increment();
        }
        fn remove_ref(&self) {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.refs.decrement();
        }
        fn is_cached_value_dirty(&self, _slot: CacheSlot) -> bool {
            false
        }
        fn set_cached_value_dirty(&self, _slot: CacheSlot) {}
        fn set_cached_value(&self, _slot: CacheSlot, _value: CachedValue) {}
        fn remove_cached_value(&self, _slot: CacheSlot) {}
        fn add_shared_task(&self, slot: CacheSlot, key: Option<u64>, job: Job) -> Result<()> {
            InlineDispatcher::default().add_shared_task(slot, key, job)
        }
        fn data(&self) -> Option<Arc<ImageData>> {
            None
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_guard_releases_once() {
        let subject = Arc::new(Counted::default());
        {
            let guard = SubjectRef::acquire(Arc::clone(&subject));
            assert_eq!(subject.refs.get(), 1);
            let moved = guard;
            assert_eq!(subject.refs.get(), 1);
            drop(moved);
        }
        assert_eq!(subject.adds.load(Ordering::SeqCst), 1);
        assert_eq!(subject.removes.load(Ordering::SeqCst), 1);
        assert_eq!(subject.refs.get(), 0);
    }

    #[test]
    fn test_guard_clone_acquires_again() {
        let subject = Arc::new(Counted::default());
        let a = SubjectRef::acquire(Arc::clone(&subject));
        let b = a.clone();
        assert_eq!(subject.refs.get(), 2);
        drop(a);
        drop(b);
        assert_eq!(subject.refs.get(), 0);
    }

    #[test]
    fn test_guard_released_on_unwind() {
        let subject = Arc::new(Counted::default());
        let s = Arc::clone(&subject);
        let result = std::panic::catch_unwind(move || {
            let _guard = SubjectRef::acquire(s);
            panic!("compute failed");
        });
        assert!(result.is_err());
        assert_eq!(subject.refs.get(), 0);
    }

    #[test]
    fn test_ref_count_reports_last_release() {
        let count = RefCount::new();
        count.increment();
        count.increment();
        assert!(!count.decrement());
        assert!(count.decrement());
        assert_eq!(count.get(), 0);
    }
}
