//! Owner registry with generation-checked handles.
//!
//! Derived-value computations point back at their owning subject through a
//! [`SubjectHandle`] rather than a strong reference. Resolving the handle
//! fails once the owner has been removed, even if its slot was reused.

use std::sync::Arc;

use parking_lot::RwLock;

/// Non-owning, generation-checked handle into a [`SubjectRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectHandle {
    index: u32,
    generation: u32,
}

impl SubjectHandle {
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

struct Entry<S: ?Sized> {
    generation: u32,
    subject: Option<Arc<S>>,
}

struct Slots<S: ?Sized> {
    entries: Vec<Entry<S>>,
    free: Vec<u32>,
}

/// Slab of live subjects addressed by [`SubjectHandle`].
pub struct SubjectRegistry<S: ?Sized> {
    slots: RwLock<Slots<S>>,
}

impl<S: ?Sized> Default for SubjectRegistry<S> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }
}

impl<S: ?Sized> SubjectRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subject` and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots are allocated.
    pub fn insert(&self, subject: Arc<S>) -> SubjectHandle {
        let mut slots = self.slots.write();
        if let Some(index) = slots.free.pop() {
            let entry = &mut slots.entries[index as usize];
            entry.subject = Some(subject);
            return SubjectHandle {
                index,
                generation: entry.generation,
            };
        }
        let index = u32::try_from(slots.entries.len()).expect("registry slot overflow");
        slots.entries.push(Entry {
            generation: 0,
            subject: Some(subject),
        });
        SubjectHandle {
            index,
            generation: 0,
        }
    }

    /// Resolves a handle, returning `None` if the subject has been removed.
    #[must_use]
    pub fn get(&self, handle: SubjectHandle) -> Option<Arc<S>> {
        let slots = self.slots.read();
        let entry = slots.entries.get(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.subject.clone()
    }

    #[must_use]
    pub fn contains(&self, handle: SubjectHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Unregisters the subject; outstanding handles stop resolving.
    pub fn remove(&self, handle: SubjectHandle) -> Option<Arc<S>> {
        let mut slots = self.slots.write();
        let entry = slots.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let subject = entry.subject.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        slots.free.push(handle.index);
        Some(subject)
    }

    /// Number of live subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        let slots = self.slots.read();
        slots.entries.len() - slots.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
