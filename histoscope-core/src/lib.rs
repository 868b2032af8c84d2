//! histoscope-core: Subject contract and shared infrastructure.
//!
//! This crate provides the pieces every derived-value computation relies on:
//! reference-counted subjects and their scoped guard, typed cache slots,
//! generation-checked owner handles, and keyed shared-task dispatch.
//!

pub mod cache;
pub mod data_item;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod property;
pub mod registry;
pub mod subject;

pub use cache::{CacheSlot, CachedValue, DirtyState};
pub use data_item::{DataItem, LiveStatus, ReleaseHook};
pub use dispatch::{InlineDispatcher, Job, QueueConfig, SharedTaskQueue, TaskDispatcher, TaskKey};
pub use error::{Error, Result};
pub use image::ImageData;
pub use property::PropertyValue;
pub use registry::{SubjectHandle, SubjectRegistry};
pub use subject::{RefCount, Subject, SubjectListener, SubjectRef};
