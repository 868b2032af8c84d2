//! Shared-task dispatch on a rayon thread pool.
//!
//! Jobs are keyed by `(CacheSlot, Option<u64>)`. While a job is queued but not
//! yet started, submitting another job under the same key replaces it, so a
//! burst of identical requests collapses into the latest one. Replaced and
//! cleared jobs are dropped without running; anything a job must undo when it
//! never runs belongs in a guard the job owns.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{CacheSlot, Error, Result};

/// A unit of asynchronous work.
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Deduplication key for shared tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub slot: CacheSlot,
    pub key: Option<u64>,
}

impl TaskKey {
    #[must_use]
    pub fn new(slot: CacheSlot, key: Option<u64>) -> Self {
        Self { slot, key }
    }
}

/// Anything that can run keyed jobs asynchronously.
pub trait TaskDispatcher: Send + Sync {
    /// Schedules `job`, replacing a queued job with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DispatcherClosed`] once the dispatcher has shut down.
    fn add_shared_task(&self, slot: CacheSlot, key: Option<u64>, job: Job) -> Result<()>;

    /// Drops every queued-but-not-started job for `slot`.
    fn clear_tasks(&self, slot: CacheSlot) -> usize;
}

/// Configuration for [`SharedTaskQueue`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueueConfig {
    /// Worker threads; 0 lets rayon choose.
    pub num_threads: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            thread_name_prefix: "histoscope-task".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Runs `job`, turning a panic into a failure so the calling thread survives.
fn run_job(slot: CacheSlot, job: Job) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::error!("shared task {slot} failed: {e}");
            false
        }
        Err(_) => {
            log::error!("shared task {slot} panicked");
            false
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: Mutex<HashMap<TaskKey, Job>>,
    /// Spawned pool tasks that have not finished yet.
    outstanding: Mutex<usize>,
    idle: Condvar,
    closed: AtomicBool,
    completed: AtomicUsize,
    failures: AtomicUsize,
}

impl QueueState {
    fn finish_one(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn run(&self, key: TaskKey) {
        let job = self.pending.lock().remove(&key);
        if let Some(job) = job {
            if run_job(key.slot, job) {
                self.completed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.finish_one();
    }
}

/// Keyed, deduplicating job queue backed by a dedicated rayon pool.
pub struct SharedTaskQueue {
    pool: rayon::ThreadPool,
    state: Arc<QueueState>,
}

impl SharedTaskQueue {
    /// Builds a queue with its own thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the pool cannot be created.
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let prefix = config.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        Ok(Self {
            pool,
            state: Arc::new(QueueState::default()),
        })
    }

    /// Blocks until no job is queued or running.
    pub fn wait_idle(&self) {
        let mut outstanding = self.state.outstanding.lock();
        while *outstanding > 0 {
            self.state.idle.wait(&mut outstanding);
        }
    }

    /// Stops accepting jobs, drops queued ones, and waits for running ones.
    pub fn shutdown(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped: Vec<Job> = self.state.pending.lock().drain().map(|(_, job)| job).collect();
        if !dropped.is_empty() {
            log::debug!("shared task queue dropped {} queued jobs", dropped.len());
        }
        drop(dropped);
        // A job holding the last handle to our owner can drop us from a pool thread.
        if self.pool.current_thread_index().is_some() {
            log::debug!("shared task queue shut down from its own worker; not waiting");
            return;
        }
        self.wait_idle();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Jobs currently queued and not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.pending.lock().len()
    }

    /// Jobs that ran to completion without error.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.state.completed.load(Ordering::Relaxed)
    }

    /// Jobs that returned an error or panicked.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.state.failures.load(Ordering::Relaxed)
    }
}

impl TaskDispatcher for SharedTaskQueue {
    fn add_shared_task(&self, slot: CacheSlot, key: Option<u64>, job: Job) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DispatcherClosed);
        }
        let task_key = TaskKey::new(slot, key);
        let replaced = {
            let mut pending = self.state.pending.lock();
            let replaced = pending.insert(task_key, job);
            if replaced.is_none() {
                *self.state.outstanding.lock() += 1;
            }
            replaced
        };

        match replaced {
            Some(old) => {
                log::trace!("coalesced queued task for {slot}");
                drop(old);
            }
            None => {
                let state = Arc::clone(&self.state);
                self.pool.spawn(move || state.run(task_key));
            }
        }
        Ok(())
    }

    fn clear_tasks(&self, slot: CacheSlot) -> usize {
        let removed: Vec<Job> = {
            let mut pending = self.state.pending.lock();
            let keys: Vec<TaskKey> = pending.keys().filter(|k| k.slot == slot).copied().collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };
        removed.len()
    }
}

impl Drop for SharedTaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs every job immediately on the calling thread.
///
/// Useful where deterministic ordering matters more than parallelism.
#[derive(Debug, Default)]
pub struct InlineDispatcher {
    failures: AtomicUsize,
}

impl InlineDispatcher {
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl TaskDispatcher for InlineDispatcher {
    fn add_shared_task(&self, slot: CacheSlot, _key: Option<u64>, job: Job) -> Result<()> {
        if !run_job(slot, job) {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn clear_tasks(&self, _slot: CacheSlot) -> usize {
        0
    }
}
