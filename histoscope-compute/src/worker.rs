//! Throttled background recomputation of a derived artifact.
//!
//! Change notifications arrive from any thread at any rate. A dedicated
//! thread coalesces them, computes the artifact for the most recent subject,
//! and publishes the result, never starting two passes closer together than
//! the configured minimum interval.
//!
//! # Hand-off
//!
//! The pending slot holds at most one [`SubjectRef`]. `notify` swaps a new
//! guard in and drops the one it replaced; the loop moves the guard out under
//! the same lock. Every acquired reference therefore has exactly one owner at
//! any instant and is released exactly once, by whoever drops the guard.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use histoscope_core::{Error, Result, Subject, SubjectRef};
use parking_lot::{Condvar, Mutex};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for [`ThrottledRecomputeWorker`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorkerConfig {
    /// Minimum time between the end of one pass and the start of the next.
    pub minimum_interval: Duration,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            minimum_interval: Duration::from_millis(200),
            thread_name: "histoscope-recompute".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_minimum_interval(mut self, interval: Duration) -> Self {
        self.minimum_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Compute and publish steps run on the worker thread.
pub trait RecomputeHandler<S: Subject + ?Sized>: Send + 'static {
    type Output: Send + 'static;

    /// Produces the derived artifact for `subject`.
    ///
    /// # Errors
    ///
    /// An error skips the publish step for this pass; the previously
    /// published artifact stays in place.
    fn compute(&mut self, subject: &Arc<S>) -> Result<Option<Self::Output>>;

    /// Delivers the artifact; `None` means "clear the display".
    fn publish(&mut self, output: Option<Self::Output>);
}

/// [`RecomputeHandler`] built from two closures.
pub struct FnHandler<C, P, T> {
    compute: C,
    publish: P,
    _output: PhantomData<fn() -> T>,
}

impl<C, P, T> FnHandler<C, P, T>
where
    P: FnMut(Option<T>),
{
    pub fn new(compute: C, publish: P) -> Self {
        Self {
            compute,
            publish,
            _output: PhantomData,
        }
    }
}

impl<S, C, P, T> RecomputeHandler<S> for FnHandler<C, P, T>
where
    S: Subject + ?Sized,
    C: FnMut(&Arc<S>) -> Result<Option<T>> + Send + 'static,
    P: FnMut(Option<T>) + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn compute(&mut self, subject: &Arc<S>) -> Result<Option<T>> {
        (self.compute)(subject)
    }

    fn publish(&mut self, output: Option<T>) {
        (self.publish)(output);
    }
}

struct Pending<S: Subject + ?Sized> {
    subject: Option<SubjectRef<S>>,
    /// A notification (possibly of "no subject") arrived since the last pass.
    notified: bool,
    shutdown: bool,
}

struct Shared<S: Subject + ?Sized> {
    pending: Mutex<Pending<S>>,
    wake: Condvar,
    passes: AtomicU64,
}

/// Dedicated thread that recomputes a derived artifact for the latest subject.
pub struct ThrottledRecomputeWorker<S, H>
where
    S: Subject + ?Sized + 'static,
    H: RecomputeHandler<S>,
{
    config: WorkerConfig,
    shared: Arc<Shared<S>>,
    handler: Option<H>,
    thread: Option<JoinHandle<()>>,
}

impl<S, H> ThrottledRecomputeWorker<S, H>
where
    S: Subject + ?Sized + 'static,
    H: RecomputeHandler<S>,
{
    /// Creates a worker without starting its thread.
    pub fn new(config: WorkerConfig, handler: H) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending {
                    subject: None,
                    notified: false,
                    shutdown: false,
                }),
                wake: Condvar::new(),
                passes: AtomicU64::new(0),
            }),
            handler: Some(handler),
            thread: None,
        }
    }

    /// Creates and starts a worker.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn(config: WorkerConfig, handler: H) -> Result<Self> {
        let mut worker = Self::new(config, handler);
        worker.start()?;
        Ok(worker)
    }

    /// Starts the processing loop. Call once, after construction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on a second call, or an I/O error if
    /// the thread cannot be spawned.
    pub fn start(&mut self) -> Result<()> {
        let Some(handler) = self.handler.take() else {
            return Err(Error::AlreadyStarted);
        };
        let shared = Arc::clone(&self.shared);
        let interval = self.config.minimum_interval;
        let thread = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_loop(&shared, handler, interval))?;
        self.thread = Some(thread);
        log::debug!("{} started", self.config.thread_name);
        Ok(())
    }

    /// Records `subject` as the latest subject of interest.
    ///
    /// Acquires one reference on `subject` and releases the one held for any
    /// subject it replaces. Never blocks on computation. Must not be called
    /// after [`close`](Self::close).
    pub fn notify(&self, subject: Option<Arc<S>>) {
        let incoming = subject.map(SubjectRef::acquire);
        let replaced = {
            let mut pending = self.shared.pending.lock();
            if pending.shutdown {
                drop(pending);
                log::warn!("notify called on closed worker {}", self.config.thread_name);
                return;
            }
            pending.notified = true;
            std::mem::replace(&mut pending.subject, incoming)
        };
        self.shared.wake.notify_one();
        if replaced.is_some() {
            log::trace!("coalesced unclaimed subject");
        }
        drop(replaced);
    }

    /// Stops the loop, waits for it to exit, and releases any unclaimed subject.
    ///
    /// No compute or publish step runs after this returns.
    pub fn close(&mut self) {
        self.shared.pending.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{} exited abnormally", self.config.thread_name);
            }
            log::debug!("{} stopped", self.config.thread_name);
        }
        let residual = self.shared.pending.lock().subject.take();
        drop(residual);
    }

    /// Completed loop passes that processed a notification.
    #[must_use]
    pub fn pass_count(&self) -> u64 {
        self.shared.passes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

impl<S, H> Drop for ThrottledRecomputeWorker<S, H>
where
    S: Subject + ?Sized + 'static,
    H: RecomputeHandler<S>,
{
    fn drop(&mut self) {
        self.close();
    }
}

fn run_loop<S, H>(shared: &Shared<S>, mut handler: H, interval: Duration)
where
    S: Subject + ?Sized,
    H: RecomputeHandler<S>,
{
    let mut last_pass = Instant::now();
    loop {
        let taken = {
            let mut pending = shared.pending.lock();
            if interval.is_zero() {
                while !pending.notified && !pending.shutdown {
                    shared.wake.wait(&mut pending);
                }
            } else {
                let deadline = last_pass + interval;
                while !pending.shutdown && Instant::now() < deadline {
                    shared.wake.wait_until(&mut pending, deadline);
                }
            }
            if pending.shutdown {
                break;
            }
            if pending.notified {
                pending.notified = false;
                Some(pending.subject.take())
            } else {
                None
            }
        };

        if let Some(subject) = taken {
            run_pass(&mut handler, subject);
            shared.passes.fetch_add(1, Ordering::AcqRel);
        }
        last_pass = Instant::now();
    }
}

fn run_pass<S, H>(handler: &mut H, subject: Option<SubjectRef<S>>)
where
    S: Subject + ?Sized,
    H: RecomputeHandler<S>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let computed = match &subject {
            Some(s) => handler.compute(s.subject()),
            None => Ok(None),
        };
        match computed {
            Ok(output) => handler.publish(output),
            Err(e) => log::error!("recompute failed: {e}"),
        }
    }));
    if outcome.is_err() {
        log::error!("recompute step panicked; loop continues");
    }
    drop(subject);
}
