//! histoscope-compute: Background recomputation and derived image values.
//!
//! This crate provides the two scheduling primitives the panels build on:
//! - **`ThrottledRecomputeWorker`** - one thread, latest-wins hand-off,
//!   passes rate-limited to a minimum interval
//! - **`LazyCachedComputation`** - dirty-gated cache with at most one
//!   computation in flight, refreshed on the subject's dispatcher
//!
//! and the calculators behind them (histogram, thumbnail, statistics).
//!

mod histogram;
mod lazy;
mod processors;
mod statistics;
mod thumbnail;
mod worker;

pub use histogram::{Histogram, HistogramConfig};
pub use lazy::{Completion, LazyCachedComputation, Processor};
pub use processors::{HistogramProcessor, StatisticsProcessor, ThumbnailProcessor};
pub use statistics::Statistics;
pub use thumbnail::{Thumbnail, ThumbnailConfig};
pub use worker::{FnHandler, RecomputeHandler, ThrottledRecomputeWorker, WorkerConfig};
