//! histoscope CLI - Histograms of raw image files and panel simulation.
//!
//! `histogram` bins a raw little-endian `f32` image and prints the result.
//! `simulate` drives a histogram panel and data browser with a burst of
//! selection changes and reports how many passes the worker actually ran.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};

use histoscope_compute::{
    Histogram, HistogramConfig, LazyCachedComputation, Statistics, StatisticsProcessor,
    WorkerConfig,
};
use histoscope_core::{
    DataItem, ImageData, QueueConfig, SharedTaskQueue, Subject, SubjectRegistry, TaskDispatcher,
};
use histoscope_panel::{DataListController, HistogramPanel, HistogramPanelConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] histoscope_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} contains no finite samples")]
    NoFiniteData(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Image histograms and background-recompute panel simulation.
#[derive(Parser)]
#[command(name = "histoscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the histogram and statistics of a raw f32 image
    Histogram {
        /// Raw little-endian f32 image file
        input: PathBuf,

        /// Image width in pixels
        #[arg(long)]
        width: usize,

        /// Image height in pixels
        #[arg(long)]
        height: usize,

        /// Number of histogram buckets
        #[arg(short, long, default_value = "32")]
        bins: usize,

        /// Bytes to skip before the pixel data
        #[arg(long, default_value = "0")]
        header_bytes: usize,

        /// Only bin values inside this range
        #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
        range: Option<Vec<f64>>,

        /// Emit JSON instead of a text chart
        #[arg(long)]
        json: bool,
    },
    /// Drive a histogram panel with a burst of selection changes
    Simulate {
        /// Number of synthetic data items
        #[arg(long, default_value = "4")]
        items: usize,

        /// Selection changes in the burst
        #[arg(short, long, default_value = "100")]
        notifications: usize,

        /// Minimum interval between worker passes (ms)
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Duration over which the burst is spread (ms)
        #[arg(long, default_value = "50")]
        burst_ms: u64,

        /// Side length of the synthetic images
        #[arg(long, default_value = "256")]
        size: usize,

        /// Shared task queue threads (0 = one per core)
        #[arg(long, default_value = "0")]
        threads: usize,
    },
}

/// Width of the longest bar in the text chart.
const BAR_WIDTH: f32 = 50.0;

fn main() {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Histogram {
            input,
            width,
            height,
            bins,
            header_bytes,
            range,
            json,
        } => {
            let range = match range.as_deref() {
                None => None,
                Some(&[lo, hi]) => Some((lo, hi)),
                Some(_) => {
                    return Err(CliError::InvalidArgument(
                        "--range takes exactly two values".into(),
                    ))
                }
            };
            let image = ImageData::read_raw(&input, width, height, header_bytes)?;
            let config = HistogramConfig::new().with_bins(bins).with_range(range);
            let histogram = Histogram::compute(&image, &config)?
                .ok_or_else(|| CliError::NoFiniteData(input.clone()))?;
            let stats = Statistics::compute(&image);

            if json {
                let report = serde_json::json!({
                    "file": input.display().to_string(),
                    "width": width,
                    "height": height,
                    "statistics": stats,
                    "histogram": histogram,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_histogram(&histogram);
                if let Some(s) = stats {
                    println!();
                    println!("Samples: {}", s.count);
                    println!("Min: {:.6}  Max: {:.6}", s.min, s.max);
                    println!("Mean: {:.6}  Std dev: {:.6}", s.mean, s.std_dev);
                }
            }
        }
        Commands::Simulate {
            items,
            notifications,
            interval_ms,
            burst_ms,
            size,
            threads,
        } => simulate(items, notifications, interval_ms, burst_ms, size, threads)?,
    }
    Ok(())
}

fn print_histogram(histogram: &Histogram) {
    let (lo, hi) = histogram.range();
    let step = (hi - lo) / histogram.len() as f32;
    let peak = histogram.counts().iter().copied().max().unwrap_or(0).max(1);
    for (i, &count) in histogram.counts().iter().enumerate() {
        let start = lo + step * i as f32;
        let bar = (count as f32 / peak as f32 * BAR_WIDTH).round() as usize;
        println!("{:>12.4} | {:<50} {}", start, "#".repeat(bar), count);
    }
}

fn synthetic_image(size: usize, seed: usize) -> ImageData {
    let center = size as f32 / 2.0;
    let scale = 1.0 + seed as f32;
    ImageData::from_fn(size, size, |x, y| {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        (-(dx * dx + dy * dy) / (size as f32 * scale)).exp() * 1000.0
    })
}

fn wait_for_histogram(panel: &mut HistogramPanel, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if panel.handle_messages() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn simulate(
    items: usize,
    notifications: usize,
    interval_ms: u64,
    burst_ms: u64,
    size: usize,
    threads: usize,
) -> Result<()> {
    if items == 0 {
        return Err(CliError::InvalidArgument("--items must be at least 1".into()));
    }
    let queue = Arc::new(SharedTaskQueue::new(&QueueConfig::new().with_num_threads(threads))?);
    let dispatcher: Arc<dyn TaskDispatcher> = Arc::clone(&queue) as Arc<dyn TaskDispatcher>;

    let mut browser = DataListController::default();
    let data_items: Vec<Arc<DataItem>> = (0..items)
        .map(|i| {
            Arc::new(
                DataItem::new(&format!("synthetic {i}"), Arc::clone(&dispatcher))
                    .with_data(synthetic_image(size, i)),
            )
        })
        .collect();
    for item in &data_items {
        browser.display_item_inserted(Arc::clone(item), browser.display_item_count());
    }

    let interval = Duration::from_millis(interval_ms);
    let config = HistogramPanelConfig::new()
        .with_worker(WorkerConfig::new().with_minimum_interval(interval));
    let mut panel = HistogramPanel::new(config)?;
    panel.size_changed(256.0, 100.0);

    println!(
        "Sending {} selection changes over {} ms (minimum interval {} ms)",
        notifications, burst_ms, interval_ms
    );
    let steps = u32::try_from(notifications.max(1)).unwrap_or(u32::MAX);
    let pause = Duration::from_millis(burst_ms) / steps;
    let start = Instant::now();
    for n in 0..notifications {
        let selected = browser.set_selected_index(Some(n % items));
        panel.selected_data_item_changed(selected);
        thread::sleep(pause);
    }
    let burst = start.elapsed();

    // Let every throttled pass that the burst can cause run to completion.
    thread::sleep(interval * 2 + Duration::from_millis(50));
    panel.handle_messages();
    let passes = panel.pass_count();

    println!("Burst took {:.1} ms", burst.as_secs_f64() * 1000.0);
    println!("Worker passes: {} for {} notifications", passes, notifications);
    if let Some(item) = panel.data_item() {
        println!("Panel shows: {}", item.title());
    }
    if let Some(h) = panel.histogram() {
        println!("Histogram: {} buckets, {} samples", h.len(), h.total());
    }

    // Drag out the middle half of the histogram and let the panel catch up.
    panel.mouse_pressed(64.0);
    panel.mouse_position_changed(192.0);
    panel.mouse_released();
    if let Some(item) = browser.selected_item() {
        if let Some((lo, hi)) = item.display_limits() {
            println!("Display limits set to {:.3} .. {:.3}", lo, hi);
        }
        panel.selected_data_item_changed(Some(item));
        if !wait_for_histogram(&mut panel, interval * 4 + Duration::from_secs(1)) {
            log::warn!("no histogram after changing display limits");
        }
    }

    for index in 0..browser.display_item_count() {
        if let Some(row) = browser.display_item(index) {
            row.thumbnail();
        }
    }
    queue.wait_idle();
    let repaint = browser.handle_messages();
    for index in 0..browser.display_item_count() {
        if let Some(row) = browser.display_item(index) {
            let thumb = row
                .thumbnail()
                .map_or_else(|| "-".to_string(), |t| format!("{}x{}", t.width(), t.height()));
            println!(
                "{:<14} {:<14} thumbnail {:<8} {}",
                row.title_str(),
                row.format_str(),
                thumb,
                row.datetime_str()
            );
        }
    }
    println!("Rows needing repaint: {}", repaint.len());

    if let Some(item) = browser.selected_item() {
        let registry: Arc<SubjectRegistry<dyn Subject>> = Arc::new(SubjectRegistry::new());
        let handle = registry.insert(Arc::clone(&item) as Arc<dyn Subject>);
        let statistics =
            LazyCachedComputation::new(StatisticsProcessor, Arc::clone(&registry), handle);
        item.add_listener(statistics.listener());
        statistics.get_data(&(), None);
        queue.wait_idle();
        if let Some(s) = statistics.get_data(&(), None) {
            println!(
                "Selected '{}': mean {:.3}, std dev {:.3} over {} samples",
                item.title(),
                s.mean,
                s.std_dev,
                s.count
            );
        }
        statistics.close();
        registry.remove(handle);
    }

    panel.close();
    browser.close();
    queue.shutdown();

    let leaked: usize = data_items.iter().map(|i| i.ref_count()).sum();
    println!("Outstanding references after close: {}", leaked);
    println!(
        "Shared tasks: {} completed, {} failed",
        queue.completed_count(),
        queue.failure_count()
    );
    Ok(())
}
