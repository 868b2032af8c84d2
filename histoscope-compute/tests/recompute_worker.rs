//! Hand-off, throttling, and reference accounting of the recompute worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use histoscope_compute::{
    FnHandler, Histogram, HistogramConfig, ThrottledRecomputeWorker, WorkerConfig,
};
use histoscope_core::{
    CacheSlot, CachedValue, DataItem, Error, ImageData, InlineDispatcher, Job, Result, Subject,
    TaskDispatcher,
};
use parking_lot::Mutex;

/// Subject that counts acquisitions and releases separately.
#[derive(Default)]
struct Tracked {
    id: u32,
    adds: AtomicUsize,
    removes: AtomicUsize,
}

impl Tracked {
    fn new(id: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Self::default()
        })
    }

    fn balanced(&self) -> bool {
        self.adds.load(Ordering::SeqCst) == self.removes.load(Ordering::SeqCst)
    }
}

impl Subject for Tracked {
    fn add_ref(&self) {
        self.adds.fetch_add(1, Ordering::SeqCst);
    }
    fn remove_ref(&self) {
        self.removes.fetch_add(1, Ordering::SeqCst);
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

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

#[test]
fn test_references_balance_across_interleaved_notifications() {
    let handler = FnHandler::new(
        |s: &Arc<Tracked>| -> Result<Option<u32>> {
            thread::sleep(Duration::from_micros(200));
            Ok(Some(s.id))
        },
        |_: Option<u32>| {},
    );
    let config = WorkerConfig::new().with_minimum_interval(Duration::from_millis(2));
    let mut worker: ThrottledRecomputeWorker<Tracked, _> =
        ThrottledRecomputeWorker::spawn(config, handler).unwrap();
    let a = Tracked::new(1);
    let b = Tracked::new(2);

    for i in 0..300 {
        match i % 3 {
            0 => worker.notify(Some(Arc::clone(&a))),
            1 => worker.notify(Some(Arc::clone(&b))),
            _ => worker.notify(None),
        }
        if i % 7 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    worker.close();

    assert_eq!(a.adds.load(Ordering::SeqCst), 100);
    assert_eq!(b.adds.load(Ordering::SeqCst), 100);
    assert!(a.balanced());
    assert!(b.balanced());
}

#[test]
fn test_burst_is_throttled() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&starts);
    let handler = FnHandler::new(
        move |s: &Arc<Tracked>| -> Result<Option<u32>> {
            recorded.lock().push(Instant::now());
            Ok(Some(s.id))
        },
        |_: Option<u32>| {},
    );
    let config = WorkerConfig::new().with_minimum_interval(Duration::from_millis(200));
    let mut worker: ThrottledRecomputeWorker<Tracked, _> =
        ThrottledRecomputeWorker::spawn(config, handler).unwrap();
    let subject = Tracked::new(7);

    let burst_start = Instant::now();
    for _ in 0..100 {
        worker.notify(Some(Arc::clone(&subject)));
        thread::sleep(Duration::from_micros(400));
    }
    assert!(burst_start.elapsed() < Duration::from_millis(200));
    thread::sleep(Duration::from_millis(700));
    worker.close();

    let starts = starts.lock();
    assert!(!starts.is_empty());
    assert!(starts.len() <= 2, "{} passes for one burst", starts.len());
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(180));
    }
    assert!(subject.balanced());
}

#[test]
fn test_unclaimed_subject_is_replaced_by_latest() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let handler = FnHandler::new(
        move |s: &Arc<Tracked>| -> Result<Option<u32>> {
            recorded.lock().push(s.id);
            Ok(Some(s.id))
        },
        |_: Option<u32>| {},
    );
    let mut worker: ThrottledRecomputeWorker<Tracked, _> = ThrottledRecomputeWorker::new(
        WorkerConfig::new().with_minimum_interval(Duration::ZERO),
        handler,
    );
    let a = Tracked::new(1);
    let b = Tracked::new(2);
    worker.notify(Some(Arc::clone(&a)));
    worker.notify(Some(Arc::clone(&b)));
    assert!(a.balanced());

    worker.start().unwrap();
    assert!(wait_for(Duration::from_secs(5), || worker.pass_count() >= 1));
    worker.close();

    assert_eq!(*seen.lock(), vec![2]);
    assert!(b.balanced());
}

#[test]
fn test_end_to_end_histogram_publish() {
    let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(InlineDispatcher::default());
    let item = Arc::new(
        DataItem::new("ramp", dispatcher).with_data(ImageData::from_fn(10, 10, |x, _| x as f32)),
    );
    let refs_before = item.ref_count();

    let (tx, rx) = mpsc::channel();
    let config = HistogramConfig::new().with_bins(10);
    let handler = FnHandler::new(
        move |item: &Arc<DataItem>| -> Result<Option<Histogram>> {
            let data = item.data().ok_or_else(|| Error::compute("no data"))?;
            Histogram::compute(&data, &config)
        },
        move |histogram: Option<Histogram>| {
            tx.send(histogram).ok();
        },
    );
    let mut worker: ThrottledRecomputeWorker<DataItem, _> = ThrottledRecomputeWorker::spawn(
        WorkerConfig::new().with_minimum_interval(Duration::ZERO),
        handler,
    )
    .unwrap();

    worker.notify(Some(Arc::clone(&item)));
    let histogram = rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("histogram for non-empty image");
    assert_eq!(histogram.counts(), &[10; 10]);
    assert!(wait_for(Duration::from_secs(5), || item.ref_count() == refs_before));

    worker.close();
    assert_eq!(item.ref_count(), refs_before);
}
