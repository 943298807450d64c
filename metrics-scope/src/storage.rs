use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicBool, AtomicI64, AtomicU64,
            Ordering::{AcqRel, Acquire, Relaxed, Release},
        },
        Arc,
    },
    time::Duration,
};

use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::{
    reporter::{
        Backend, CachedCount, CachedGauge, CachedHistogramBucket, CachedStatsReporter,
        CachedTimer, StatsReporter,
    },
    Buckets, Tags,
};

/// Where a metric sends its values.
///
/// Decided once, when the metric is created, from the backend of the scope tree.
pub(crate) enum Sink<C: ?Sized> {
    None,
    Direct(Arc<dyn StatsReporter>),
    Cached(Box<C>),
}

impl<C: ?Sized> Sink<C> {
    fn new<F>(backend: &Backend, allocate: F) -> Self
    where
        F: FnOnce(&dyn CachedStatsReporter) -> Box<C>,
    {
        match backend {
            Backend::None => Sink::None,
            Backend::Direct(reporter) => Sink::Direct(Arc::clone(reporter)),
            Backend::Cached(reporter) => Sink::Cached(allocate(reporter.as_ref())),
        }
    }
}

pub(crate) struct AtomicCounter {
    name: String,
    tags: Arc<Tags>,
    last: AtomicI64,
    current: AtomicI64,
    sink: Sink<dyn CachedCount>,
}

impl AtomicCounter {
    /// Creates a new `AtomicCounter`, allocating a cached handle if the backend needs one.
    pub fn new(name: String, tags: Arc<Tags>, backend: &Backend) -> Self {
        let sink = Sink::new(backend, |reporter| reporter.allocate_counter(&name, &tags));
        Self { name, tags, last: AtomicI64::new(0), current: AtomicI64::new(0), sink }
    }

    pub fn increment(&self, delta: i64) {
        self.current.fetch_add(delta, Relaxed);
    }

    /// Value accumulated since the last flush.
    pub fn value(&self) -> i64 {
        let current = self.current.load(Acquire);
        current.wrapping_sub(self.last.load(Acquire))
    }

    /// Flushes the counter, returning the delta since the last flush.
    pub fn flush(&self) -> i64 {
        let current = self.current.load(Acquire);
        let last = self.last.swap(current, AcqRel);
        current.wrapping_sub(last)
    }

    /// Reports the delta since the last report, if there is one.
    pub fn report(&self) {
        let delta = self.flush();
        if delta == 0 {
            return;
        }

        match &self.sink {
            Sink::None => {}
            Sink::Direct(reporter) => reporter.report_counter(&self.name, &self.tags, delta),
            Sink::Cached(handle) => handle.report_count(delta),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Arc<Tags> {
        &self.tags
    }
}

pub(crate) struct AtomicGauge {
    name: String,
    tags: Arc<Tags>,
    inner: AtomicU64,
    updated: AtomicBool,
    sink: Sink<dyn CachedGauge>,
}

impl AtomicGauge {
    /// Creates a new `AtomicGauge`, allocating a cached handle if the backend needs one.
    pub fn new(name: String, tags: Arc<Tags>, backend: &Backend) -> Self {
        let sink = Sink::new(backend, |reporter| reporter.allocate_gauge(&name, &tags));
        Self {
            name,
            tags,
            inner: AtomicU64::new(0.0f64.to_bits()),
            updated: AtomicBool::new(false),
            sink,
        }
    }

    pub fn set(&self, value: f64) {
        self.inner.store(value.to_bits(), Release);
        self.updated.store(true, Release);
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.inner.load(Acquire))
    }

    /// Reports the current value, if the gauge was updated since the last report.
    pub fn report(&self) {
        if !self.updated.swap(false, AcqRel) {
            return;
        }

        let value = self.value();
        match &self.sink {
            Sink::None => {}
            Sink::Direct(reporter) => reporter.report_gauge(&self.name, &self.tags, value),
            Sink::Cached(handle) => handle.report_gauge(value),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Arc<Tags> {
        &self.tags
    }
}

pub(crate) struct TimerStorage {
    name: String,
    tags: Arc<Tags>,
    sink: Sink<dyn CachedTimer>,
    // Only present when there is no backend and retention was asked for.
    retained: Option<RetainedValues>,
}

struct RetainedValues {
    limit: usize,
    values: Mutex<Vec<Duration>>,
}

impl TimerStorage {
    /// Creates a new `TimerStorage`, allocating a cached handle if the backend needs one.
    ///
    /// Without a backend, up to `retain` measurements are kept for snapshots. Measurements past
    /// that limit are dropped.
    pub fn new(name: String, tags: Arc<Tags>, backend: &Backend, retain: usize) -> Self {
        let sink = Sink::new(backend, |reporter| reporter.allocate_timer(&name, &tags));
        let retained = match &sink {
            Sink::None if retain > 0 => {
                Some(RetainedValues { limit: retain, values: Mutex::new(Vec::new()) })
            }
            _ => None,
        };
        Self { name, tags, sink, retained }
    }

    /// Records a measurement, reporting it immediately.
    pub fn record(&self, interval: Duration) {
        match &self.sink {
            Sink::None => {
                if let Some(retained) = &self.retained {
                    let mut values = retained.values.lock();
                    if values.len() < retained.limit {
                        values.push(interval);
                    }
                }
            }
            Sink::Direct(reporter) => reporter.report_timer(&self.name, &self.tags, interval),
            Sink::Cached(handle) => handle.report_timer(interval),
        }
    }

    pub fn values(&self) -> Vec<Duration> {
        self.retained.as_ref().map(|retained| retained.values.lock().clone()).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Arc<Tags> {
        &self.tags
    }
}

enum BucketPairs {
    Values(Vec<(f64, f64)>),
    Durations(Vec<(Duration, Duration)>),
}

pub(crate) struct AtomicHistogram {
    name: String,
    tags: Arc<Tags>,
    buckets: Buckets,
    pairs: BucketPairs,
    counts: Box<[AtomicU64]>,
    reported: Box<[AtomicU64]>,
    sink: Sink<[Box<dyn CachedHistogramBucket>]>,
}

impl AtomicHistogram {
    /// Creates a new `AtomicHistogram`.
    ///
    /// For cached backends, a handle is allocated for every bucket, including the unbounded
    /// terminal bucket.
    pub fn new(name: String, tags: Arc<Tags>, buckets: Buckets, backend: &Backend) -> Self {
        let pairs = match &buckets {
            Buckets::Values(b) => BucketPairs::Values(b.pairs()),
            Buckets::Durations(b) => BucketPairs::Durations(b.pairs()),
        };

        let sink = Sink::new(backend, |reporter| {
            let histogram = reporter.allocate_histogram(&name, &tags, &buckets);
            match &pairs {
                BucketPairs::Values(pairs) => pairs
                    .iter()
                    .map(|(lower, upper)| histogram.value_bucket(*lower, *upper))
                    .collect(),
                BucketPairs::Durations(pairs) => pairs
                    .iter()
                    .map(|(lower, upper)| histogram.duration_bucket(*lower, *upper))
                    .collect(),
            }
        });

        let len = buckets.len() + 1;
        Self {
            name,
            tags,
            buckets,
            pairs,
            counts: (0..len).map(|_| AtomicU64::new(0)).collect(),
            reported: (0..len).map(|_| AtomicU64::new(0)).collect(),
            sink,
        }
    }

    pub fn record_value(&self, value: f64) {
        let index = match &self.buckets {
            Buckets::Values(buckets) => buckets.bucket_index(value),
            Buckets::Durations(buckets) => buckets.bucket_index(duration_from_secs(value)),
        };
        self.counts[index].fetch_add(1, Relaxed);
    }

    pub fn record_duration(&self, value: Duration) {
        let index = match &self.buckets {
            Buckets::Values(buckets) => buckets.bucket_index(value.as_secs_f64()),
            Buckets::Durations(buckets) => buckets.bucket_index(value),
        };
        self.counts[index].fetch_add(1, Relaxed);
    }

    /// Reports the cumulative count of every bucket which changed since the last report.
    pub fn report(&self) {
        for (i, count) in self.counts.iter().enumerate() {
            let count = count.load(Acquire);
            if self.reported[i].swap(count, AcqRel) == count {
                continue;
            }

            match (&self.sink, &self.pairs) {
                (Sink::None, _) => {}
                (Sink::Direct(reporter), BucketPairs::Values(pairs)) => {
                    let (lower, upper) = pairs[i];
                    reporter.report_histogram_value_samples(
                        &self.name,
                        &self.tags,
                        &self.buckets,
                        lower,
                        upper,
                        count,
                    );
                }
                (Sink::Direct(reporter), BucketPairs::Durations(pairs)) => {
                    let (lower, upper) = pairs[i];
                    reporter.report_histogram_duration_samples(
                        &self.name,
                        &self.tags,
                        &self.buckets,
                        lower,
                        upper,
                        count,
                    );
                }
                (Sink::Cached(handles), _) => handles[i].report_samples(count),
            }
        }
    }

    /// Cumulative counts keyed by bucket upper bound, for value histograms.
    pub fn value_counts(&self) -> Option<BTreeMap<OrderedFloat<f64>, u64>> {
        match &self.pairs {
            BucketPairs::Values(pairs) => Some(
                pairs
                    .iter()
                    .zip(self.counts.iter())
                    .map(|((_, upper), count)| (OrderedFloat(*upper), count.load(Acquire)))
                    .collect(),
            ),
            BucketPairs::Durations(_) => None,
        }
    }

    /// Cumulative counts keyed by bucket upper bound, for duration histograms.
    pub fn duration_counts(&self) -> Option<BTreeMap<Duration, u64>> {
        match &self.pairs {
            BucketPairs::Durations(pairs) => Some(
                pairs
                    .iter()
                    .zip(self.counts.iter())
                    .map(|((_, upper), count)| (*upper, count.load(Acquire)))
                    .collect(),
            ),
            BucketPairs::Values(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Arc<Tags> {
        &self.tags
    }
}

/// Converts seconds to a `Duration`, clamping anything unrepresentable.
fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
