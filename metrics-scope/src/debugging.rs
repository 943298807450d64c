//! In-memory reporter for debugging and testing.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;

use crate::{
    key::key_for_prefixed_string_map,
    reporter::{
        CachedCount, CachedGauge, CachedHistogram, CachedHistogramBucket, CachedStatsReporter,
        CachedTimer, Capabilities, StatsReporter,
    },
    Buckets, Tags,
};

/// Everything reported for a metric so far.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DebugValue {
    /// Counter, as the sum of every reported delta.
    Counter(i64),
    /// Gauge, as the last reported value.
    Gauge(OrderedFloat<f64>),
    /// Timer, as every reported measurement.
    Timer(Vec<Duration>),
    /// Value histogram, as the last reported count of each bucket, keyed by upper bound.
    ValueHistogram(BTreeMap<OrderedFloat<f64>, u64>),
    /// Duration histogram, as the last reported count of each bucket, keyed by upper bound.
    DurationHistogram(BTreeMap<Duration, u64>),
}

/// A metric as seen by [`DebuggingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    /// Fully-qualified name.
    pub name: String,
    /// Tags.
    pub tags: Tags,
    /// Everything reported so far.
    pub value: DebugValue,
}

#[derive(Default)]
struct Shared {
    metrics: Mutex<IndexMap<String, DebugEntry>>,
    flushes: AtomicUsize,
}

impl Shared {
    fn update<I, U>(&self, name: &str, tags: &Tags, init: I, update: U)
    where
        I: FnOnce() -> DebugValue,
        U: FnOnce(&mut DebugValue),
    {
        let key = key_for_prefixed_string_map(name, tags);
        let mut metrics = self.metrics.lock();
        let entry = metrics.entry(key).or_insert_with(|| DebugEntry {
            name: name.to_owned(),
            tags: tags.clone(),
            value: init(),
        });
        update(&mut entry.value);
    }

    fn counter(&self, name: &str, tags: &Tags, delta: i64) {
        self.update(name, tags, || DebugValue::Counter(0), |value| {
            if let DebugValue::Counter(total) = value {
                *total += delta;
            }
        });
    }

    fn gauge(&self, name: &str, tags: &Tags, gauge: f64) {
        self.update(name, tags, || DebugValue::Gauge(OrderedFloat(gauge)), |value| {
            *value = DebugValue::Gauge(OrderedFloat(gauge));
        });
    }

    fn timer(&self, name: &str, tags: &Tags, interval: Duration) {
        self.update(name, tags, || DebugValue::Timer(Vec::new()), |value| {
            if let DebugValue::Timer(values) = value {
                values.push(interval);
            }
        });
    }

    fn value_samples(&self, name: &str, tags: &Tags, upper: f64, samples: u64) {
        self.update(name, tags, || DebugValue::ValueHistogram(BTreeMap::new()), |value| {
            if let DebugValue::ValueHistogram(buckets) = value {
                buckets.insert(OrderedFloat(upper), samples);
            }
        });
    }

    fn duration_samples(&self, name: &str, tags: &Tags, upper: Duration, samples: u64) {
        self.update(name, tags, || DebugValue::DurationHistogram(BTreeMap::new()), |value| {
            if let DebugValue::DurationHistogram(buckets) = value {
                buckets.insert(upper, samples);
            }
        });
    }
}

/// A reporter which keeps everything it is handed in memory.
///
/// `DebuggingReporter` implements both [`StatsReporter`] and [`CachedStatsReporter`], and records
/// the same thing through either. It is cheap to clone: clones share the same captured state, so a
/// clone can be handed to [`ScopeBuilder`](crate::ScopeBuilder) while the original is kept around
/// to inspect what was reported.
///
/// Metrics are iterated in the order they were first reported.
#[derive(Clone)]
pub struct DebuggingReporter {
    shared: Arc<Shared>,
    capabilities: Capabilities,
}

impl DebuggingReporter {
    /// Creates a new `DebuggingReporter` which supports reporting and tagging.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::REPORTING_TAGGING)
    }

    /// Creates a new `DebuggingReporter` advertising the given capabilities.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self { shared: Arc::default(), capabilities }
    }

    /// Takes a snapshot of everything reported so far, keyed by identity key.
    pub fn snapshot(&self) -> IndexMap<String, DebugEntry> {
        self.shared.metrics.lock().clone()
    }

    /// Gets everything reported so far for the metric with the given identity key.
    pub fn get(&self, key: &str) -> Option<DebugValue> {
        self.shared.metrics.lock().get(key).map(|entry| entry.value.clone())
    }

    /// Number of times the reporter has been flushed.
    pub fn flushes(&self) -> usize {
        self.shared.flushes.load(Ordering::Acquire)
    }

    /// Forgets everything reported so far, and resets the flush count.
    pub fn clear(&self) {
        self.shared.metrics.lock().clear();
        self.shared.flushes.store(0, Ordering::Release);
    }
}

impl Default for DebuggingReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsReporter for DebuggingReporter {
    fn report_counter(&self, name: &str, tags: &Tags, value: i64) {
        self.shared.counter(name, tags, value);
    }

    fn report_gauge(&self, name: &str, tags: &Tags, value: f64) {
        self.shared.gauge(name, tags, value);
    }

    fn report_timer(&self, name: &str, tags: &Tags, interval: Duration) {
        self.shared.timer(name, tags, interval);
    }

    fn report_histogram_value_samples(
        &self,
        name: &str,
        tags: &Tags,
        _buckets: &Buckets,
        _bucket_lower_bound: f64,
        bucket_upper_bound: f64,
        samples: u64,
    ) {
        self.shared.value_samples(name, tags, bucket_upper_bound, samples);
    }

    fn report_histogram_duration_samples(
        &self,
        name: &str,
        tags: &Tags,
        _buckets: &Buckets,
        _bucket_lower_bound: Duration,
        bucket_upper_bound: Duration,
        samples: u64,
    ) {
        self.shared.duration_samples(name, tags, bucket_upper_bound, samples);
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn flush(&self) {
        self.shared.flushes.fetch_add(1, Ordering::AcqRel);
    }
}

impl CachedStatsReporter for DebuggingReporter {
    fn allocate_counter(&self, name: &str, tags: &Tags) -> Box<dyn CachedCount> {
        Box::new(DebugMetric::new(&self.shared, name, tags))
    }

    fn allocate_gauge(&self, name: &str, tags: &Tags) -> Box<dyn CachedGauge> {
        Box::new(DebugMetric::new(&self.shared, name, tags))
    }

    fn allocate_timer(&self, name: &str, tags: &Tags) -> Box<dyn CachedTimer> {
        Box::new(DebugMetric::new(&self.shared, name, tags))
    }

    fn allocate_histogram(
        &self,
        name: &str,
        tags: &Tags,
        _buckets: &Buckets,
    ) -> Box<dyn CachedHistogram> {
        Box::new(DebugMetric::new(&self.shared, name, tags))
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn flush(&self) {
        self.shared.flushes.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Clone)]
struct DebugMetric {
    shared: Arc<Shared>,
    name: String,
    tags: Tags,
}

impl DebugMetric {
    fn new(shared: &Arc<Shared>, name: &str, tags: &Tags) -> Self {
        Self { shared: Arc::clone(shared), name: name.to_owned(), tags: tags.clone() }
    }
}

impl CachedCount for DebugMetric {
    fn report_count(&self, value: i64) {
        self.shared.counter(&self.name, &self.tags, value);
    }
}

impl CachedGauge for DebugMetric {
    fn report_gauge(&self, value: f64) {
        self.shared.gauge(&self.name, &self.tags, value);
    }
}

impl CachedTimer for DebugMetric {
    fn report_timer(&self, interval: Duration) {
        self.shared.timer(&self.name, &self.tags, interval);
    }
}

impl CachedHistogram for DebugMetric {
    fn value_bucket(
        &self,
        _bucket_lower_bound: f64,
        bucket_upper_bound: f64,
    ) -> Box<dyn CachedHistogramBucket> {
        Box::new(DebugBucket::Value(self.clone(), bucket_upper_bound))
    }

    fn duration_bucket(
        &self,
        _bucket_lower_bound: Duration,
        bucket_upper_bound: Duration,
    ) -> Box<dyn CachedHistogramBucket> {
        Box::new(DebugBucket::Duration(self.clone(), bucket_upper_bound))
    }
}

enum DebugBucket {
    Value(DebugMetric, f64),
    Duration(DebugMetric, Duration),
}

impl CachedHistogramBucket for DebugBucket {
    fn report_samples(&self, value: u64) {
        match self {
            DebugBucket::Value(metric, upper) => {
                metric.shared.value_samples(&metric.name, &metric.tags, *upper, value)
            }
            DebugBucket::Duration(metric, upper) => {
                metric.shared.duration_samples(&metric.name, &metric.tags, *upper, value)
            }
        }
    }
}
