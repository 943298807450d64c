use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::storage::{AtomicCounter, AtomicGauge, AtomicHistogram, TimerStorage};

/// A counter.
///
/// Accumulates signed deltas, and reports the sum of the deltas recorded since the previous flush.
#[derive(Clone)]
pub struct Counter {
    inner: Option<Arc<AtomicCounter>>,
}

/// A gauge.
///
/// Holds the last value it was updated with.
#[derive(Clone)]
pub struct Gauge {
    inner: Option<Arc<AtomicGauge>>,
}

/// A timer.
///
/// Measurements are reported as soon as they are recorded, rather than at the next flush.
#[derive(Clone)]
pub struct Timer {
    inner: Option<Arc<TimerStorage>>,
}

/// A histogram.
///
/// Counts samples into a fixed set of buckets. Counts are cumulative and never reset.
#[derive(Clone)]
pub struct Histogram {
    inner: Option<Arc<AtomicHistogram>>,
}

impl Counter {
    /// Creates a no-op `Counter` which does nothing.
    ///
    /// This is what the no-op scope hands out.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub(crate) fn from_arc(inner: Arc<AtomicCounter>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Increments the counter by `delta`.
    pub fn inc(&self, delta: i64) {
        if let Some(inner) = &self.inner {
            inner.increment(delta);
        }
    }

    /// Returns `true` if both handles refer to the same underlying counter.
    pub fn ptr_eq(&self, other: &Counter) -> bool {
        ptr_eq(&self.inner, &other.inner)
    }
}

impl Gauge {
    /// Creates a no-op `Gauge` which does nothing.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub(crate) fn from_arc(inner: Arc<AtomicGauge>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: f64) {
        if let Some(inner) = &self.inner {
            inner.set(value);
        }
    }

    /// Returns `true` if both handles refer to the same underlying gauge.
    pub fn ptr_eq(&self, other: &Gauge) -> bool {
        ptr_eq(&self.inner, &other.inner)
    }
}

impl Timer {
    /// Creates a no-op `Timer` which does nothing.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub(crate) fn from_arc(inner: Arc<TimerStorage>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Records a measurement.
    pub fn record(&self, interval: Duration) {
        if let Some(inner) = &self.inner {
            inner.record(interval);
        }
    }

    /// Starts a stopwatch which records into this timer when stopped.
    pub fn start(&self) -> Stopwatch {
        Stopwatch::new(Target::Timer(self.clone()))
    }

    /// Returns `true` if both handles refer to the same underlying timer.
    pub fn ptr_eq(&self, other: &Timer) -> bool {
        ptr_eq(&self.inner, &other.inner)
    }
}

impl Histogram {
    /// Creates a no-op `Histogram` which does nothing.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub(crate) fn from_arc(inner: Arc<AtomicHistogram>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Records a numeric sample.
    ///
    /// Duration histograms treat the value as a number of seconds.
    pub fn record_value(&self, value: f64) {
        if let Some(inner) = &self.inner {
            inner.record_value(value);
        }
    }

    /// Records a duration sample.
    ///
    /// Value histograms record the duration as a number of seconds.
    pub fn record_duration(&self, value: Duration) {
        if let Some(inner) = &self.inner {
            inner.record_duration(value);
        }
    }

    /// Starts a stopwatch which records a duration into this histogram when stopped.
    pub fn start(&self) -> Stopwatch {
        Stopwatch::new(Target::Histogram(self.clone()))
    }

    /// Returns `true` if both handles refer to the same underlying histogram.
    pub fn ptr_eq(&self, other: &Histogram) -> bool {
        ptr_eq(&self.inner, &other.inner)
    }
}

enum Target {
    Timer(Timer),
    Histogram(Histogram),
}

/// An in-flight measurement.
///
/// Dropping a stopwatch without calling [`Stopwatch::stop`] records nothing.
#[must_use = "a stopwatch records nothing until it is stopped"]
pub struct Stopwatch {
    start: Instant,
    target: Target,
}

impl Stopwatch {
    fn new(target: Target) -> Self {
        Self { start: Instant::now(), target }
    }

    /// The instant this stopwatch was started at.
    pub fn start_time(&self) -> Instant {
        self.start
    }

    /// Records the time elapsed since the stopwatch was started, and returns it.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        match &self.target {
            Target::Timer(timer) => timer.record(elapsed),
            Target::Histogram(histogram) => histogram.record_duration(elapsed),
        }
        elapsed
    }
}

fn ptr_eq<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}
