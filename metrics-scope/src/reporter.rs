//! Backend contracts.
//!
//! A scope tree reports to exactly one backend, which comes in one of two shapes:
//!
//! - [`StatsReporter`] receives the name and tags of a metric alongside every value it reports.
//! - [`CachedStatsReporter`] is asked to allocate a handle once per metric, and then only ever sees
//!   values through that handle. This lets a backend resolve expensive per-metric state (formatted
//!   names, interned tag sets, and so on) a single time.
use std::{fmt, sync::Arc, time::Duration};

use crate::{Buckets, Tags};

/// What a backend is able to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    reporting: bool,
    tagging: bool,
}

impl Capabilities {
    /// A backend that neither reports nor supports tags.
    pub const NONE: Capabilities = Capabilities { reporting: false, tagging: false };

    /// A backend that reports but drops tags.
    pub const REPORTING: Capabilities = Capabilities { reporting: true, tagging: false };

    /// A backend that reports and supports tags.
    pub const REPORTING_TAGGING: Capabilities = Capabilities { reporting: true, tagging: true };

    /// Creates a new `Capabilities`.
    pub const fn new(reporting: bool, tagging: bool) -> Self {
        Capabilities { reporting, tagging }
    }

    /// Whether or not the backend reports metrics anywhere.
    pub const fn reporting(&self) -> bool {
        self.reporting
    }

    /// Whether or not the backend supports tags.
    pub const fn tagging(&self) -> bool {
        self.tagging
    }
}

/// A backend which is handed the name and tags of a metric on every report.
pub trait StatsReporter: Send + Sync {
    /// Reports the change in a counter since the previous report.
    fn report_counter(&self, name: &str, tags: &Tags, value: i64);

    /// Reports the current value of a gauge.
    fn report_gauge(&self, name: &str, tags: &Tags, value: f64);

    /// Reports a single timer measurement.
    fn report_timer(&self, name: &str, tags: &Tags, interval: Duration);

    /// Reports the cumulative sample count of one bucket of a value histogram.
    fn report_histogram_value_samples(
        &self,
        name: &str,
        tags: &Tags,
        buckets: &Buckets,
        bucket_lower_bound: f64,
        bucket_upper_bound: f64,
        samples: u64,
    );

    /// Reports the cumulative sample count of one bucket of a duration histogram.
    fn report_histogram_duration_samples(
        &self,
        name: &str,
        tags: &Tags,
        buckets: &Buckets,
        bucket_lower_bound: Duration,
        bucket_upper_bound: Duration,
        samples: u64,
    );

    /// Returns what this backend is able to do.
    fn capabilities(&self) -> Capabilities;

    /// Called once at the end of every flush of the registry.
    fn flush(&self);
}

/// A backend which pre-allocates a handle for every metric.
pub trait CachedStatsReporter: Send + Sync {
    /// Allocates a handle for a counter.
    fn allocate_counter(&self, name: &str, tags: &Tags) -> Box<dyn CachedCount>;

    /// Allocates a handle for a gauge.
    fn allocate_gauge(&self, name: &str, tags: &Tags) -> Box<dyn CachedGauge>;

    /// Allocates a handle for a timer.
    fn allocate_timer(&self, name: &str, tags: &Tags) -> Box<dyn CachedTimer>;

    /// Allocates a handle for a histogram.
    ///
    /// Individual buckets are then allocated through [`CachedHistogram`].
    fn allocate_histogram(
        &self,
        name: &str,
        tags: &Tags,
        buckets: &Buckets,
    ) -> Box<dyn CachedHistogram>;

    /// Returns what this backend is able to do.
    fn capabilities(&self) -> Capabilities;

    /// Called once at the end of every flush of the registry.
    fn flush(&self);
}

/// A pre-allocated counter.
pub trait CachedCount: Send + Sync {
    /// Reports the change in the counter since the previous report.
    fn report_count(&self, value: i64);
}

/// A pre-allocated gauge.
pub trait CachedGauge: Send + Sync {
    /// Reports the current value of the gauge.
    fn report_gauge(&self, value: f64);
}

/// A pre-allocated timer.
pub trait CachedTimer: Send + Sync {
    /// Reports a single timer measurement.
    fn report_timer(&self, interval: Duration);
}

/// A pre-allocated histogram.
pub trait CachedHistogram: Send + Sync {
    /// Allocates the bucket spanning `(lower, upper]` of a value histogram.
    fn value_bucket(
        &self,
        bucket_lower_bound: f64,
        bucket_upper_bound: f64,
    ) -> Box<dyn CachedHistogramBucket>;

    /// Allocates the bucket spanning `(lower, upper]` of a duration histogram.
    fn duration_bucket(
        &self,
        bucket_lower_bound: Duration,
        bucket_upper_bound: Duration,
    ) -> Box<dyn CachedHistogramBucket>;
}

/// A pre-allocated histogram bucket.
pub trait CachedHistogramBucket: Send + Sync {
    /// Reports the cumulative number of samples recorded into the bucket.
    fn report_samples(&self, value: u64);
}

impl<T: StatsReporter + ?Sized> StatsReporter for Arc<T> {
    fn report_counter(&self, name: &str, tags: &Tags, value: i64) {
        (**self).report_counter(name, tags, value)
    }

    fn report_gauge(&self, name: &str, tags: &Tags, value: f64) {
        (**self).report_gauge(name, tags, value)
    }

    fn report_timer(&self, name: &str, tags: &Tags, interval: Duration) {
        (**self).report_timer(name, tags, interval)
    }

    fn report_histogram_value_samples(
        &self,
        name: &str,
        tags: &Tags,
        buckets: &Buckets,
        bucket_lower_bound: f64,
        bucket_upper_bound: f64,
        samples: u64,
    ) {
        (**self).report_histogram_value_samples(
            name,
            tags,
            buckets,
            bucket_lower_bound,
            bucket_upper_bound,
            samples,
        )
    }

    fn report_histogram_duration_samples(
        &self,
        name: &str,
        tags: &Tags,
        buckets: &Buckets,
        bucket_lower_bound: Duration,
        bucket_upper_bound: Duration,
        samples: u64,
    ) {
        (**self).report_histogram_duration_samples(
            name,
            tags,
            buckets,
            bucket_lower_bound,
            bucket_upper_bound,
            samples,
        )
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn flush(&self) {
        (**self).flush()
    }
}

impl<T: CachedStatsReporter + ?Sized> CachedStatsReporter for Arc<T> {
    fn allocate_counter(&self, name: &str, tags: &Tags) -> Box<dyn CachedCount> {
        (**self).allocate_counter(name, tags)
    }

    fn allocate_gauge(&self, name: &str, tags: &Tags) -> Box<dyn CachedGauge> {
        (**self).allocate_gauge(name, tags)
    }

    fn allocate_timer(&self, name: &str, tags: &Tags) -> Box<dyn CachedTimer> {
        (**self).allocate_timer(name, tags)
    }

    fn allocate_histogram(
        &self,
        name: &str,
        tags: &Tags,
        buckets: &Buckets,
    ) -> Box<dyn CachedHistogram> {
        (**self).allocate_histogram(name, tags, buckets)
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn flush(&self) {
        (**self).flush()
    }
}

/// The backend of a scope tree, fixed when the root scope is built.
#[derive(Clone, Default)]
pub(crate) enum Backend {
    #[default]
    None,
    Direct(Arc<dyn StatsReporter>),
    Cached(Arc<dyn CachedStatsReporter>),
}

impl Backend {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Backend::None => Capabilities::NONE,
            Backend::Direct(reporter) => reporter.capabilities(),
            Backend::Cached(reporter) => reporter.capabilities(),
        }
    }

    pub fn flush(&self) {
        match self {
            Backend::None => {}
            Backend::Direct(reporter) => reporter.flush(),
            Backend::Cached(reporter) => reporter.flush(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::None => f.write_str("None"),
            Backend::Direct(_) => f.write_str("Direct"),
            Backend::Cached(_) => f.write_str("Cached"),
        }
    }
}
