//! Hierarchical, tagged metric scopes.
//!
//! `metrics-scope` provides counters, gauges, timers and histograms organized into a tree of
//! [`Scope`]s. Every scope of a tree shares a single registry and a single report loop, which
//! periodically reports the state of every metric to a pluggable backend.
//!
//! # Usage
//!
//! ```
//! # use std::time::Duration;
//! # use metrics_scope::{Buckets, ScopeBuilder, ValueBuckets};
//! let root = ScopeBuilder::new()
//!     .with_prefix("service")
//!     .with_tags([("env", "production")])
//!     .with_report_interval(Duration::from_secs(1))
//!     .build()
//!     .expect("failed to build root scope");
//!
//! // Scopes are derived from one another, extending the prefix or adding tags.
//! let http = root.sub_scope("http").tagged([("method", "GET")]);
//! http.counter("requests").inc(1);
//! http.gauge("in_flight").update(3.0);
//!
//! let buckets: Buckets = ValueBuckets::linear(0.0, 100.0, 10).expect("invalid buckets").into();
//! http.histogram("response_size", &buckets).record_value(512.0);
//!
//! // Without explicit buckets, histograms use the default buckets of the tree.
//! http.histogram("queue_time", None).record_duration(Duration::from_millis(12));
//!
//! let stopwatch = http.timer("latency").start();
//! // ... handle the request ...
//! stopwatch.stop();
//!
//! // Closing the root scope performs one final flush and stops the report loop.
//! root.close();
//! ```
//!
//! # Backends
//!
//! Backends come in two shapes, and a scope tree reports to exactly one of them:
//!
//! - [`StatsReporter`], which is handed the name and tags of a metric on every report.
//! - [`CachedStatsReporter`], which allocates a handle once per metric, and is only ever handed
//!   values through that handle afterwards.
//!
//! A scope tree without a backend still hands out working metrics, which can be inspected with
//! [`Scope::snapshot`]. Timers are the exception: they have nowhere to report to, so they keep
//! nothing unless [`ScopeBuilder::with_retained_timer_values`] says otherwise.
//!
//! # Reporting
//!
//! On every flush:
//!
//! - counters report the sum of the deltas recorded since the previous flush, if it is not zero
//! - gauges report their last value, if they were updated since the previous flush
//! - histograms report the cumulative count of every bucket which changed since the previous flush
//!
//! Timers are not part of flushes: every measurement is reported as soon as it is recorded.
//!
//! # Features
//!
//! - `debugging` (enabled by default): provides [`DebuggingReporter`], an in-memory backend
//!   suitable for tests.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod buckets;
pub use self::buckets::{
    default_buckets, BucketError, Buckets, DurationBuckets, ValueBuckets,
    DURATION_BUCKET_INFINITY, VALUE_BUCKET_INFINITY, VALUE_BUCKET_NEGATIVE_INFINITY,
};

mod builder;
pub use self::builder::{BuildError, ScopeBuilder};

#[cfg(feature = "debugging")]
#[cfg_attr(docsrs, doc(cfg(feature = "debugging")))]
mod debugging;
#[cfg(feature = "debugging")]
pub use self::debugging::{DebugEntry, DebugValue, DebuggingReporter};

mod handles;
pub use self::handles::{Counter, Gauge, Histogram, Stopwatch, Timer};

mod key;
pub use self::key::{
    key_for_prefixed_string_map, key_for_string_map, name_from_key, KEY_NAME_SEPARATOR,
    KEY_PAIR_SEPARATOR, KEY_PAIR_SPLITTER,
};

mod registry;
mod report_loop;

mod reporter;
pub use self::reporter::{
    CachedCount, CachedGauge, CachedHistogram, CachedHistogramBucket, CachedStatsReporter,
    CachedTimer, Capabilities, StatsReporter,
};

mod sanitize;
pub use self::sanitize::{
    SanitizeOptions, Sanitizer, ValidCharacters, ALPHANUMERIC_RANGE,
    DEFAULT_REPLACEMENT_CHARACTER, UNDERSCORE_CHARACTERS, UNDERSCORE_DASH_CHARACTERS,
    UNDERSCORE_DASH_DOT_CHARACTERS,
};

mod scope;
pub use self::scope::Scope;

mod snapshot;
pub use self::snapshot::{
    CounterSnapshot, GaugeSnapshot, HistogramSnapshot, Snapshot, TimerSnapshot,
};

mod storage;

mod tags;
pub use self::tags::{merge_tags, Tags};

mod telemetry;

#[cfg(test)]
mod test_util;
