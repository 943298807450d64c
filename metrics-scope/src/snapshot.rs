//! Point-in-time copies of the registry.
use std::{collections::BTreeMap, time::Duration};

use ordered_float::OrderedFloat;

use crate::Tags;

/// A point-in-time copy of every metric in a scope tree.
///
/// Each map is keyed by the identity key of the metric (see [`key_for_prefixed_string_map`]).
/// Nothing in a snapshot refers back to live state, and taking one does not reset anything.
///
/// [`key_for_prefixed_string_map`]: crate::key_for_prefixed_string_map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub(crate) counters: BTreeMap<String, CounterSnapshot>,
    pub(crate) gauges: BTreeMap<String, GaugeSnapshot>,
    pub(crate) timers: BTreeMap<String, TimerSnapshot>,
    pub(crate) histograms: BTreeMap<String, HistogramSnapshot>,
}

impl Snapshot {
    /// Counters, keyed by identity key.
    pub fn counters(&self) -> &BTreeMap<String, CounterSnapshot> {
        &self.counters
    }

    /// Gauges, keyed by identity key.
    pub fn gauges(&self) -> &BTreeMap<String, GaugeSnapshot> {
        &self.gauges
    }

    /// Timers, keyed by identity key.
    pub fn timers(&self) -> &BTreeMap<String, TimerSnapshot> {
        &self.timers
    }

    /// Histograms, keyed by identity key.
    pub fn histograms(&self) -> &BTreeMap<String, HistogramSnapshot> {
        &self.histograms
    }

    /// Returns `true` if the snapshot holds no metrics at all.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
            && self.gauges.is_empty()
            && self.timers.is_empty()
            && self.histograms.is_empty()
    }
}

/// A copy of a counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub(crate) name: String,
    pub(crate) tags: Tags,
    pub(crate) value: i64,
}

impl CounterSnapshot {
    /// Fully-qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Value accumulated since the last flush.
    pub fn value(&self) -> i64 {
        self.value
    }
}

/// A copy of a gauge.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSnapshot {
    pub(crate) name: String,
    pub(crate) tags: Tags,
    pub(crate) value: f64,
}

impl GaugeSnapshot {
    /// Fully-qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Last value the gauge was updated with.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// A copy of a timer.
///
/// Timers only retain their measurements when the scope tree has no backend; otherwise every
/// measurement has already been handed to the backend and `values` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub(crate) name: String,
    pub(crate) tags: Tags,
    pub(crate) values: Vec<Duration>,
}

impl TimerSnapshot {
    /// Fully-qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Recorded measurements, in recording order.
    pub fn values(&self) -> &[Duration] {
        &self.values
    }
}

/// A copy of a histogram.
///
/// Exactly one of `values` and `durations` is populated, depending on the kind of buckets the
/// histogram was created with. Both map every bucket upper bound, including the unbounded
/// terminal bucket, to its cumulative count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub(crate) name: String,
    pub(crate) tags: Tags,
    pub(crate) values: Option<BTreeMap<OrderedFloat<f64>, u64>>,
    pub(crate) durations: Option<BTreeMap<Duration, u64>>,
}

impl HistogramSnapshot {
    /// Fully-qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Counts by upper bound, for value histograms.
    pub fn values(&self) -> Option<&BTreeMap<OrderedFloat<f64>, u64>> {
        self.values.as_ref()
    }

    /// Counts by upper bound, for duration histograms.
    pub fn durations(&self) -> Option<&BTreeMap<Duration, u64>> {
        self.durations.as_ref()
    }
}
