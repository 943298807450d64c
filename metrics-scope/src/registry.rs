//! Shared metric storage for a scope tree.
use std::{
    hash::BuildHasher,
    iter::repeat,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
};

use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{
    key::key_for_prefixed_string_map,
    reporter::Backend,
    snapshot::{CounterSnapshot, GaugeSnapshot, HistogramSnapshot, Snapshot, TimerSnapshot},
    storage::{AtomicCounter, AtomicGauge, AtomicHistogram, TimerStorage},
    telemetry::{Telemetry, TelemetryValues},
    Buckets, Tags,
};

/// A sharded map from identity key to metric.
///
/// Lookups only take a read lock on a single shard. The write lock is only taken when a metric has
/// to be created, and is dropped before any caller sees the metric.
struct Shards<V> {
    shards: Vec<RwLock<HashMap<String, V>>>,
    shard_mask: usize,
    hasher: DefaultHashBuilder,
}

impl<V: Clone> Shards<V> {
    fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        let shards = repeat(()).take(shard_count).map(|_| RwLock::new(HashMap::new())).collect();

        Self { shards, shard_mask: shard_count - 1, hasher: DefaultHashBuilder::default() }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<HashMap<String, V>> {
        let hash = self.hasher.hash_one(key);
        &self.shards[hash as usize & self.shard_mask]
    }

    /// Gets the value under `key`, creating it with `create` if it does not yet exist.
    ///
    /// When racing with other callers for the same key, exactly one value is ever created, and
    /// every caller gets that value back.
    fn get_or_create<F>(&self, key: String, create: F) -> V
    where
        F: FnOnce() -> V,
    {
        let shard = self.shard(&key);
        if let Some(v) = shard.read().get(&key) {
            return v.clone();
        }

        // Switch to the write guard, checking again in case we lost the race.
        let mut shard_write = shard.write();
        shard_write.entry(key).or_insert_with(create).clone()
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }

    fn delete(&self, key: &str) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    /// Clones out every value, one shard at a time.
    ///
    /// Values created after a shard has been visited are not observed.
    fn values(&self) -> Vec<V> {
        let mut values = Vec::new();
        for shard in &self.shards {
            values.extend(shard.read().values().cloned());
        }
        values
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}

/// Every metric created through a scope tree.
///
/// Metrics are keyed by the identity key of their fully-qualified name and tags, so scopes reaching
/// the same name and tags through different paths share the same metric.
pub(crate) struct Registry {
    backend: Backend,
    counters: Shards<Arc<AtomicCounter>>,
    gauges: Shards<Arc<AtomicGauge>>,
    timers: Shards<Arc<TimerStorage>>,
    histograms: Shards<Arc<AtomicHistogram>>,
    active_scopes: AtomicUsize,
    telemetry: Option<Telemetry>,
    retained_timer_values: usize,
}

impl Registry {
    /// Creates a new `Registry` reporting to `backend`.
    pub fn new(backend: Backend, internal_metrics: bool) -> Self {
        let shard_count = std::cmp::max(1, num_cpus::get()).next_power_of_two();
        let telemetry = internal_metrics.then(Telemetry::new);

        Self {
            backend,
            counters: Shards::new(shard_count),
            gauges: Shards::new(shard_count),
            timers: Shards::new(shard_count),
            histograms: Shards::new(shard_count),
            active_scopes: AtomicUsize::new(0),
            telemetry,
            retained_timer_values: 0,
        }
    }

    /// Keeps up to `limit` measurements per timer when there is no backend to report them to.
    pub fn with_retained_timer_values(mut self, limit: usize) -> Self {
        self.retained_timer_values = limit;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn scope_opened(&self) {
        self.active_scopes.fetch_add(1, Relaxed);
    }

    pub fn scope_dropped(&self) {
        self.active_scopes.fetch_sub(1, Relaxed);
    }

    /// Number of scope objects of the tree currently alive.
    pub fn active_scopes(&self) -> usize {
        self.active_scopes.load(Relaxed)
    }

    /// Gets or creates the counter called `name` with the given tags.
    pub fn counter(&self, name: &str, tags: &Arc<Tags>) -> Arc<AtomicCounter> {
        let key = key_for_prefixed_string_map(name, tags);
        self.counters.get_or_create(key, || {
            trace!(name, "creating counter");
            Arc::new(AtomicCounter::new(name.to_owned(), Arc::clone(tags), &self.backend))
        })
    }

    /// Gets or creates the gauge called `name` with the given tags.
    pub fn gauge(&self, name: &str, tags: &Arc<Tags>) -> Arc<AtomicGauge> {
        let key = key_for_prefixed_string_map(name, tags);
        self.gauges.get_or_create(key, || {
            trace!(name, "creating gauge");
            Arc::new(AtomicGauge::new(name.to_owned(), Arc::clone(tags), &self.backend))
        })
    }

    /// Gets or creates the timer called `name` with the given tags.
    pub fn timer(&self, name: &str, tags: &Arc<Tags>) -> Arc<TimerStorage> {
        let key = key_for_prefixed_string_map(name, tags);
        self.timers.get_or_create(key, || {
            trace!(name, "creating timer");
            Arc::new(TimerStorage::new(
                name.to_owned(),
                Arc::clone(tags),
                &self.backend,
                self.retained_timer_values,
            ))
        })
    }

    /// Gets or creates the histogram called `name` with the given tags.
    ///
    /// `buckets` is only used when the histogram is created: an existing histogram keeps the
    /// buckets it was created with.
    pub fn histogram(
        &self,
        name: &str,
        tags: &Arc<Tags>,
        buckets: &Buckets,
    ) -> Arc<AtomicHistogram> {
        let key = key_for_prefixed_string_map(name, tags);
        self.histograms.get_or_create(key, || {
            trace!(name, %buckets, "creating histogram");
            Arc::new(AtomicHistogram::new(
                name.to_owned(),
                Arc::clone(tags),
                buckets.clone(),
                &self.backend,
            ))
        })
    }

    #[cfg(test)]
    pub fn get_counter(&self, key: &str) -> Option<Arc<AtomicCounter>> {
        self.counters.get(key)
    }

    pub fn delete_counter(&self, key: &str) -> bool {
        self.counters.delete(key)
    }

    pub fn delete_gauge(&self, key: &str) -> bool {
        self.gauges.delete(key)
    }

    pub fn delete_timer(&self, key: &str) -> bool {
        self.timers.delete(key)
    }

    pub fn delete_histogram(&self, key: &str) -> bool {
        self.histograms.delete(key)
    }

    /// Reports every metric to the backend, then flushes the backend.
    ///
    /// Without a backend this does nothing at all, so values accumulate for [`Registry::snapshot`].
    pub fn report(&self) {
        if matches!(self.backend, Backend::None) {
            trace!("no backend configured, skipping report");
            return;
        }

        let counters = self.counters.values();
        for counter in &counters {
            counter.report();
        }

        let gauges = self.gauges.values();
        for gauge in &gauges {
            gauge.report();
        }

        let histograms = self.histograms.values();
        for histogram in &histograms {
            histogram.report();
        }

        let values = TelemetryValues {
            counter_cardinality: counters.len(),
            gauge_cardinality: gauges.len(),
            histogram_cardinality: histograms.len(),
            timer_cardinality: self.timers.len(),
            active_scopes: self.active_scopes(),
        };
        debug!(
            counters = values.counter_cardinality,
            gauges = values.gauge_cardinality,
            histograms = values.histogram_cardinality,
            timers = values.timer_cardinality,
            "reported registry"
        );

        if let Some(telemetry) = &self.telemetry {
            if self.backend.capabilities().reporting() {
                telemetry.report(&self.backend, &values);
            }
        }

        self.backend.flush();
    }

    /// Copies the current state of every metric.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();

        for counter in self.counters.values() {
            let tags = Tags::clone(counter.tags());
            let key = key_for_prefixed_string_map(counter.name(), &tags);
            let value = counter.value();
            snapshot
                .counters
                .insert(key, CounterSnapshot { name: counter.name().to_owned(), tags, value });
        }

        for gauge in self.gauges.values() {
            let tags = Tags::clone(gauge.tags());
            let key = key_for_prefixed_string_map(gauge.name(), &tags);
            let value = gauge.value();
            let name = gauge.name().to_owned();
            snapshot.gauges.insert(key, GaugeSnapshot { name, tags, value });
        }

        for timer in self.timers.values() {
            let tags = Tags::clone(timer.tags());
            let key = key_for_prefixed_string_map(timer.name(), &tags);
            let values = timer.values();
            let name = timer.name().to_owned();
            snapshot.timers.insert(key, TimerSnapshot { name, tags, values });
        }

        for histogram in self.histograms.values() {
            let tags = Tags::clone(histogram.tags());
            let key = key_for_prefixed_string_map(histogram.name(), &tags);
            snapshot.histograms.insert(
                key,
                HistogramSnapshot {
                    name: histogram.name().to_owned(),
                    tags,
                    values: histogram.value_counts(),
                    durations: histogram.duration_counts(),
                },
            );
        }

        snapshot
    }
}
