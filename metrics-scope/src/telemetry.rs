use once_cell::sync::OnceCell;

use crate::{
    reporter::{Backend, CachedGauge},
    Tags,
};

const COUNTER_CARDINALITY: &str = "metrics_scope.internal.counter_cardinality";
const GAUGE_CARDINALITY: &str = "metrics_scope.internal.gauge_cardinality";
const HISTOGRAM_CARDINALITY: &str = "metrics_scope.internal.histogram_cardinality";
const TIMER_CARDINALITY: &str = "metrics_scope.internal.timer_cardinality";
const NUM_ACTIVE_SCOPES: &str = "metrics_scope.internal.num_active_scopes";

const NAMES: [&str; 5] = [
    COUNTER_CARDINALITY,
    GAUGE_CARDINALITY,
    HISTOGRAM_CARDINALITY,
    TIMER_CARDINALITY,
    NUM_ACTIVE_SCOPES,
];

/// Registry state observed during a flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TelemetryValues {
    pub counter_cardinality: usize,
    pub gauge_cardinality: usize,
    pub histogram_cardinality: usize,
    pub timer_cardinality: usize,
    pub active_scopes: usize,
}

impl TelemetryValues {
    fn as_array(&self) -> [usize; 5] {
        [
            self.counter_cardinality,
            self.gauge_cardinality,
            self.histogram_cardinality,
            self.timer_cardinality,
            self.active_scopes,
        ]
    }
}

/// Internal telemetry.
///
/// `Telemetry` reports the size of the registry as regular gauges, through the same backend as
/// every other metric. These gauges never live in the registry, so they never show up in
/// snapshots.
pub(crate) struct Telemetry {
    tags: Tags,
    cached: OnceCell<Vec<Box<dyn CachedGauge>>>,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new() -> Self {
        let mut tags = Tags::new();
        tags.insert("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned());

        Self { tags, cached: OnceCell::new() }
    }

    /// Reports the given values to `backend`.
    ///
    /// Cached handles are allocated the first time this is called.
    pub fn report(&self, backend: &Backend, values: &TelemetryValues) {
        let values = values.as_array();
        match backend {
            Backend::None => {}
            Backend::Direct(reporter) => {
                for (name, value) in NAMES.iter().zip(values) {
                    reporter.report_gauge(name, &self.tags, value as f64);
                }
            }
            Backend::Cached(reporter) => {
                let gauges = self.cached.get_or_init(|| {
                    NAMES.iter().map(|name| reporter.allocate_gauge(name, &self.tags)).collect()
                });
                for (gauge, value) in gauges.iter().zip(values) {
                    gauge.report_gauge(value as f64);
                }
            }
        }
    }
}
