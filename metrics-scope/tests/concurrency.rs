use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use metrics_scope::{
    Buckets, Capabilities, DebugValue, DebuggingReporter, Scope, ScopeBuilder, StatsReporter, Tags,
    ValueBuckets,
};
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use rand::Rng;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn build(reporter: &DebuggingReporter, interval: Duration) -> Scope {
    build_with(reporter, interval)
}

fn build_with<R>(reporter: &R, interval: Duration) -> Scope
where
    R: StatsReporter + Clone + 'static,
{
    ScopeBuilder::new()
        .with_reporter(reporter.clone())
        .with_report_interval(interval)
        .with_internal_metrics(false)
        .build()
        .expect("failed to build scope")
}

/// Closes the root scope it is handed from inside its first flush.
#[derive(Clone, Default)]
struct ClosingReporter {
    inner: DebuggingReporter,
    root: Arc<Mutex<Option<Scope>>>,
}

impl ClosingReporter {
    fn close_on_flush(&self, root: &Scope) {
        *self.root.lock() = Some(root.clone());
    }
}

impl StatsReporter for ClosingReporter {
    fn report_counter(&self, name: &str, tags: &Tags, value: i64) {
        StatsReporter::report_counter(&self.inner, name, tags, value);
    }

    fn report_gauge(&self, name: &str, tags: &Tags, value: f64) {
        StatsReporter::report_gauge(&self.inner, name, tags, value);
    }

    fn report_timer(&self, name: &str, tags: &Tags, interval: Duration) {
        StatsReporter::report_timer(&self.inner, name, tags, interval);
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
        StatsReporter::report_histogram_value_samples(
            &self.inner,
            name,
            tags,
            buckets,
            bucket_lower_bound,
            bucket_upper_bound,
            samples,
        );
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
        StatsReporter::report_histogram_duration_samples(
            &self.inner,
            name,
            tags,
            buckets,
            bucket_lower_bound,
            bucket_upper_bound,
            samples,
        );
    }

    fn capabilities(&self) -> Capabilities {
        StatsReporter::capabilities(&self.inner)
    }

    fn flush(&self) {
        StatsReporter::flush(&self.inner);
        let root = self.root.lock().take();
        if let Some(root) = root {
            root.close();
        }
    }
}

/// Waits until `condition` holds, giving up after a generous timeout.
fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn concurrent_counter_updates_sum_exactly() {
    init_tracing();

    const WORKERS: usize = 20;
    const SCOPES: usize = 4;
    const COUNTERS_PER_SCOPE: usize = 4;
    const INCREMENTS: usize = 5_000;

    let reporter = DebuggingReporter::new();
    let root = build(&reporter, Duration::ZERO);

    let mut scopes = vec![root.clone()];
    for i in 1..SCOPES {
        scopes.push(root.sub_scope(&format!("subscope_{i}")));
    }

    let counters = Arc::new(
        scopes
            .iter()
            .enumerate()
            .flat_map(|(s, scope)| {
                (0..COUNTERS_PER_SCOPE)
                    .map(move |c| scope.counter(&format!("scope_{s}_counter_{c}")))
            })
            .collect::<Vec<_>>(),
    );

    let handles = (0..WORKERS)
        .map(|_| {
            let counters = Arc::clone(&counters);
            thread::spawn(move || {
                for i in 0..INCREMENTS * counters.len() {
                    counters[i % counters.len()].inc(1);
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    root.close();

    let snapshot = reporter.snapshot();
    assert_eq!(snapshot.len(), SCOPES * COUNTERS_PER_SCOPE);
    for entry in snapshot.values() {
        assert_eq!(entry.value, DebugValue::Counter((WORKERS * INCREMENTS) as i64));
    }
}

#[test]
fn concurrent_histogram_updates_share_buckets() {
    let reporter = DebuggingReporter::new();
    let scope = ScopeBuilder::new()
        .with_cached_reporter(reporter.clone())
        .with_report_interval(Duration::ZERO)
        .with_internal_metrics(false)
        .build()
        .expect("failed to build scope");
    let buckets: Buckets = ValueBuckets::linear(10.0, 10.0, 3).expect("valid buckets").into();

    let handles = (0..4)
        .map(|worker| {
            let scope = scope.clone();
            let buckets = buckets.clone();
            thread::spawn(move || {
                let mut rng = rand::rng();
                for i in 0..2_500 {
                    let key = ((worker + i) % 4).to_string();
                    scope.tagged([("key", key)]).histogram("hist", &buckets).record_value(19.0);
                    if rng.random_bool(0.01) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    scope.close();

    for key in 0..4 {
        assert_eq!(
            reporter.get(&format!("hist+key={key}")),
            Some(DebugValue::ValueHistogram([(OrderedFloat(20.0), 2_500)].into()))
        );
    }
}

#[test]
fn concurrent_close_flushes_once() {
    let reporter = DebuggingReporter::new();
    let scope = build(&reporter, Duration::from_secs(600));
    scope.counter("closing").inc(1);

    let barrier = Arc::new(Barrier::new(8));
    let handles = (0..8)
        .map(|_| {
            let scope = scope.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                scope.close();
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("closer panicked");
    }

    // Every closer has returned, but only the first one flushes; it may still be finishing.
    assert!(eventually(|| reporter.flushes() == 1));
    assert_eq!(reporter.get("closing+"), Some(DebugValue::Counter(1)));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(reporter.flushes(), 1);
}

#[test]
fn zero_interval_only_flushes_on_close() {
    let reporter = DebuggingReporter::new();
    let scope = build(&reporter, Duration::ZERO);
    scope.counter("foo").inc(1);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(reporter.flushes(), 0);
    assert_eq!(reporter.get("foo+"), None);

    scope.close();
    assert_eq!(reporter.flushes(), 1);
    assert_eq!(reporter.get("foo+"), Some(DebugValue::Counter(1)));

    scope.close();
    assert_eq!(reporter.flushes(), 1);
}

#[test]
fn long_interval_flushes_once_on_close() {
    let reporter = DebuggingReporter::new();
    let scope = build(&reporter, Duration::from_secs(600));
    scope.counter("foo").inc(1);
    assert_eq!(reporter.get("foo+"), None);

    scope.close();
    assert_eq!(reporter.flushes(), 1);
    assert_eq!(reporter.get("foo+"), Some(DebugValue::Counter(1)));
}

#[test]
fn report_loop_flushes_periodically() {
    init_tracing();

    let reporter = DebuggingReporter::new();
    let scope = build(&reporter, Duration::from_millis(10));

    scope.counter("bar").inc(1);
    scope.gauge("zed").update(1.0);
    scope.timer("ticky").record(Duration::from_millis(101));

    assert!(eventually(|| reporter.get("bar+") == Some(DebugValue::Counter(1))));
    assert!(eventually(|| reporter.flushes() >= 3));
    assert_eq!(reporter.get("zed+"), Some(DebugValue::Gauge(OrderedFloat(1.0))));

    scope.close();
    let flushes = reporter.flushes();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(reporter.flushes(), flushes);
}

#[test]
fn default_interval_flushes() {
    let reporter = DebuggingReporter::new();
    let scope = ScopeBuilder::new()
        .with_reporter(reporter.clone())
        .with_internal_metrics(false)
        .build()
        .expect("failed to build scope");

    scope.counter("bar").inc(1);
    assert!(eventually(|| reporter.flushes() >= 1));
    assert_eq!(reporter.get("bar+"), Some(DebugValue::Counter(1)));
    scope.close();
}

#[test]
fn snapshot_while_writing() {
    let scope = ScopeBuilder::new()
        .with_report_interval(Duration::ZERO)
        .build()
        .expect("failed to build scope");
    let quit = Arc::new(AtomicBool::new(false));

    let writer = {
        let scope = scope.clone();
        let quit = Arc::clone(&quit);
        thread::spawn(move || {
            let mut i = 0u64;
            while !quit.load(Ordering::Acquire) {
                let sub = scope.tagged([("shard", (i % 8).to_string())]);
                sub.counter("c").inc(1);
                sub.gauge("g").update(i as f64);
                sub.histogram("h", None).record_duration(Duration::from_millis(i % 100));
                i += 1;
            }
        })
    };

    for _ in 0..100 {
        let snapshot = scope.snapshot();
        assert!(snapshot.counters().len() <= 8);
    }

    quit.store(true, Ordering::Release);
    writer.join().expect("writer panicked");
}

#[test]
fn close_from_reporter_during_explicit_flush() {
    let reporter = ClosingReporter::default();
    let scope = ScopeBuilder::new()
        .with_reporter(reporter.clone())
        .with_report_interval(Duration::ZERO)
        .with_internal_metrics(false)
        .build()
        .expect("failed to build scope");
    reporter.close_on_flush(&scope);

    scope.counter("foo").inc(1);
    scope.flush();

    // The flush that closed the scope also performed the final one.
    assert!(scope.is_closed());
    assert_eq!(reporter.inner.flushes(), 2);
    assert_eq!(reporter.inner.get("foo+"), Some(DebugValue::Counter(1)));

    scope.flush();
    scope.close();
    assert_eq!(reporter.inner.flushes(), 2);
}

#[test]
fn close_from_reporter_on_report_thread() {
    let reporter = ClosingReporter::default();
    let scope = build_with(&reporter, Duration::from_millis(10));
    reporter.close_on_flush(&scope);
    scope.counter("foo").inc(1);

    assert!(eventually(|| scope.is_closed()));
    assert!(eventually(|| reporter.inner.flushes() >= 2));
    assert_eq!(reporter.inner.get("foo+"), Some(DebugValue::Counter(1)));

    // The report thread finishes the final flush and stops.
    thread::sleep(Duration::from_millis(50));
    let flushes = reporter.inner.flushes();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(reporter.inner.flushes(), flushes);
}
