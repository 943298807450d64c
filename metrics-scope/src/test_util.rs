use std::time::Duration;

use mockall::mock;

use crate::{Buckets, Capabilities, StatsReporter, Tags};

mock! {
    pub Reporter {}

    impl StatsReporter for Reporter {
        fn report_counter(&self, name: &str, tags: &Tags, value: i64);
        fn report_gauge(&self, name: &str, tags: &Tags, value: f64);
        fn report_timer(&self, name: &str, tags: &Tags, interval: Duration);
        fn report_histogram_value_samples(
            &self,
            name: &str,
            tags: &Tags,
            buckets: &Buckets,
            bucket_lower_bound: f64,
            bucket_upper_bound: f64,
            samples: u64,
        );
        fn report_histogram_duration_samples(
            &self,
            name: &str,
            tags: &Tags,
            buckets: &Buckets,
            bucket_lower_bound: Duration,
            bucket_upper_bound: Duration,
            samples: u64,
        );
        fn capabilities(&self) -> Capabilities;
        fn flush(&self);
    }
}

impl MockReporter {
    /// Creates a mock which reports, supports tags, and expects exactly `flushes` flushes.
    pub fn with_flushes(flushes: usize) -> Self {
        let mut mock = MockReporter::new();
        mock.expect_capabilities().return_const(Capabilities::REPORTING_TAGGING);
        mock.expect_flush().times(flushes).return_const(());
        mock
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::predicate::{always, eq};

    use super::MockReporter;
    use crate::{Buckets, Capabilities, ScopeBuilder, Tags, ValueBuckets};

    #[test]
    fn test_counter_reports_delta_once() {
        let mut reporter = MockReporter::with_flushes(2);
        reporter
            .expect_report_counter()
            .with(eq("svc.requests"), eq(Tags::new()), eq(5))
            .times(1)
            .return_const(());

        let scope = ScopeBuilder::new()
            .with_prefix("svc")
            .with_reporter(reporter)
            .with_report_interval(Duration::ZERO)
            .with_internal_metrics(false)
            .build()
            .expect("scope");

        scope.counter("requests").inc(2);
        scope.counter("requests").inc(3);
        scope.flush();
        // Nothing changed since, so the counter is not reported again.
        scope.close();
    }

    #[test]
    fn test_gauge_reported_only_when_updated() {
        let mut reporter = MockReporter::with_flushes(3);
        reporter
            .expect_report_gauge()
            .with(eq("temperature"), always(), eq(21.5))
            .times(1)
            .return_const(());
        reporter
            .expect_report_gauge()
            .with(eq("temperature"), always(), eq(19.0))
            .times(1)
            .return_const(());

        let scope = ScopeBuilder::new()
            .with_reporter(reporter)
            .with_report_interval(Duration::ZERO)
            .with_internal_metrics(false)
            .build()
            .expect("scope");

        let gauge = scope.gauge("temperature");
        gauge.update(20.0);
        gauge.update(21.5);
        scope.flush();
        scope.flush();
        gauge.update(19.0);
        scope.close();
    }

    #[test]
    fn test_histogram_reports_changed_buckets_cumulatively() {
        let mut reporter = MockReporter::with_flushes(2);
        reporter
            .expect_report_histogram_value_samples()
            .with(eq("latency"), always(), always(), eq(40.0), eq(50.0), eq(1))
            .times(1)
            .return_const(());
        reporter
            .expect_report_histogram_value_samples()
            .with(eq("latency"), always(), always(), eq(40.0), eq(50.0), eq(2))
            .times(1)
            .return_const(());
        reporter
            .expect_report_histogram_value_samples()
            .with(eq("latency"), always(), always(), eq(90.0), eq(f64::MAX), eq(1))
            .times(1)
            .return_const(());

        let scope = ScopeBuilder::new()
            .with_reporter(reporter)
            .with_report_interval(Duration::ZERO)
            .with_internal_metrics(false)
            .build()
            .expect("scope");

        let buckets: Buckets = ValueBuckets::linear(0.0, 10.0, 10).expect("valid buckets").into();
        let histogram = scope.histogram("latency", &buckets);
        histogram.record_value(42.42);
        scope.flush();
        histogram.record_value(45.0);
        histogram.record_value(1_000.0);
        scope.close();
    }

    #[test]
    fn test_timer_reports_immediately() {
        let mut reporter = MockReporter::with_flushes(1);
        reporter
            .expect_report_timer()
            .with(eq("db.query"), always(), eq(Duration::from_millis(15)))
            .times(1)
            .return_const(());

        let scope = ScopeBuilder::new()
            .with_reporter(reporter)
            .with_report_interval(Duration::ZERO)
            .with_internal_metrics(false)
            .build()
            .expect("scope");

        scope.sub_scope("db").timer("query").record(Duration::from_millis(15));
        assert_eq!(scope.capabilities(), Capabilities::REPORTING_TAGGING);
        scope.close();
    }

    #[test]
    fn test_internal_metrics_reported_as_gauges() {
        let mut reporter = MockReporter::with_flushes(1);
        let version = [("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned())]
            .into_iter()
            .collect::<Tags>();
        reporter.expect_report_counter().times(1).return_const(());
        reporter
            .expect_report_gauge()
            .with(eq("metrics_scope.internal.counter_cardinality"), eq(version.clone()), eq(1.0))
            .times(1)
            .return_const(());
        reporter
            .expect_report_gauge()
            .with(eq("metrics_scope.internal.num_active_scopes"), eq(version), eq(2.0))
            .times(1)
            .return_const(());
        reporter.expect_report_gauge().times(3).return_const(());

        let scope = ScopeBuilder::new()
            .with_reporter(reporter)
            .with_report_interval(Duration::ZERO)
            .build()
            .expect("scope");

        let child = scope.sub_scope("child");
        child.counter("hits").inc(1);
        scope.close();
    }
}
