use getopts::Options;
use hdrhistogram::Histogram as HdrHistogram;
use log::{error, info};
use metrics_scope::{
    Buckets, Capabilities, DebuggingReporter, Scope, ScopeBuilder, StatsReporter, Tags,
    ValueBuckets,
};
use quanta::{Clock, Instant as QuantaInstant};
use std::{
    env,
    ops::Sub,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const LOOP_SAMPLE: u64 = 1000;

/// A reporter which only counts what it is handed.
///
/// Simulates a typical backend by receiving every report, without the cost of an actual transport.
#[derive(Clone, Default)]
pub struct CountingReporter {
    reports: Arc<AtomicU64>,
}

impl CountingReporter {
    /// Gets the number of reports received so far.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.reports.fetch_add(1, Ordering::Relaxed);
    }
}

impl StatsReporter for CountingReporter {
    fn report_counter(&self, _: &str, _: &Tags, _: i64) {
        self.bump();
    }

    fn report_gauge(&self, _: &str, _: &Tags, _: f64) {
        self.bump();
    }

    fn report_timer(&self, _: &str, _: &Tags, _: Duration) {
        self.bump();
    }

    fn report_histogram_value_samples(
        &self,
        _: &str,
        _: &Tags,
        _: &Buckets,
        _: f64,
        _: f64,
        _: u64,
    ) {
        self.bump();
    }

    fn report_histogram_duration_samples(
        &self,
        _: &str,
        _: &Tags,
        _: &Buckets,
        _: Duration,
        _: Duration,
        _: u64,
    ) {
        self.bump();
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::REPORTING_TAGGING
    }

    fn flush(&self) {}
}

struct Generator {
    id: usize,
    scope: Scope,
    buckets: Buckets,
    t0: Option<QuantaInstant>,
    gauge: i64,
    hist: HdrHistogram<u64>,
    done: Arc<AtomicBool>,
    rate_counter: Arc<AtomicU64>,
}

impl Generator {
    fn new(
        id: usize,
        scope: Scope,
        buckets: Buckets,
        done: Arc<AtomicBool>,
        rate_counter: Arc<AtomicU64>,
    ) -> Generator {
        Generator {
            id,
            scope,
            buckets,
            t0: None,
            gauge: 0,
            hist: HdrHistogram::<u64>::new(3).expect("valid sigfig"),
            done,
            rate_counter,
        }
    }

    fn run_slow(&mut self) {
        let clock = Clock::new();
        let mut loop_counter = 0;
        let producer = self.id.to_string();

        loop {
            loop_counter += 1;

            self.gauge += 1;

            let t1 = clock.recent();

            if let Some(t0) = self.t0 {
                let start = if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                // Every sample goes through the scope cache and the registry.
                let scope = self.scope.sub_scope("producer").tagged([("id", producer.as_str())]);
                scope.counter("ok").inc(1);
                scope.gauge("total").update(self.gauge as f64);
                scope.histogram("ok", &self.buckets).record_duration(t1.sub(t0));

                if let Some(val) = start {
                    let delta = clock.now() - val;
                    self.hist.saturating_record(delta.as_nanos() as u64);

                    // We also increment our global counter for the sample rate here.
                    self.rate_counter.fetch_add(LOOP_SAMPLE * 3, Ordering::AcqRel);

                    if self.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }

            self.t0 = Some(t1);
        }
    }

    fn run_fast(&mut self) {
        let clock = Clock::new();
        let mut loop_counter = 0;

        let scope = self.scope.sub_scope("producer").tagged([("id", self.id.to_string())]);
        let counter = scope.counter("ok");
        let gauge = scope.gauge("total");
        let histogram = scope.histogram("ok", &self.buckets);

        loop {
            loop_counter += 1;

            self.gauge += 1;

            let t1 = clock.recent();

            if let Some(t0) = self.t0 {
                let start = if loop_counter % LOOP_SAMPLE == 0 { Some(clock.now()) } else { None };

                counter.inc(1);
                gauge.update(self.gauge as f64);
                histogram.record_duration(t1.sub(t0));

                if let Some(val) = start {
                    let delta = clock.now() - val;
                    self.hist.saturating_record(delta.as_nanos() as u64);

                    // We also increment our global counter for the sample rate here.
                    self.rate_counter.fetch_add(LOOP_SAMPLE * 3, Ordering::AcqRel);

                    if self.done.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }

            self.t0 = Some(t1);
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        info!(
            "    sender latency: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
            nanos_to_readable(self.hist.min()),
            nanos_to_readable(self.hist.value_at_percentile(50.0)),
            nanos_to_readable(self.hist.value_at_percentile(95.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.0)),
            nanos_to_readable(self.hist.value_at_percentile(99.9)),
            nanos_to_readable(self.hist.max())
        );
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("d", "duration", "number of seconds to run the benchmark", "INTEGER");
    opts.optopt(
        "m",
        "mode",
        "whether or run the benchmark in slow or fast mode (scope lookups vs held handles)",
        "STRING",
    );
    opts.optopt("p", "producers", "number of producers", "INTEGER");
    opts.optopt(
        "b",
        "backend",
        "which backend to report to: counting, debugging or none",
        "STRING",
    );
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> Option<T> {
    match value {
        Some(s) => s.parse().ok(),
        None => Some(default),
    }
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    info!("metrics-scope benchmark");

    let Some(seconds) = parse_or(matches.opt_str("duration"), 60u64) else {
        error!("duration must be an integer");
        return;
    };
    let Some(producers) = parse_or(matches.opt_str("producers"), 1usize) else {
        error!("producers must be an integer");
        return;
    };
    let mode = matches
        .opt_str("mode")
        .map(|s| if s.to_ascii_lowercase() == "fast" { "fast" } else { "slow" })
        .unwrap_or("slow")
        .to_owned();
    let backend = matches.opt_str("backend").unwrap_or_else(|| "counting".to_owned());

    info!("duration: {}s", seconds);
    info!("producers: {}", producers);
    info!("mode: {}", mode);
    info!("backend: {}", backend);

    // The main loop drives flushing, so the report loop stays off.
    let builder = ScopeBuilder::new()
        .with_prefix("benchmark")
        .with_report_interval(Duration::ZERO);
    let counting = CountingReporter::default();
    let builder = match backend.as_str() {
        "counting" => builder.with_reporter(counting.clone()),
        "debugging" => builder.with_cached_reporter(DebuggingReporter::new()),
        "none" => builder,
        other => {
            error!("unknown backend: {}", other);
            return;
        }
    };
    let root = match builder.build() {
        Ok(root) => root,
        Err(e) => {
            error!("failed to build root scope: {}", e);
            return;
        }
    };
    let buckets: Buckets = match ValueBuckets::linear(0.0, 0.000_05, 20) {
        Ok(buckets) => buckets.into(),
        Err(e) => {
            error!("invalid buckets: {}", e);
            return;
        }
    };

    info!("scope configured");

    // Spin up our sample producers.
    let done = Arc::new(AtomicBool::new(false));
    let rate_counter = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for id in 0..producers {
        let d = done.clone();
        let r = rate_counter.clone();
        let scope = root.clone();
        let buckets = buckets.clone();
        let mode = mode.clone();
        let handle = thread::spawn(move || {
            let mut gen = Generator::new(id, scope, buckets, d, r);
            if mode == "fast" {
                gen.run_fast();
            } else {
                gen.run_slow();
            }
        });

        handles.push(handle);
    }

    thread::spawn(|| loop {
        thread::sleep(Duration::from_millis(10));
        quanta::set_recent(quanta::Instant::now());
    });

    // Flush once per turn, and poll the rate counter to figure out the sample rate.
    let mut total = 0;
    let mut t0 = Instant::now();

    let mut flush_hist = HdrHistogram::<u64>::new(3).expect("valid sigfig");
    for _ in 0..seconds {
        let t1 = Instant::now();

        let start = Instant::now();
        root.flush();
        let end = Instant::now();
        flush_hist.saturating_record((end - start).as_nanos() as u64);

        let turn_total = rate_counter.load(Ordering::Acquire);
        let turn_delta = turn_total - total;
        total = turn_total;
        let rate = turn_delta as f64 / (t1 - t0).as_secs_f64();

        info!("sample ingest rate: {:.0} samples/sec", rate);
        t0 = t1;
        thread::sleep(Duration::new(1, 0));
    }

    info!("--------------------------------------------------------------------------------");
    info!(" ingested samples total: {}", total);
    info!(
        "      scope flush: min: {:8} p50: {:8} p95: {:8} p99: {:8} p999: {:8} max: {:8}",
        nanos_to_readable(flush_hist.min()),
        nanos_to_readable(flush_hist.value_at_percentile(50.0)),
        nanos_to_readable(flush_hist.value_at_percentile(95.0)),
        nanos_to_readable(flush_hist.value_at_percentile(99.0)),
        nanos_to_readable(flush_hist.value_at_percentile(99.9)),
        nanos_to_readable(flush_hist.max())
    );

    // Wait for the producers to finish so we can get their stats too.
    done.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.join();
    }

    root.close();
    if backend == "counting" {
        info!(" reports received: {}", counting.reports());
    }
}

fn nanos_to_readable(t: u64) -> String {
    let f = t as f64;
    if f < 1_000.0 {
        format!("{}ns", f)
    } else if f < 1_000_000.0 {
        format!("{:.0}μs", f / 1_000.0)
    } else if f < 2_000_000_000.0 {
        format!("{:.2}ms", f / 1_000_000.0)
    } else {
        format!("{:.3}s", f / 1_000_000_000.0)
    }
}
