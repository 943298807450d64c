use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    default_buckets,
    registry::Registry,
    report_loop::ReportLoop,
    reporter::{Backend, CachedStatsReporter, StatsReporter},
    sanitize::{SanitizeOptions, Sanitizer},
    scope::{RootState, Scope},
    Buckets, Tags,
};

const DEFAULT_SEPARATOR: &str = ".";
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Errors that could occur while building a root scope.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to spawn the background thread running the report loop.
    #[error("failed to spawn background thread for report loop")]
    Backend,
}

/// Builder for a root [`Scope`].
pub struct ScopeBuilder {
    prefix: String,
    tags: Tags,
    separator: String,
    sanitize_options: Option<SanitizeOptions>,
    default_buckets: Buckets,
    report_interval: Duration,
    internal_metrics: bool,
    retained_timer_values: usize,
    backend: Backend,
}

impl ScopeBuilder {
    /// Creates a new `ScopeBuilder` with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefix of the root scope.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the tags of the root scope.
    ///
    /// Every scope of the tree inherits these tags.
    ///
    /// Defaults to no tags.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags = tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Set the separator placed between the segments of a fully-qualified name.
    ///
    /// Defaults to `.`.
    #[must_use]
    pub fn with_separator<S: Into<String>>(mut self, separator: S) -> Self {
        self.separator = separator.into();
        self
    }

    /// Set how names, tag keys and tag values are sanitized.
    ///
    /// Defaults to no sanitization.
    #[must_use]
    pub fn with_sanitize_options(mut self, options: SanitizeOptions) -> Self {
        self.sanitize_options = Some(options);
        self
    }

    /// Set the buckets of histograms created without explicit buckets.
    ///
    /// Defaults to duration buckets ranging from 0ms to 5s.
    #[must_use]
    pub fn with_default_buckets<B: Into<Buckets>>(mut self, buckets: B) -> Self {
        self.default_buckets = buckets.into();
        self
    }

    /// Set the interval at which metrics are reported to the backend.
    ///
    /// An interval of zero disables periodic reporting: metrics are then only reported by
    /// [`Scope::flush`] and when the root scope is closed.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set whether or not to report internal telemetry about the registry.
    ///
    /// When enabled, every flush also reports gauges tracking how many metrics and scopes exist,
    /// under the `metrics_scope.internal` prefix.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_internal_metrics(mut self, enabled: bool) -> Self {
        self.internal_metrics = enabled;
        self
    }

    /// Set how many measurements each timer keeps when no backend is configured.
    ///
    /// Timers report every measurement as soon as it is recorded, so without a backend they
    /// normally discard it. Retained measurements show up in [`Scope::snapshot`], which is useful
    /// for scopes built purely for tests. Measurements past the limit are dropped.
    ///
    /// Has no effect when a backend is configured. Defaults to 0.
    #[must_use]
    pub fn with_retained_timer_values(mut self, limit: usize) -> Self {
        self.retained_timer_values = limit;
        self
    }

    /// Set the backend to a reporter which is handed names and tags on every report.
    ///
    /// Replaces any previously configured backend.
    #[must_use]
    pub fn with_reporter<R>(mut self, reporter: R) -> Self
    where
        R: StatsReporter + 'static,
    {
        self.backend = Backend::Direct(Arc::new(reporter));
        self
    }

    /// Set the backend to a reporter which allocates a handle for every metric.
    ///
    /// Replaces any previously configured backend.
    #[must_use]
    pub fn with_cached_reporter<R>(mut self, reporter: R) -> Self
    where
        R: CachedStatsReporter + 'static,
    {
        self.backend = Backend::Cached(Arc::new(reporter));
        self
    }

    /// Builds the root scope, spawning the report loop.
    ///
    /// # Errors
    ///
    /// If the background thread for the report loop cannot be spawned, an error is returned.
    pub fn build(self) -> Result<Scope, BuildError> {
        let sanitizer = match self.sanitize_options {
            Some(options) => Sanitizer::new(options),
            None => Sanitizer::noop(),
        };

        let prefix = sanitizer.name(&self.prefix).into_owned();
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| (sanitizer.key(k).into_owned(), sanitizer.value(v).into_owned()))
            .collect::<Tags>();

        let registry = Registry::new(self.backend, self.internal_metrics)
            .with_retained_timer_values(self.retained_timer_values);
        let registry = Arc::new(registry);
        let report_loop = ReportLoop::new(Arc::clone(&registry), self.report_interval)?;
        let root = RootState::new(
            registry,
            report_loop,
            sanitizer,
            self.separator,
            self.default_buckets,
        );

        Ok(Scope::new_root(root, prefix, tags))
    }
}

impl Default for ScopeBuilder {
    fn default() -> Self {
        ScopeBuilder {
            prefix: String::new(),
            tags: Tags::new(),
            separator: DEFAULT_SEPARATOR.to_owned(),
            sanitize_options: None,
            default_buckets: default_buckets(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            internal_metrics: true,
            retained_timer_values: 0,
            backend: Backend::None,
        }
    }
}
