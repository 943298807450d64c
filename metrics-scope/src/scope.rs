use std::{
    fmt,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{AcqRel, Acquire},
        },
        Arc, Weak,
    },
};

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    handles::{Counter, Gauge, Histogram, Timer},
    key::key_for_prefixed_string_map,
    merge_tags,
    registry::Registry,
    report_loop::ReportLoop,
    reporter::Capabilities,
    sanitize::Sanitizer,
    Buckets, Snapshot, Tags,
};

static NOOP_SCOPE: Lazy<Scope> = Lazy::new(|| Scope {
    inner: Arc::new(ScopeInner {
        prefix: String::new(),
        tags: Arc::default(),
        root: None,
        is_root: false,
        closed: AtomicBool::new(false),
    }),
});

/// State shared by every scope of a tree.
pub(crate) struct RootState {
    pub registry: Arc<Registry>,
    pub report_loop: ReportLoop,
    pub sanitizer: Sanitizer,
    pub separator: String,
    pub default_buckets: Buckets,
    // Keyed by the identity key of the prefix and tags of each scope.
    scopes: RwLock<HashMap<String, Weak<ScopeInner>>>,
}

impl RootState {
    pub fn new(
        registry: Arc<Registry>,
        report_loop: ReportLoop,
        sanitizer: Sanitizer,
        separator: String,
        default_buckets: Buckets,
    ) -> Self {
        Self {
            registry,
            report_loop,
            sanitizer,
            separator,
            default_buckets,
            scopes: RwLock::new(HashMap::new()),
        }
    }
}

struct ScopeInner {
    prefix: String,
    tags: Arc<Tags>,
    root: Option<Arc<RootState>>,
    is_root: bool,
    closed: AtomicBool,
}

impl ScopeInner {
    fn new(prefix: String, tags: Arc<Tags>, root: &Arc<RootState>, is_root: bool) -> Self {
        root.registry.scope_opened();
        Self { prefix, tags, root: Some(Arc::clone(root)), is_root, closed: AtomicBool::new(false) }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Acquire)
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if let Some(root) = &self.root {
            root.registry.scope_dropped();
        }
    }
}

/// A named, tagged node of a metric hierarchy.
///
/// Every scope of a tree shares the registry and report loop of its root, so metrics created with
/// the same fully-qualified name and tags are the same metric, however the scope creating them was
/// reached. Scopes are cheap to clone.
///
/// Scopes are created with [`ScopeBuilder`](crate::ScopeBuilder), and derived from one another with
/// [`Scope::tagged`] and [`Scope::sub_scope`].
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new_root(root: RootState, prefix: String, tags: Tags) -> Self {
        let root = Arc::new(root);
        let key = key_for_prefixed_string_map(&prefix, &tags);
        let inner = Arc::new(ScopeInner::new(prefix, Arc::new(tags), &root, true));
        root.scopes.write().insert(key, Arc::downgrade(&inner));

        Scope { inner }
    }

    /// Gets the no-op scope.
    ///
    /// The no-op scope hands out no-op metrics, and every scope derived from it is the no-op scope
    /// itself. It is shared, so calling this never allocates.
    pub fn noop() -> Self {
        NOOP_SCOPE.clone()
    }

    /// Returns `true` if this is the no-op scope.
    pub fn is_noop(&self) -> bool {
        self.inner.root.is_none()
    }

    /// Returns `true` if both scopes are the same scope object.
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Prefix prepended to the name of every metric of this scope.
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Tags attached to every metric of this scope.
    pub fn tags(&self) -> &Tags {
        &self.inner.tags
    }

    /// Returns `true` if this scope has been closed.
    pub fn is_closed(&self) -> bool {
        !self.inner.is_open()
    }

    /// Gets or creates the counter called `name`.
    pub fn counter(&self, name: &str) -> Counter {
        match &self.inner.root {
            Some(root) => {
                let name = self.fully_qualified_name(root, name);
                Counter::from_arc(root.registry.counter(&name, &self.inner.tags))
            }
            None => Counter::noop(),
        }
    }

    /// Gets or creates the gauge called `name`.
    pub fn gauge(&self, name: &str) -> Gauge {
        match &self.inner.root {
            Some(root) => {
                let name = self.fully_qualified_name(root, name);
                Gauge::from_arc(root.registry.gauge(&name, &self.inner.tags))
            }
            None => Gauge::noop(),
        }
    }

    /// Gets or creates the timer called `name`.
    pub fn timer(&self, name: &str) -> Timer {
        match &self.inner.root {
            Some(root) => {
                let name = self.fully_qualified_name(root, name);
                Timer::from_arc(root.registry.timer(&name, &self.inner.tags))
            }
            None => Timer::noop(),
        }
    }

    /// Gets or creates the histogram called `name`.
    ///
    /// When `buckets` is `None`, the default buckets of the tree are used. Buckets only matter when
    /// the histogram is created: an existing histogram keeps the buckets it was created with.
    pub fn histogram<'a, B>(&self, name: &str, buckets: B) -> Histogram
    where
        B: Into<Option<&'a Buckets>>,
    {
        match &self.inner.root {
            Some(root) => {
                let name = self.fully_qualified_name(root, name);
                let buckets = buckets.into().unwrap_or(&root.default_buckets);
                Histogram::from_arc(root.registry.histogram(&name, &self.inner.tags, buckets))
            }
            None => Histogram::noop(),
        }
    }

    /// Derives a scope with `tags` merged on top of the tags of this scope.
    ///
    /// Tag keys and values are sanitized first. If `tags` is empty, this scope is returned as-is.
    /// Asking for the same resulting tags again returns the same scope object, as long as it is
    /// still alive and open.
    ///
    /// If this scope is closed, the no-op scope is returned instead.
    pub fn tagged<I, K, V>(&self, tags: I) -> Scope
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let Some(root) = self.open_root() else {
            return Scope::noop();
        };

        let extra = tags
            .into_iter()
            .map(|(k, v)| {
                (
                    root.sanitizer.key(k.as_ref()).into_owned(),
                    root.sanitizer.value(v.as_ref()).into_owned(),
                )
            })
            .collect::<Tags>();
        if extra.is_empty() {
            return self.clone();
        }

        let tags = merge_tags(Some(&self.inner.tags), Some(&extra)).unwrap_or_default();
        self.get_or_create_scope(root, self.inner.prefix.clone(), Arc::new(tags))
    }

    /// Derives a scope whose prefix is the prefix of this scope followed by `name`.
    ///
    /// If this scope is closed, the no-op scope is returned instead.
    pub fn sub_scope(&self, name: &str) -> Scope {
        let Some(root) = self.open_root() else {
            return Scope::noop();
        };

        let name = root.sanitizer.name(name);
        let prefix = if self.inner.prefix.is_empty() {
            name.into_owned()
        } else {
            format!("{}{}{}", self.inner.prefix, root.separator, name)
        };
        self.get_or_create_scope(root, prefix, Arc::clone(&self.inner.tags))
    }

    /// What the backend of this tree is able to do.
    pub fn capabilities(&self) -> Capabilities {
        match &self.inner.root {
            Some(root) => root.registry.backend().capabilities(),
            None => Capabilities::NONE,
        }
    }

    /// Copies the current state of every metric of the tree.
    ///
    /// This does not reset anything, and can be called as often as needed.
    pub fn snapshot(&self) -> Snapshot {
        match &self.inner.root {
            Some(root) => root.registry.snapshot(),
            None => Snapshot::default(),
        }
    }

    /// Reports every metric of the tree to the backend now.
    ///
    /// Does nothing if a flush is already in progress, or if the root scope has been closed.
    pub fn flush(&self) {
        if let Some(root) = &self.inner.root {
            let _ = root.report_loop.flush();
        }
    }

    /// Closes this scope.
    ///
    /// Closing the root scope stops the report loop, after one final flush. Closing any other scope
    /// only stops further scopes from being derived from it: its metrics live in the shared
    /// registry, and keep being reported until the root scope is closed.
    ///
    /// Closing a scope more than once does nothing.
    pub fn close(&self) {
        let Some(root) = &self.inner.root else {
            return;
        };
        if self.inner.closed.swap(true, AcqRel) {
            return;
        }

        debug!(prefix = %self.inner.prefix, is_root = self.inner.is_root, "Closing scope.");
        if self.inner.is_root {
            root.report_loop.close();
        }
    }

    /// Removes the counter with the given identity key from the registry.
    ///
    /// Handles to the counter held elsewhere keep working, but are no longer reported.
    pub fn delete_counter(&self, key: &str) -> bool {
        self.inner.root.as_ref().map_or(false, |root| root.registry.delete_counter(key))
    }

    /// Removes the gauge with the given identity key from the registry.
    pub fn delete_gauge(&self, key: &str) -> bool {
        self.inner.root.as_ref().map_or(false, |root| root.registry.delete_gauge(key))
    }

    /// Removes the timer with the given identity key from the registry.
    pub fn delete_timer(&self, key: &str) -> bool {
        self.inner.root.as_ref().map_or(false, |root| root.registry.delete_timer(key))
    }

    /// Removes the histogram with the given identity key from the registry.
    pub fn delete_histogram(&self, key: &str) -> bool {
        self.inner.root.as_ref().map_or(false, |root| root.registry.delete_histogram(key))
    }

    fn open_root(&self) -> Option<&Arc<RootState>> {
        self.inner.root.as_ref().filter(|_| self.inner.is_open())
    }

    fn fully_qualified_name(&self, root: &RootState, name: &str) -> String {
        if self.inner.prefix.is_empty() {
            return root.sanitizer.name(name).into_owned();
        }

        let name = format!("{}{}{}", self.inner.prefix, root.separator, name);
        root.sanitizer.name(&name).into_owned()
    }

    fn get_or_create_scope(&self, root: &Arc<RootState>, prefix: String, tags: Arc<Tags>) -> Scope {
        let key = key_for_prefixed_string_map(&prefix, &tags);

        let existing = root.scopes.read().get(&key).and_then(Weak::upgrade);
        if let Some(inner) = existing.filter(|inner| inner.is_open()) {
            return Scope { inner };
        }

        // Switch to the write guard, checking again in case we lost the race.
        let mut scopes = root.scopes.write();
        let existing = scopes.get(&key).and_then(Weak::upgrade);
        if let Some(inner) = existing.filter(|inner| inner.is_open()) {
            return Scope { inner };
        }

        let inner = Arc::new(ScopeInner::new(prefix, tags, root, false));
        scopes.retain(|_, scope| scope.strong_count() > 0);
        scopes.insert(key, Arc::downgrade(&inner));
        Scope { inner }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::noop()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("prefix", &self.inner.prefix)
            .field("tags", &self.inner.tags)
            .field("is_root", &self.inner.is_root)
            .field("closed", &self.is_closed())
            .finish()
    }
}
