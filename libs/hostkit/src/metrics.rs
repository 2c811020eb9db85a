//! Metrics capability used by the owner and the standard middleware.
//!
//! [`MetricsScope`] is a small, taggable surface over counters, gauges and
//! timers. Three scopes ship with the crate:
//!
//! - [`NoopScope`]: discards everything (default).
//! - [`InMemoryScope`]: keeps values in memory; readable in tests and diagnostics.
//! - [`FacadeScope`]: forwards to the `metrics` crate facade, so whatever
//!   recorder the process installed (e.g. a Prometheus exporter) sees them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

pub trait Counter: Send + Sync {
    fn inc(&self, delta: u64);
}

pub trait Gauge: Send + Sync {
    fn update(&self, value: f64);
}

pub trait Timer: Send + Sync {
    fn record(&self, elapsed: Duration);
}

/// Source of named, taggable metrics.
pub trait MetricsScope: Send + Sync {
    fn counter(&self, name: &str) -> Arc<dyn Counter>;
    fn gauge(&self, name: &str) -> Arc<dyn Gauge>;
    fn timer(&self, name: &str) -> Arc<dyn Timer>;

    /// A scope whose metrics additionally carry `tags`.
    fn tagged(&self, tags: &[(&str, &str)]) -> Arc<dyn MetricsScope>;

    /// A scope whose metric names are prefixed with `prefix.`.
    fn sub_scope(&self, prefix: &str) -> Arc<dyn MetricsScope>;
}

/// Running timer measurement; records when stopped or dropped.
pub struct Stopwatch {
    timer: Arc<dyn Timer>,
    started: Instant,
    recorded: bool,
}

impl Stopwatch {
    pub fn start(timer: Arc<dyn Timer>) -> Self {
        Self {
            timer,
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Record the elapsed time and return it.
    pub fn stop(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        self.timer.record(elapsed);
        self.recorded = true;
        elapsed
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        if !self.recorded {
            self.timer.record(self.started.elapsed());
        }
    }
}

// ================= noop =================

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScope;

struct NoopMetric;

impl Counter for NoopMetric {
    fn inc(&self, _delta: u64) {}
}
impl Gauge for NoopMetric {
    fn update(&self, _value: f64) {}
}
impl Timer for NoopMetric {
    fn record(&self, _elapsed: Duration) {}
}

impl MetricsScope for NoopScope {
    fn counter(&self, _name: &str) -> Arc<dyn Counter> {
        Arc::new(NoopMetric)
    }
    fn gauge(&self, _name: &str) -> Arc<dyn Gauge> {
        Arc::new(NoopMetric)
    }
    fn timer(&self, _name: &str) -> Arc<dyn Timer> {
        Arc::new(NoopMetric)
    }
    fn tagged(&self, _tags: &[(&str, &str)]) -> Arc<dyn MetricsScope> {
        Arc::new(NoopScope)
    }
    fn sub_scope(&self, _prefix: &str) -> Arc<dyn MetricsScope> {
        Arc::new(NoopScope)
    }
}

// ================= naming helpers =================

type Tags = BTreeMap<String, String>;

fn join_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn merge_tags(base: &Tags, extra: &[(&str, &str)]) -> Tags {
    let mut tags = base.clone();
    for (k, v) in extra {
        tags.insert((*k).to_string(), (*v).to_string());
    }
    tags
}

/// `name{k1=v1,k2=v2}` with tags in key order; just `name` without tags.
fn metric_key(name: &str, tags: &Tags) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

// ================= in-memory =================

#[derive(Default)]
struct InMemoryCounter(AtomicU64);

impl Counter for InMemoryCounter {
    fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct InMemoryGauge(Mutex<f64>);

impl Gauge for InMemoryGauge {
    fn update(&self, value: f64) {
        *self.0.lock() = value;
    }
}

/// Aggregate of the measurements recorded by an in-memory timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimerStats {
    fn record(&mut self, elapsed: Duration) {
        self.min = if self.count == 0 { elapsed } else { self.min.min(elapsed) };
        self.max = self.max.max(elapsed);
        self.total = self.total.saturating_add(elapsed);
        self.count += 1;
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.count).ok().filter(|c| *c > 0)?;
        Some(self.total / count)
    }
}

#[derive(Default)]
struct InMemoryTimer(Mutex<TimerStats>);

impl Timer for InMemoryTimer {
    fn record(&self, elapsed: Duration) {
        self.0.lock().record(elapsed);
    }
}

#[derive(Default)]
struct Store {
    counters: DashMap<String, Arc<InMemoryCounter>>,
    gauges: DashMap<String, Arc<InMemoryGauge>>,
    timers: DashMap<String, Arc<InMemoryTimer>>,
}

/// Scope keeping every metric in process memory.
///
/// Clones, tagged scopes and sub-scopes all share one store, so a test can
/// hand a scope to the code under test and read values back from its own copy.
#[derive(Clone, Default)]
pub struct InMemoryScope {
    store: Arc<Store>,
    prefix: String,
    tags: Tags,
}

impl InMemoryScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, 0 if it was never incremented.
    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        let key = self.lookup_key(name, tags);
        self.store
            .counters
            .get(&key)
            .map(|c| c.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        let key = self.lookup_key(name, tags);
        self.store.gauges.get(&key).map(|g| *g.0.lock())
    }

    /// Number of measurements recorded by a timer.
    pub fn timer_count(&self, name: &str, tags: &[(&str, &str)]) -> usize {
        self.timer_stats(name, tags)
            .map_or(0, |stats| usize::try_from(stats.count).unwrap_or(usize::MAX))
    }

    pub fn timer_stats(&self, name: &str, tags: &[(&str, &str)]) -> Option<TimerStats> {
        let key = self.lookup_key(name, tags);
        self.store.timers.get(&key).map(|t| *t.0.lock())
    }

    /// All counter values keyed by `name{tags}`.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.store
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().0.load(Ordering::Relaxed)))
            .collect()
    }

    fn lookup_key(&self, name: &str, tags: &[(&str, &str)]) -> String {
        metric_key(&join_name(&self.prefix, name), &merge_tags(&self.tags, tags))
    }

    fn own_key(&self, name: &str) -> String {
        metric_key(&join_name(&self.prefix, name), &self.tags)
    }
}

impl MetricsScope for InMemoryScope {
    fn counter(&self, name: &str) -> Arc<dyn Counter> {
        let c = self
            .store
            .counters
            .entry(self.own_key(name))
            .or_default()
            .clone();
        c
    }

    fn gauge(&self, name: &str) -> Arc<dyn Gauge> {
        let g = self
            .store
            .gauges
            .entry(self.own_key(name))
            .or_default()
            .clone();
        g
    }

    fn timer(&self, name: &str) -> Arc<dyn Timer> {
        let t = self
            .store
            .timers
            .entry(self.own_key(name))
            .or_default()
            .clone();
        t
    }

    fn tagged(&self, tags: &[(&str, &str)]) -> Arc<dyn MetricsScope> {
        Arc::new(Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix.clone(),
            tags: merge_tags(&self.tags, tags),
        })
    }

    fn sub_scope(&self, prefix: &str) -> Arc<dyn MetricsScope> {
        Arc::new(Self {
            store: Arc::clone(&self.store),
            prefix: join_name(&self.prefix, prefix),
            tags: self.tags.clone(),
        })
    }
}

// ================= `metrics` facade =================

/// Scope forwarding to the global `metrics` recorder.
///
/// Timers are reported as histograms in seconds.
#[derive(Clone, Default, Debug)]
pub struct FacadeScope {
    prefix: String,
    tags: Tags,
}

struct FacadeCounter(metrics::Counter);
struct FacadeGauge(metrics::Gauge);
struct FacadeTimer(metrics::Histogram);

impl Counter for FacadeCounter {
    fn inc(&self, delta: u64) {
        self.0.increment(delta);
    }
}
impl Gauge for FacadeGauge {
    fn update(&self, value: f64) {
        self.0.set(value);
    }
}
impl Timer for FacadeTimer {
    fn record(&self, elapsed: Duration) {
        self.0.record(elapsed.as_secs_f64());
    }
}

impl FacadeScope {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tags: Tags::new(),
        }
    }

    fn labels(&self) -> Vec<metrics::Label> {
        self.tags
            .iter()
            .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
            .collect()
    }
}

impl MetricsScope for FacadeScope {
    fn counter(&self, name: &str) -> Arc<dyn Counter> {
        let name = join_name(&self.prefix, name);
        Arc::new(FacadeCounter(metrics::counter!(name, self.labels())))
    }

    fn gauge(&self, name: &str) -> Arc<dyn Gauge> {
        let name = join_name(&self.prefix, name);
        Arc::new(FacadeGauge(metrics::gauge!(name, self.labels())))
    }

    fn timer(&self, name: &str) -> Arc<dyn Timer> {
        let name = join_name(&self.prefix, name);
        Arc::new(FacadeTimer(metrics::histogram!(name, self.labels())))
    }

    fn tagged(&self, tags: &[(&str, &str)]) -> Arc<dyn MetricsScope> {
        Arc::new(Self {
            prefix: self.prefix.clone(),
            tags: merge_tags(&self.tags, tags),
        })
    }

    fn sub_scope(&self, prefix: &str) -> Arc<dyn MetricsScope> {
        Arc::new(Self {
            prefix: join_name(&self.prefix, prefix),
            tags: self.tags.clone(),
        })
    }
}
