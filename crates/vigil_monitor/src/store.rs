//! Metric buffer.
//!
//! Samples are kept in timestamp order and evicted by count and by age.
//! Every recorded sample is also forwarded to the registered sinks.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use vigil_core::{MetricSample, MetricsSink, SharedClock, SystemClock};

/// Buffer limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricStoreConfig {
    /// Most samples kept
    pub capacity: usize,
    /// Oldest sample age kept, in seconds
    pub retention_secs: u64,
}

impl Default for MetricStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention_secs: 24 * 3600,
        }
    }
}

impl MetricStoreConfig {
    /// Set the sample cap
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the retention window
    #[must_use]
    pub fn with_retention(mut self, retention: std::time::Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    fn retention(&self) -> Duration {
        let secs = i64::try_from(self.retention_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }
}

/// Time-ordered, bounded sample buffer
pub struct MetricStore {
    samples: RwLock<VecDeque<MetricSample>>,
    sinks: RwLock<Vec<Arc<dyn MetricsSink>>>,
    config: MetricStoreConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricStore")
            .field("len", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MetricStore {
    /// Create an empty store
    #[must_use]
    pub fn new(config: MetricStoreConfig) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            sinks: RwLock::new(Vec::new()),
            config,
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for age eviction
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Forward every future sample to `sink`
    pub fn add_sink(&self, sink: Arc<dyn MetricsSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Store a sample and forward it to the sinks
    pub fn record(&self, sample: MetricSample) {
        for sink in self.sinks.read().unwrap_or_else(PoisonError::into_inner).iter() {
            sink.emit(&sample);
        }

        let cutoff = self.cutoff();
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        if sample.timestamp < cutoff {
            return;
        }
        let at = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(at, sample);
        while samples.len() > self.config.capacity {
            samples.pop_front();
        }
        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(self.config.retention())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Store a value stamped now
    pub fn record_value(&self, name: impl Into<String>, value: f64) {
        self.record(MetricSample::new(name, value, self.clock.now()));
    }

    /// Drop samples older than the retention window; returns how many
    pub fn prune(&self) -> usize {
        let cutoff = self.cutoff();
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let before = samples.len();
        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
        }
        before - samples.len()
    }

    /// Up to `n` newest samples of `name`, oldest first
    #[must_use]
    pub fn recent(&self, name: &str, n: usize) -> Vec<MetricSample> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<MetricSample> = samples
            .iter()
            .rev()
            .filter(|s| s.name == name)
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Newest sample of `name`
    #[must_use]
    pub fn latest(&self, name: &str) -> Option<MetricSample> {
        self.recent(name, 1).pop()
    }

    /// Samples of `name` at or after `since`
    #[must_use]
    pub fn since(&self, name: &str, since: DateTime<Utc>) -> Vec<MetricSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.name == name && s.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Distinct metric names in first-seen order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let names: IndexSet<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Number of stored samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(MetricStoreConfig::default())
    }
}

impl MetricsSink for MetricStore {
    fn emit(&self, sample: &MetricSample) {
        self.record(sample.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use vigil_core::ManualClock;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl MetricsSink for Collect {
        fn emit(&self, sample: &MetricSample) {
            self.0.lock().unwrap().push(sample.name.clone());
        }
    }

    #[test]
    fn test_time_ordered_insert() {
        let now = Utc::now();
        let store = MetricStore::new(MetricStoreConfig::default())
            .with_clock(Arc::new(ManualClock::new(now)));
        store.record(MetricSample::new("cpu", 2.0, now));
        store.record(MetricSample::new("cpu", 1.0, now - Duration::seconds(5)));
        store.record(MetricSample::new("cpu", 3.0, now + Duration::seconds(5)));
        let values: Vec<f64> = store.recent("cpu", 10).iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(store.latest("cpu").unwrap().value, 3.0);
    }

    #[test]
    fn test_capacity_eviction() {
        let store = MetricStore::new(MetricStoreConfig::default().with_capacity(3));
        for i in 0..5 {
            store.record_value("m", f64::from(i));
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.recent("m", 10)[0].value, 2.0);
    }

    #[test]
    fn test_age_eviction() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = MetricStore::new(
            MetricStoreConfig::default().with_retention(std::time::Duration::from_secs(60)),
        )
        .with_clock(clock.clone());
        store.record_value("m", 1.0);
        clock.advance(std::time::Duration::from_secs(30));
        store.record_value("m", 2.0);
        clock.advance(std::time::Duration::from_secs(45));
        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 1);

        // already expired on arrival
        store.record(MetricSample::new("m", 9.0, start));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sinks_and_names() {
        let store = MetricStore::default();
        let sink = Arc::new(Collect::default());
        store.add_sink(sink.clone());
        store.record_value("a", 1.0);
        store.record_value("b", 1.0);
        store.record_value("a", 2.0);
        assert_eq!(*sink.0.lock().unwrap(), vec!["a", "b", "a"]);
        assert_eq!(store.names(), vec!["a", "b"]);
        assert_eq!(store.recent("a", 1)[0].value, 2.0);
    }
}
