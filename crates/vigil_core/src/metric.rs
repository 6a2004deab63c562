//! Metric samples and the sink interface external observability hooks into.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single named measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name, e.g. `pool.cpu.utilization`
    pub name: String,
    /// Measured value
    pub value: f64,
    /// When it was measured
    pub timestamp: DateTime<Utc>,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tags: IndexMap<String, String>,
}

impl MetricSample {
    /// Create a sample without tags
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            tags: IndexMap::new(),
        }
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Receiver of emitted metric samples.
///
/// Implementations must not block; anything slow belongs behind a channel.
pub trait MetricsSink: Send + Sync {
    /// Accept one sample
    fn emit(&self, sample: &MetricSample);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn emit(&self, _sample: &MetricSample) {}
}
