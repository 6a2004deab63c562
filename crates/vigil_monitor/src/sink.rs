//! Metric sinks for external observability layers.

use tokio::sync::broadcast;
use vigil_core::{MetricSample, MetricsSink};

/// Fans samples out to any number of async subscribers.
///
/// Slow subscribers lag and lose the oldest samples; the sender never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<MetricSample>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` samples per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New subscription starting at the next sample
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MetricSample> {
        self.tx.subscribe()
    }

    /// Current number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl MetricsSink for BroadcastSink {
    fn emit(&self, sample: &MetricSample) {
        // Err only means nobody is subscribed
        let _ = self.tx.send(sample.clone());
    }
}

/// Writes every sample as a `tracing` debug event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn emit(&self, sample: &MetricSample) {
        tracing::debug!(
            target: "vigil::metrics",
            metric = %sample.name,
            value = sample.value,
            tags = ?sample.tags,
            "metric"
        );
    }
}
