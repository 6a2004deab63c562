//! Anomaly detection and performance baselines.
//!
//! Each pass looks at a rolling window of every stored metric. Once enough
//! samples exist, the newest slice is standardized and fed to an isolation
//! forest; outliers among the last few points raise `Warning` anomaly
//! alerts. Each point is reported at most once.

use crate::alert::{Alert, AlertKind, AlertSeverity, AlertTable};
use crate::isolation::{standardize, ForestConfig, IsolationForest};
use crate::store::MetricStore;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use vigil_core::{AlertId, MetricSample, SharedClock, SystemClock};

/// Fewest samples a baseline is computed from
const BASELINE_MIN: usize = 10;
/// Half-window compared for the trend
const TREND_HALF: usize = 10;

/// Detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Samples per metric considered each pass
    pub window: usize,
    /// Samples required before detection runs
    pub min_samples: usize,
    /// Newest samples the forest is fitted on
    pub fit_samples: usize,
    /// Newest samples checked for outliers
    pub inspect: usize,
    /// Forest parameters
    pub forest: ForestConfig,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window: 100,
            min_samples: 50,
            fit_samples: 50,
            inspect: 10,
            forest: ForestConfig::default(),
        }
    }
}

impl AnomalyConfig {
    /// Set the rolling window
    #[must_use]
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the detection minimum
    #[must_use]
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Set the forest parameters
    #[must_use]
    pub fn with_forest(mut self, forest: ForestConfig) -> Self {
        self.forest = forest;
        self
    }
}

/// Direction of a metric over the last two half-windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Recent mean more than 5% above the prior one
    Up,
    /// Recent mean more than 5% below the prior one
    Down,
    /// Neither
    Stable,
}

/// Expected behaviour of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    /// Metric name
    pub metric: String,
    /// Median of the window
    pub median: f64,
    /// Two standard deviations
    pub acceptable_deviation: f64,
    /// Recent direction
    pub trend: Trend,
    /// `min(samples / 100, 1)`
    pub confidence: f64,
    /// Samples the baseline was computed from
    pub sample_count: usize,
    /// When it was computed
    pub updated_at: DateTime<Utc>,
}

impl PerformanceBaseline {
    fn compute(metric: &str, values: &[f64], now: DateTime<Utc>) -> Option<Self> {
        if values.len() < BASELINE_MIN {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        let trend = if values.len() >= 2 * TREND_HALF {
            let mean_of = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
            let recent = mean_of(&values[values.len() - TREND_HALF..]);
            let prior = mean_of(&values[values.len() - 2 * TREND_HALF..values.len() - TREND_HALF]);
            if recent > prior * 1.05 {
                Trend::Up
            } else if recent < prior * 0.95 {
                Trend::Down
            } else {
                Trend::Stable
            }
        } else {
            Trend::Stable
        };

        Some(Self {
            metric: metric.to_string(),
            median: median(values),
            acceptable_deviation: std * 2.0,
            trend,
            confidence: (n / 100.0).min(1.0),
            sample_count: values.len(),
            updated_at: now,
        })
    }

    /// Whether `value` lies within the acceptable band
    #[must_use]
    pub fn accepts(&self, value: f64) -> bool {
        (value - self.median).abs() <= self.acceptable_deviation
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// One flagged sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Metric name
    pub metric: String,
    /// Flagged value
    pub value: f64,
    /// Sample time
    pub timestamp: DateTime<Utc>,
    /// Alert raised for it
    pub alert_id: AlertId,
}

/// Outlier detection over the metric store
pub struct AnomalyDetector {
    config: AnomalyConfig,
    store: Arc<MetricStore>,
    alerts: Arc<AlertTable>,
    baselines: RwLock<IndexMap<String, PerformanceBaseline>>,
    last_flagged: Mutex<IndexMap<String, DateTime<Utc>>>,
    clock: SharedClock,
}

impl std::fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnomalyDetector {
    /// Detector reading `store` and raising into `alerts`
    #[must_use]
    pub fn new(config: AnomalyConfig, store: Arc<MetricStore>, alerts: Arc<AlertTable>) -> Self {
        Self {
            config,
            store,
            alerts,
            baselines: RwLock::new(IndexMap::new()),
            last_flagged: Mutex::new(IndexMap::new()),
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for baseline timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Run a pass over every stored metric
    pub fn detect_all(&self) -> Vec<Anomaly> {
        self.store
            .names()
            .iter()
            .flat_map(|name| self.detect(name))
            .collect()
    }

    /// Run a pass over one metric
    pub fn detect(&self, metric: &str) -> Vec<Anomaly> {
        let window = self.store.recent(metric, self.config.window.max(1));
        let values: Vec<f64> = window.iter().map(|s| s.value).collect();

        let baseline = PerformanceBaseline::compute(metric, &values, self.clock.now());
        if let Some(baseline) = &baseline {
            self.baselines
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(metric.to_string(), baseline.clone());
        }

        if window.len() < self.config.min_samples.max(1) {
            return Vec::new();
        }

        let fit_from = window.len().saturating_sub(self.config.fit_samples.max(1));
        let slice: &[MetricSample] = &window[fit_from..];
        let scaled = standardize(&values[fit_from..]);
        let flags = IsolationForest::fit_predict(&scaled, &self.config.forest);
        let inspect_from = slice.len().saturating_sub(self.config.inspect);

        let mut last_flagged = self.last_flagged.lock().unwrap_or_else(PoisonError::into_inner);
        let mut found = Vec::new();
        for (sample, _) in slice[inspect_from..]
            .iter()
            .zip(&flags[inspect_from..])
            .filter(|(_, flagged)| **flagged)
        {
            if last_flagged
                .get(metric)
                .is_some_and(|last| sample.timestamp <= *last)
            {
                continue;
            }
            last_flagged.insert(metric.to_string(), sample.timestamp);

            let expected = baseline.as_ref().map_or(0.0, |b| b.median);
            let alert_id = self.alerts.raise(
                Alert::new(
                    AlertKind::Anomaly,
                    AlertSeverity::Warning,
                    metric,
                    format!("Anomaly detected: {metric}"),
                    sample.timestamp,
                )
                .with_description(format!("Anomalous value {:.2} detected for {metric}", sample.value))
                .with_values(sample.value, expected),
            );
            found.push(Anomaly {
                metric: metric.to_string(),
                value: sample.value,
                timestamp: sample.timestamp,
                alert_id,
            });
        }
        found
    }

    /// Current baseline of `metric`
    #[must_use]
    pub fn baseline(&self, metric: &str) -> Option<PerformanceBaseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(metric)
            .cloned()
    }

    /// Every baseline
    #[must_use]
    pub fn baselines(&self) -> Vec<PerformanceBaseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
