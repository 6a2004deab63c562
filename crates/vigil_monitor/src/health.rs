//! Health checks and the health monitor.
//!
//! Each check moves through a small state machine driven by consecutive
//! failures:
//!
//! ```text
//! Healthy (0) ──fail──► Degraded (< threshold) ──fail──► Failing (>= threshold)
//!     ▲                                                        │
//!     └──────────────────────── success ◄──────────────────────┘
//! ```
//!
//! Reaching the threshold raises an alert (`Error`, escalated to `Critical`
//! at twice the threshold). A timed-out probe counts as a failure and raises
//! a `Timeout` alert instead. The next success resolves both.

use crate::alert::{Alert, AlertKind, AlertSeverity, AlertTable, Resolution};
use crate::recovery::RecoveryAction;
use crate::store::MetricStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use vigil_core::time::age;
use vigil_core::{CoreError, CoreResult, MetricSample, SharedClock, SystemClock};

/// Change in overall score that is worth recording
const SCORE_DELTA: f64 = 0.05;

/// What one probe observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Whether the subject is healthy
    pub healthy: bool,
    /// Human-readable detail
    pub message: String,
    /// Observed value
    pub current_value: f64,
    /// Limit it was compared against
    pub threshold_value: f64,
}

impl ProbeResult {
    /// Healthy observation
    #[must_use]
    pub fn healthy(current_value: f64, threshold_value: f64) -> Self {
        Self {
            healthy: true,
            message: String::new(),
            current_value,
            threshold_value,
        }
    }

    /// Unhealthy observation
    #[must_use]
    pub fn unhealthy(message: impl Into<String>, current_value: f64, threshold_value: f64) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            current_value,
            threshold_value,
        }
    }

    /// Compare `value` against an upper `limit`
    #[must_use]
    pub fn below(name: &str, value: f64, limit: f64) -> Self {
        if value < limit {
            Self::healthy(value, limit)
        } else {
            Self::unhealthy(format!("{name} at {value:.1}, limit {limit:.1}"), value, limit)
        }
    }
}

/// Something that can observe one subject's health
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Observe the subject. An error counts as a failed check.
    ///
    /// # Errors
    ///
    /// Returns an error when the subject could not be observed
    async fn probe(&self) -> CoreResult<ProbeResult>;
}

/// Static description of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// Unique name, also the alert subject
    pub name: String,
    /// Seconds between runs
    pub interval_secs: u64,
    /// Seconds a probe may take
    pub timeout_secs: u64,
    /// Consecutive failures before alerting
    pub failure_threshold: u32,
    /// Remedies to try, in order
    pub recovery_actions: Vec<RecoveryAction>,
    /// Whether the check runs
    pub enabled: bool,
}

impl HealthCheckSpec {
    /// Enabled check with a 60s interval, 10s timeout and threshold 3
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval_secs: 60,
            timeout_secs: 10,
            failure_threshold: 3,
            recovery_actions: Vec::new(),
            enabled: true,
        }
    }

    /// Set the interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs();
        self
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Set the failure threshold; zero is treated as one
    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Append a recovery action
    #[must_use]
    pub fn with_recovery(mut self, action: RecoveryAction) -> Self {
        self.recovery_actions.push(action);
        self
    }

    /// Start disabled
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }
}

/// The built-in system checks. Probes come from the embedder.
#[must_use]
pub fn default_catalog() -> Vec<HealthCheckSpec> {
    use RecoveryAction::*;
    let secs = Duration::from_secs;
    vec![
        HealthCheckSpec::new("cpu_usage")
            .with_interval(secs(30))
            .with_timeout(secs(10))
            .with_threshold(3)
            .with_recovery(OptimizeConfiguration)
            .with_recovery(ScaleResources),
        HealthCheckSpec::new("memory_usage")
            .with_interval(secs(30))
            .with_timeout(secs(10))
            .with_threshold(3)
            .with_recovery(ClearCache)
            .with_recovery(RestartService),
        HealthCheckSpec::new("disk_usage")
            .with_interval(secs(60))
            .with_timeout(secs(10))
            .with_threshold(2)
            .with_recovery(ClearCache)
            .with_recovery(OptimizeConfiguration),
        HealthCheckSpec::new("external_connectivity")
            .with_interval(secs(60))
            .with_timeout(secs(15))
            .with_threshold(2)
            .with_recovery(RestartService)
            .with_recovery(Failover),
    ]
}

/// Where a check sits in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    /// No failures
    Healthy,
    /// Failing, below threshold
    Degraded,
    /// At or above threshold
    Failing,
}

impl CheckState {
    fn weight(self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Degraded => 0.5,
            Self::Failing => 0.0,
        }
    }
}

/// Overall health band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    /// Score at least 0.9
    Excellent,
    /// Score at least 0.7
    Good,
    /// Score at least 0.5
    Warning,
    /// Score at least 0.3
    Critical,
    /// Anything lower
    Failure,
}

impl HealthBand {
    /// Band for `score`
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => Self::Excellent,
            s if s >= 0.7 => Self::Good,
            s if s >= 0.5 => Self::Warning,
            s if s >= 0.3 => Self::Critical,
            _ => Self::Failure,
        }
    }
}

/// Live state of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStatus {
    /// Check name
    pub name: String,
    /// State machine position
    pub state: CheckState,
    /// Whether it runs
    pub enabled: bool,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Last run start
    pub last_run: Option<DateTime<Utc>>,
    /// Last success
    pub last_success: Option<DateTime<Utc>>,
    /// Last failure detail
    pub last_message: Option<String>,
    /// Last observed value
    pub last_value: Option<f64>,
}

/// Overall health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Weighted score in [0, 1]
    pub score: f64,
    /// Band of the score
    pub band: HealthBand,
    /// Healthy enabled checks
    pub healthy: usize,
    /// Degraded enabled checks
    pub degraded: usize,
    /// Failing enabled checks
    pub failing: usize,
    /// When it was computed
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for HealthSummary {
    fn default() -> Self {
        Self {
            score: 0.8,
            band: HealthBand::Good,
            healthy: 0,
            degraded: 0,
            failing: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Passed(ProbeResult),
    Failed(ProbeResult),
    TimedOut,
}

async fn observe(probe: Arc<dyn HealthProbe>, timeout: Duration) -> Outcome {
    match tokio::time::timeout(timeout, probe.probe()).await {
        Ok(Ok(result)) if result.healthy => Outcome::Passed(result),
        Ok(Ok(result)) => Outcome::Failed(result),
        Ok(Err(err)) => Outcome::Failed(ProbeResult::unhealthy(err.to_string(), 0.0, 0.0)),
        Err(_) => Outcome::TimedOut,
    }
}

struct Registered {
    spec: HealthCheckSpec,
    probe: Arc<dyn HealthProbe>,
    status: CheckStatus,
}

/// Runs registered checks and keeps the overall health score
pub struct HealthMonitor {
    checks: RwLock<IndexMap<String, Registered>>,
    alerts: Arc<AlertTable>,
    store: Arc<MetricStore>,
    summary: RwLock<HealthSummary>,
    clock: SharedClock,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("checks", &self.check_names())
            .field("summary", &self.summary())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Monitor raising into `alerts` and recording into `store`
    #[must_use]
    pub fn new(alerts: Arc<AlertTable>, store: Arc<MetricStore>) -> Self {
        Self {
            checks: RwLock::new(IndexMap::new()),
            alerts,
            store,
            summary: RwLock::new(HealthSummary::default()),
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for scheduling
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Add a check
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken
    pub fn register(&self, spec: HealthCheckSpec, probe: Arc<dyn HealthProbe>) -> CoreResult<()> {
        let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
        if checks.contains_key(&spec.name) {
            return Err(CoreError::AlreadyExists {
                kind: "HealthCheck".into(),
                id: spec.name,
            });
        }
        tracing::info!(check = %spec.name, interval_secs = spec.interval_secs, "health check registered");
        let status = CheckStatus {
            name: spec.name.clone(),
            state: CheckState::Healthy,
            enabled: spec.enabled,
            consecutive_failures: 0,
            last_run: None,
            last_success: None,
            last_message: None,
            last_value: None,
        };
        checks.insert(spec.name.clone(), Registered { spec, probe, status });
        Ok(())
    }

    /// Turn a check on or off
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown check
    pub fn set_enabled(&self, name: &str, enabled: bool) -> CoreResult<()> {
        let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
        let check = checks
            .get_mut(name)
            .ok_or_else(|| CoreError::not_found("HealthCheck", name))?;
        check.spec.enabled = enabled;
        check.status.enabled = enabled;
        Ok(())
    }

    /// Recovery actions of a check, in order
    #[must_use]
    pub fn recovery_actions(&self, name: &str) -> Option<Vec<RecoveryAction>> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|c| c.spec.recovery_actions.clone())
    }

    /// Registered check names
    #[must_use]
    pub fn check_names(&self) -> Vec<String> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// State of every check
    #[must_use]
    pub fn statuses(&self) -> Vec<CheckStatus> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| c.status.clone())
            .collect()
    }

    /// State of one check
    #[must_use]
    pub fn status(&self, name: &str) -> Option<CheckStatus> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|c| c.status.clone())
    }

    /// Last computed overall health
    #[must_use]
    pub fn summary(&self) -> HealthSummary {
        self.summary.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run every enabled check whose interval has elapsed, concurrently,
    /// then refresh the overall score. Returns how many checks ran.
    pub async fn run_due_checks(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<(String, Duration, Arc<dyn HealthProbe>)> = {
            let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
            checks
                .values_mut()
                .filter(|c| c.spec.enabled)
                .filter(|c| {
                    c.status.last_run.is_none_or(|last| {
                        age(now, last) >= Duration::from_secs(c.spec.interval_secs)
                    })
                })
                .map(|c| {
                    c.status.last_run = Some(now);
                    (
                        c.spec.name.clone(),
                        Duration::from_secs(c.spec.timeout_secs),
                        Arc::clone(&c.probe),
                    )
                })
                .collect()
        };

        let ran = due.len();
        let outcomes = join_all(
            due.into_iter()
                .map(|(name, timeout, probe)| async move { (name, observe(probe, timeout).await) }),
        )
        .await;

        for (name, outcome) in outcomes {
            self.apply(&name, outcome);
        }
        self.update_overall();
        ran
    }

    /// Run one check now regardless of its interval
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown check
    pub async fn run_check(&self, name: &str) -> CoreResult<CheckStatus> {
        let (timeout, probe) = {
            let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
            let check = checks
                .get_mut(name)
                .ok_or_else(|| CoreError::not_found("HealthCheck", name))?;
            check.status.last_run = Some(self.clock.now());
            (Duration::from_secs(check.spec.timeout_secs), Arc::clone(&check.probe))
        };
        let outcome = observe(probe, timeout).await;
        self.apply(name, outcome);
        self.update_overall();
        self.status(name)
            .ok_or_else(|| CoreError::not_found("HealthCheck", name))
    }

    fn apply(&self, name: &str, outcome: Outcome) {
        let now = self.clock.now();
        let (spec, failures) = {
            let mut checks = self.checks.write().unwrap_or_else(PoisonError::into_inner);
            let Some(check) = checks.get_mut(name) else {
                return;
            };
            let threshold = check.spec.threshold();
            let status = &mut check.status;
            match &outcome {
                Outcome::Passed(result) => {
                    status.consecutive_failures = 0;
                    status.state = CheckState::Healthy;
                    status.last_success = Some(now);
                    status.last_message = None;
                    status.last_value = Some(result.current_value);
                }
                Outcome::Failed(result) => {
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_message = Some(result.message.clone());
                    status.last_value = Some(result.current_value);
                }
                Outcome::TimedOut => {
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_message =
                        Some(format!("timed out after {}s", check.spec.timeout_secs));
                }
            }
            if status.consecutive_failures > 0 {
                status.state = if status.consecutive_failures >= threshold {
                    CheckState::Failing
                } else {
                    CheckState::Degraded
                };
            }
            (check.spec.clone(), status.consecutive_failures)
        };

        let value = match outcome {
            Outcome::Passed(_) => 1.0,
            _ => 0.0,
        };
        self.store.record(
            MetricSample::new(format!("health_check_{name}"), value, now).with_tag("check_name", name),
        );

        match outcome {
            Outcome::Passed(_) => {
                let resolved = self.alerts.resolve_for_subject(
                    name,
                    &[AlertKind::HealthCheck, AlertKind::Timeout],
                    &Resolution::HealthRecovered,
                );
                if resolved > 0 {
                    tracing::info!(check = name, resolved, "health check recovered");
                }
            }
            Outcome::Failed(result) => {
                tracing::debug!(check = name, failures, message = %result.message, "health check failed");
                if failures >= spec.threshold() {
                    self.raise_health_alert(&spec, failures, &result, now);
                }
            }
            Outcome::TimedOut => {
                tracing::warn!(check = name, failures, "health check timed out");
                if failures >= spec.threshold()
                    && self.alerts.open_for(name, AlertKind::Timeout).is_none()
                {
                    let timeout = spec.timeout_secs as f64;
                    self.alerts.raise(
                        Alert::new(
                            AlertKind::Timeout,
                            AlertSeverity::Error,
                            name,
                            format!("Health check timeout: {name}"),
                            now,
                        )
                        .with_description(format!(
                            "Health check {name} timed out after {}s",
                            spec.timeout_secs
                        ))
                        .with_values(timeout, timeout),
                    );
                }
            }
        }
    }

    fn raise_health_alert(
        &self,
        spec: &HealthCheckSpec,
        failures: u32,
        result: &ProbeResult,
        now: DateTime<Utc>,
    ) {
        let severity = if failures >= spec.threshold().saturating_mul(2) {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Error
        };
        match self.alerts.open_for(&spec.name, AlertKind::HealthCheck) {
            Some(open) => {
                if let Err(err) = self.alerts.escalate(open.id, severity) {
                    tracing::debug!(check = %spec.name, alert = %open.id, %err, "escalation skipped");
                }
            }
            None => {
                let description = if result.message.is_empty() {
                    "Health check failed".to_string()
                } else {
                    result.message.clone()
                };
                self.alerts.raise(
                    Alert::new(
                        AlertKind::HealthCheck,
                        severity,
                        spec.name.clone(),
                        format!("Health check failed: {}", spec.name),
                        now,
                    )
                    .with_description(description)
                    .with_values(result.current_value, result.threshold_value),
                );
            }
        }
    }

    /// Recompute the overall score; records `overall_health_score` when the
    /// band changes or the score moves by more than 0.05
    pub fn update_overall(&self) -> HealthSummary {
        let now = self.clock.now();
        let (mut healthy, mut degraded, mut failing) = (0, 0, 0);
        let mut weighted = 0.0;
        for check in self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.spec.enabled)
        {
            match check.status.state {
                CheckState::Healthy => healthy += 1,
                CheckState::Degraded => degraded += 1,
                CheckState::Failing => failing += 1,
            }
            weighted += check.status.state.weight();
        }

        let mut summary = self.summary.write().unwrap_or_else(PoisonError::into_inner);
        let enabled = healthy + degraded + failing;
        if enabled == 0 {
            return summary.clone();
        }
        let score = weighted / enabled as f64;
        let band = HealthBand::from_score(score);
        let changed = band != summary.band || (score - summary.score).abs() > SCORE_DELTA;
        if band != summary.band {
            tracing::info!(from = ?summary.band, to = ?band, score, "overall health changed");
        }
        if changed {
            summary.score = score;
            summary.band = band;
            self.store
                .record(MetricSample::new("overall_health_score", score, now));
        }
        summary.healthy = healthy;
        summary.degraded = degraded;
        summary.failing = failing;
        summary.updated_at = Some(now);
        summary.clone()
    }
}
