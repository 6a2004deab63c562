//! Alerts and the alert table.
//!
//! An alert is open until resolved; resolution is terminal. Open alerts
//! escalate to `Critical` once they reach the escalation age and resolve
//! themselves as stale at the stale age.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use vigil_core::time::age;
use vigil_core::{AlertId, CoreError, CoreResult, SharedClock, SystemClock};

/// Resolved alerts considered for mean time to recovery
const MTTR_WINDOW: usize = 50;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Something is broken
    Error,
    /// Triggers self-healing
    Critical,
}

impl AlertSeverity {
    const ALL: [Self; 4] = [Self::Info, Self::Warning, Self::Error, Self::Critical];

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        })
    }
}

/// What raised the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A health check crossed its failure threshold
    HealthCheck,
    /// A health check probe did not answer in time
    Timeout,
    /// The anomaly detector flagged a sample
    Anomaly,
}

/// How an alert was closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "action")]
pub enum Resolution {
    /// The owning check passed again
    HealthRecovered,
    /// An operator closed it
    Manual,
    /// Open past the stale age
    Stale,
    /// A recovery action succeeded
    RecoveryAction(String),
}

/// One recovery action tried against an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// Action name
    pub action: String,
    /// Whether it worked
    pub success: bool,
    /// When it finished
    pub at: DateTime<Utc>,
    /// Error text on failure
    pub message: Option<String>,
}

/// A raised alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id
    pub id: AlertId,
    /// Source
    pub kind: AlertKind,
    /// Current severity
    pub severity: AlertSeverity,
    /// Short title
    pub title: String,
    /// Details
    pub description: String,
    /// Check or metric name the alert is about
    pub subject: String,
    /// Observed value
    pub current_value: f64,
    /// Value it was compared against
    pub threshold_value: f64,
    /// When it was raised
    pub created_at: DateTime<Utc>,
    /// When it was resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// How it was resolved
    pub resolution: Option<Resolution>,
    /// Every recovery action tried, in order
    pub recovery_attempts: Vec<RecoveryAttempt>,
}

impl Alert {
    /// New open alert
    #[must_use]
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        subject: impl Into<String>,
        title: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            kind,
            severity,
            title: title.into(),
            description: String::new(),
            subject: subject.into(),
            current_value: 0.0,
            threshold_value: 0.0,
            created_at,
            resolved_at: None,
            resolution: None,
            recovery_attempts: Vec::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set observed and threshold values
    #[must_use]
    pub fn with_values(mut self, current: f64, threshold: f64) -> Self {
        self.current_value = current;
        self.threshold_value = threshold;
        self
    }

    /// Whether the alert is closed
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Time since it was raised
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        age(now, self.created_at)
    }
}

/// Aging and retention rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    /// Age at which open alerts become `Critical`, in seconds
    pub escalate_after_secs: u64,
    /// Age at which open alerts resolve as stale, in seconds
    pub stale_after_secs: u64,
    /// Most alerts kept, open and resolved together
    pub capacity: usize,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            escalate_after_secs: 3600,
            stale_after_secs: 24 * 3600,
            capacity: 1000,
        }
    }
}

impl AlertPolicy {
    /// Set the escalation age
    #[must_use]
    pub fn with_escalate_after(mut self, after: Duration) -> Self {
        self.escalate_after_secs = after.as_secs();
        self
    }

    /// Set the stale age
    #[must_use]
    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after_secs = after.as_secs();
        self
    }

    /// Set the retention cap
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// What one aging sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Alerts raised to `Critical`
    pub escalated: Vec<AlertId>,
    /// Alerts resolved as stale
    pub stale: Vec<AlertId>,
}

/// Alert counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    /// Alerts raised since start
    pub total_raised: u64,
    /// Alerts raised per initial severity
    pub raised_by_severity: IndexMap<AlertSeverity, u64>,
    /// Open alerts
    pub open: usize,
    /// Resolved alerts still retained
    pub resolved: usize,
    /// Fraction of resolved alerts closed without any recovery action;
    /// a proxy for false positives
    pub auto_resolved_ratio: Option<f64>,
    /// Mean seconds from raise to resolution by a recovery action
    pub mean_time_to_recovery_secs: Option<f64>,
}

#[derive(Debug, Default)]
struct Inner {
    alerts: IndexMap<AlertId, Alert>,
    raised: [u64; 4],
}

/// Shared table of alerts in raise order
#[derive(Debug)]
pub struct AlertTable {
    inner: RwLock<Inner>,
    policy: AlertPolicy,
    clock: SharedClock,
}

impl AlertTable {
    /// Create an empty table
    #[must_use]
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for aging
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Current time according to the table's clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an alert, evicting the oldest resolved alert if full
    pub fn raise(&self, alert: Alert) -> AlertId {
        let id = alert.id;
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Error => tracing::error!(
                alert = %id,
                severity = %alert.severity,
                subject = %alert.subject,
                "{}: {}", alert.title, alert.description
            ),
            _ => tracing::warn!(
                alert = %id,
                severity = %alert.severity,
                subject = %alert.subject,
                "{}: {}", alert.title, alert.description
            ),
        }

        let mut inner = self.write();
        inner.raised[alert.severity.index()] += 1;
        inner.alerts.insert(id, alert);
        while inner.alerts.len() > self.policy.capacity.max(1) {
            let victim = inner
                .alerts
                .iter()
                .find(|(_, a)| a.is_resolved())
                .or_else(|| inner.alerts.first())
                .map(|(k, _)| *k);
            match victim {
                Some(victim) if victim != id => {
                    inner.alerts.shift_remove(&victim);
                }
                _ => break,
            }
        }
        id
    }

    /// Copy of one alert
    #[must_use]
    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.read().alerts.get(&id).cloned()
    }

    /// Every retained alert in raise order
    #[must_use]
    pub fn all(&self) -> Vec<Alert> {
        self.read().alerts.values().cloned().collect()
    }

    /// Open alerts in raise order
    #[must_use]
    pub fn open(&self) -> Vec<Alert> {
        self.read()
            .alerts
            .values()
            .filter(|a| !a.is_resolved())
            .cloned()
            .collect()
    }

    /// Open alerts at exactly `severity`
    #[must_use]
    pub fn open_with_severity(&self, severity: AlertSeverity) -> Vec<Alert> {
        self.read()
            .alerts
            .values()
            .filter(|a| !a.is_resolved() && a.severity == severity)
            .cloned()
            .collect()
    }

    /// Oldest open alert of `kind` about `subject`
    #[must_use]
    pub fn open_for(&self, subject: &str, kind: AlertKind) -> Option<Alert> {
        self.read()
            .alerts
            .values()
            .find(|a| !a.is_resolved() && a.kind == kind && a.subject == subject)
            .cloned()
    }

    /// Raise an open alert's severity; never lowers it
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn escalate(&self, id: AlertId, severity: AlertSeverity) -> CoreResult<bool> {
        let mut inner = self.write();
        let alert = inner
            .alerts
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Alert", id.to_string()))?;
        if alert.is_resolved() || alert.severity >= severity {
            return Ok(false);
        }
        tracing::warn!(alert = %id, from = %alert.severity, to = %severity, title = %alert.title, "alert escalated");
        alert.severity = severity;
        Ok(true)
    }

    /// Close an alert. Returns `false` if it was already closed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn resolve(&self, id: AlertId, resolution: Resolution) -> CoreResult<bool> {
        let now = self.clock.now();
        let mut inner = self.write();
        let alert = inner
            .alerts
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Alert", id.to_string()))?;
        Ok(close(alert, resolution, now))
    }

    /// Close every open alert of `kinds` about `subject`; returns how many
    pub fn resolve_for_subject(
        &self,
        subject: &str,
        kinds: &[AlertKind],
        resolution: &Resolution,
    ) -> usize {
        let now = self.clock.now();
        let mut inner = self.write();
        inner
            .alerts
            .values_mut()
            .filter(|a| a.subject == subject && kinds.contains(&a.kind))
            .map(|a| close(a, resolution.clone(), now))
            .filter(|closed| *closed)
            .count()
    }

    /// Note a recovery attempt on an alert
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn record_attempt(&self, id: AlertId, attempt: RecoveryAttempt) -> CoreResult<()> {
        let mut inner = self.write();
        let alert = inner
            .alerts
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Alert", id.to_string()))?;
        alert.recovery_attempts.push(attempt);
        Ok(())
    }

    /// Apply the aging rules to every open alert
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let escalate_after = Duration::from_secs(self.policy.escalate_after_secs);
        let stale_after = Duration::from_secs(self.policy.stale_after_secs);
        let mut report = SweepReport::default();

        let mut inner = self.write();
        for alert in inner.alerts.values_mut().filter(|a| !a.is_resolved()) {
            let alert_age = alert.age(now);
            if alert_age >= stale_after {
                close(alert, Resolution::Stale, now);
                report.stale.push(alert.id);
            } else if alert_age >= escalate_after && alert.severity != AlertSeverity::Critical {
                tracing::warn!(alert = %alert.id, title = %alert.title, "open alert escalated to critical");
                alert.severity = AlertSeverity::Critical;
                report.escalated.push(alert.id);
            }
        }
        report
    }

    /// Counters and recovery statistics
    #[must_use]
    pub fn stats(&self) -> AlertStats {
        let inner = self.read();
        let resolved: Vec<&Alert> = inner.alerts.values().filter(|a| a.is_resolved()).collect();
        let auto_resolved = resolved
            .iter()
            .filter(|a| !matches!(a.resolution, Some(Resolution::RecoveryAction(_))))
            .count();

        let recoveries: Vec<f64> = resolved
            .iter()
            .rev()
            .filter(|a| matches!(a.resolution, Some(Resolution::RecoveryAction(_))))
            .take(MTTR_WINDOW)
            .filter_map(|a| a.resolved_at.map(|r| age(r, a.created_at).as_secs_f64()))
            .collect();

        AlertStats {
            total_raised: inner.raised.iter().sum(),
            raised_by_severity: AlertSeverity::ALL
                .iter()
                .map(|s| (*s, inner.raised[s.index()]))
                .collect(),
            open: inner.alerts.len() - resolved.len(),
            resolved: resolved.len(),
            auto_resolved_ratio: (!resolved.is_empty())
                .then(|| auto_resolved as f64 / resolved.len() as f64),
            mean_time_to_recovery_secs: (!recoveries.is_empty())
                .then(|| recoveries.iter().sum::<f64>() / recoveries.len() as f64),
        }
    }

    /// Number of retained alerts
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().alerts.len()
    }

    /// Whether nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlertTable {
    fn default() -> Self {
        Self::new(AlertPolicy::default())
    }
}

fn close(alert: &mut Alert, resolution: Resolution, now: DateTime<Utc>) -> bool {
    if alert.is_resolved() {
        return false;
    }
    tracing::info!(alert = %alert.id, title = %alert.title, ?resolution, "alert resolved");
    alert.resolved_at = Some(now);
    alert.resolution = Some(resolution);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_core::ManualClock;

    fn table() -> (AlertTable, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (AlertTable::default().with_clock(clock.clone()), clock)
    }

    fn health(table: &AlertTable, subject: &str, severity: AlertSeverity) -> AlertId {
        table.raise(Alert::new(
            AlertKind::HealthCheck,
            severity,
            subject,
            format!("Health check failed: {subject}"),
            table.now(),
        ))
    }

    #[test]
    fn test_escalates_at_one_hour() {
        let (table, clock) = table();
        let id = health(&table, "cpu", AlertSeverity::Warning);

        clock.advance(Duration::from_secs(3599));
        assert!(table.sweep().escalated.is_empty());
        clock.advance(Duration::from_secs(1));
        assert_eq!(table.sweep().escalated, vec![id]);
        assert_eq!(table.get(id).unwrap().severity, AlertSeverity::Critical);
        // only once
        assert!(table.sweep().escalated.is_empty());
    }

    #[test]
    fn test_stale_after_a_day() {
        let (table, clock) = table();
        let id = health(&table, "cpu", AlertSeverity::Error);
        clock.advance(Duration::from_secs(24 * 3600));
        let report = table.sweep();
        assert_eq!(report.stale, vec![id]);
        let alert = table.get(id).unwrap();
        assert_eq!(alert.resolution, Some(Resolution::Stale));
        assert!(table.open().is_empty());
    }

    #[test]
    fn test_resolution_is_terminal() {
        let (table, _) = table();
        let id = health(&table, "cpu", AlertSeverity::Error);
        assert!(table.resolve(id, Resolution::Manual).unwrap());
        assert!(!table.resolve(id, Resolution::Stale).unwrap());
        assert!(!table.escalate(id, AlertSeverity::Critical).unwrap());
        assert_eq!(table.get(id).unwrap().resolution, Some(Resolution::Manual));
        assert!(table.resolve(AlertId::new(), Resolution::Manual).is_err());
    }

    #[test]
    fn test_resolve_for_subject_respects_kind() {
        let (table, _) = table();
        health(&table, "cpu", AlertSeverity::Error);
        let anomaly = table.raise(Alert::new(
            AlertKind::Anomaly,
            AlertSeverity::Warning,
            "cpu",
            "Anomaly",
            table.now(),
        ));
        let n = table.resolve_for_subject(
            "cpu",
            &[AlertKind::HealthCheck, AlertKind::Timeout],
            &Resolution::HealthRecovered,
        );
        assert_eq!(n, 1);
        assert!(!table.get(anomaly).unwrap().is_resolved());
    }

    #[test]
    fn test_escalate_is_one_way() {
        let (table, _) = table();
        let id = health(&table, "cpu", AlertSeverity::Critical);
        assert!(!table.escalate(id, AlertSeverity::Error).unwrap());
        assert_eq!(table.get(id).unwrap().severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_capacity_evicts_resolved_first() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let table = AlertTable::new(AlertPolicy::default().with_capacity(2)).with_clock(clock);
        let open = health(&table, "a", AlertSeverity::Error);
        let closed = health(&table, "b", AlertSeverity::Error);
        table.resolve(closed, Resolution::Manual).unwrap();
        let newest = health(&table, "c", AlertSeverity::Error);
        assert!(table.get(open).is_some());
        assert!(table.get(closed).is_none());
        assert!(table.get(newest).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_stats() {
        let (table, clock) = table();
        let a = health(&table, "a", AlertSeverity::Critical);
        let b = health(&table, "b", AlertSeverity::Error);
        health(&table, "c", AlertSeverity::Warning);

        clock.advance(Duration::from_secs(120));
        table
            .record_attempt(
                a,
                RecoveryAttempt {
                    action: "restart_service".into(),
                    success: true,
                    at: table.now(),
                    message: None,
                },
            )
            .unwrap();
        table
            .resolve(a, Resolution::RecoveryAction("restart_service".into()))
            .unwrap();
        table.resolve(b, Resolution::HealthRecovered).unwrap();

        let stats = table.stats();
        assert_eq!(stats.total_raised, 3);
        assert_eq!(stats.raised_by_severity[&AlertSeverity::Critical], 1);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.auto_resolved_ratio, Some(0.5));
        assert_eq!(stats.mean_time_to_recovery_secs, Some(120.0));
    }
}
