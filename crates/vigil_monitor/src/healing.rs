//! Self-healing supervisor.
//!
//! Picks up open `Critical` alerts and tries the owning check's recovery
//! actions in order, each as a one-task workflow on the execution engine.
//! The first success resolves the alert. An alert whose actions are all
//! spent is not retried.

use crate::alert::{Alert, AlertSeverity, AlertTable, RecoveryAttempt, Resolution};
use crate::health::HealthMonitor;
use crate::recovery::RecoveryAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use vigil_core::{AlertId, BoundedHistory, SharedClock, SystemClock, WorkflowId};
use vigil_plan::{Task, Workflow};
use vigil_runtime::ExecutionEngine;

const RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);

/// One recovery action run against one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// Alert being healed
    pub alert_id: AlertId,
    /// Check the alert is about
    pub subject: String,
    /// Action tried
    pub action: RecoveryAction,
    /// Whether it worked
    pub success: bool,
    /// Workflow that ran it, if it got that far
    pub workflow_id: Option<WorkflowId>,
    /// Failure text
    pub error: Option<String>,
    /// When it finished
    pub at: DateTime<Utc>,
}

/// Supervisor counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingStats {
    /// Whether auto-healing is on
    pub enabled: bool,
    /// Actions run
    pub attempts: u64,
    /// Actions that succeeded
    pub successes: u64,
    /// Alerts resolved by an action
    pub alerts_healed: u64,
    /// Alerts whose actions all failed
    pub alerts_exhausted: u64,
}

/// Runs recovery actions for critical alerts
pub struct SelfHealingSupervisor {
    engine: Arc<ExecutionEngine>,
    health: Arc<HealthMonitor>,
    alerts: Arc<AlertTable>,
    enabled: AtomicBool,
    in_flight: Mutex<HashSet<AlertId>>,
    exhausted: Mutex<HashSet<AlertId>>,
    history: BoundedHistory<RecoveryRecord>,
    attempts: AtomicU64,
    successes: AtomicU64,
    healed: AtomicU64,
    exhausted_total: AtomicU64,
    clock: SharedClock,
}

impl std::fmt::Debug for SelfHealingSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealingSupervisor")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SelfHealingSupervisor {
    /// Supervisor keeping `history_capacity` recovery records
    #[must_use]
    pub fn new(
        engine: Arc<ExecutionEngine>,
        health: Arc<HealthMonitor>,
        alerts: Arc<AlertTable>,
        history_capacity: usize,
    ) -> Self {
        Self {
            engine,
            health,
            alerts,
            enabled: AtomicBool::new(true),
            in_flight: Mutex::new(HashSet::new()),
            exhausted: Mutex::new(HashSet::new()),
            history: BoundedHistory::new(history_capacity.max(1)),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            healed: AtomicU64::new(0),
            exhausted_total: AtomicU64::new(0),
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for record timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Turn auto-healing on or off
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::info!(enabled, "auto-healing toggled");
        }
    }

    /// Whether auto-healing is on
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Try to heal every open critical alert not already handled.
    /// Returns how many were resolved.
    pub async fn heal_pending(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let open = self.alerts.open_with_severity(AlertSeverity::Critical);
        let open_ids: HashSet<AlertId> = open.iter().map(|a| a.id).collect();
        self.exhausted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| open_ids.contains(id));

        let mut healed = 0;
        for alert in open {
            if !self.claim(alert.id) {
                continue;
            }
            if self.heal(&alert).await {
                healed += 1;
            }
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&alert.id);
        }
        healed
    }

    fn claim(&self, id: AlertId) -> bool {
        if self
            .exhausted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
        {
            return false;
        }
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    /// Run `alert`'s recovery actions until one succeeds
    pub async fn heal(&self, alert: &Alert) -> bool {
        let actions = self.health.recovery_actions(&alert.subject).unwrap_or_default();
        if actions.is_empty() {
            tracing::warn!(alert = %alert.id, subject = %alert.subject, "no recovery actions for alert");
            self.mark_exhausted(alert.id);
            return false;
        }

        for action in actions {
            let record = self.attempt(alert, action).await;
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let success = record.success;
            let attempt = RecoveryAttempt {
                action: action.as_str().to_string(),
                success,
                at: record.at,
                message: record.error.clone(),
            };
            if let Err(err) = self.alerts.record_attempt(alert.id, attempt) {
                tracing::debug!(alert = %alert.id, %err, "recovery attempt not recorded");
            }
            self.history.push(record);

            if success {
                self.successes.fetch_add(1, Ordering::Relaxed);
                if matches!(
                    self.alerts
                        .resolve(alert.id, Resolution::RecoveryAction(action.as_str().to_string())),
                    Ok(true)
                ) {
                    self.healed.fetch_add(1, Ordering::Relaxed);
                }
                tracing::info!(alert = %alert.id, %action, "recovery action succeeded");
                return true;
            }
        }

        tracing::error!(alert = %alert.id, subject = %alert.subject, "all recovery actions failed");
        self.mark_exhausted(alert.id);
        false
    }

    async fn attempt(&self, alert: &Alert, action: RecoveryAction) -> RecoveryRecord {
        tracing::info!(alert = %alert.id, %action, subject = %alert.subject, "running recovery action");
        let task = Task::new(action.as_str(), action.action_type())
            .with_parameters(json!({
                "alert_id": alert.id.to_string(),
                "subject": alert.subject,
                "severity": alert.severity,
                "current_value": alert.current_value,
                "threshold_value": alert.threshold_value,
            }))
            .with_timeout(RECOVERY_TIMEOUT)
            .with_description(format!("{action} for {}", alert.subject));
        let workflow = Workflow::new(format!("recovery-{}-{action}", alert.subject))
            .with_rollback_on_failure(false)
            .with_task(task);
        let workflow_id = workflow.id;

        let (success, error, workflow_id) = match self.engine.submit_workflow(workflow).await {
            Ok(result) => (result.is_success(), result.error, Some(workflow_id)),
            Err(err) => (false, Some(err.to_string()), None),
        };
        if let Some(error) = &error {
            tracing::warn!(alert = %alert.id, %action, %error, "recovery action failed");
        }
        RecoveryRecord {
            alert_id: alert.id,
            subject: alert.subject.clone(),
            action,
            success,
            workflow_id,
            error,
            at: self.clock.now(),
        }
    }

    fn mark_exhausted(&self, id: AlertId) {
        let fresh = self
            .exhausted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if fresh {
            self.exhausted_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Newest `n` recovery records, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<RecoveryRecord> {
        self.history.recent(n)
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> HealingStats {
        HealingStats {
            enabled: self.is_enabled(),
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            alerts_healed: self.healed.load(Ordering::Relaxed),
            alerts_exhausted: self.exhausted_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;
    use crate::health::{HealthCheckSpec, HealthProbe, ProbeResult};
    use crate::store::MetricStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use vigil_action::{ActionError, ActionOutput, FnAction};
    use vigil_core::CoreResult;
    use vigil_runtime::EngineConfig;

    struct Fine;

    #[async_trait]
    impl HealthProbe for Fine {
        async fn probe(&self) -> CoreResult<ProbeResult> {
            Ok(ProbeResult::healthy(0.0, 1.0))
        }
    }

    struct Fixture {
        supervisor: SelfHealingSupervisor,
        alerts: Arc<AlertTable>,
        engine: Arc<ExecutionEngine>,
    }

    fn fixture(actions: &[RecoveryAction]) -> Fixture {
        let alerts = Arc::new(AlertTable::default());
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&alerts),
            Arc::new(MetricStore::default()),
        ));
        let spec = actions
            .iter()
            .fold(HealthCheckSpec::new("cpu_usage"), |s, a| s.with_recovery(*a));
        health.register(spec, Arc::new(Fine)).unwrap();
        let engine = Arc::new(ExecutionEngine::new(EngineConfig::default()));
        Fixture {
            supervisor: SelfHealingSupervisor::new(
                Arc::clone(&engine),
                health,
                Arc::clone(&alerts),
                500,
            ),
            alerts,
            engine,
        }
    }

    fn register(engine: &ExecutionEngine, action: RecoveryAction, works: bool, calls: Arc<AtomicUsize>) {
        engine
            .registry()
            .register(Arc::new(FnAction::new(action.action_type(), move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if works {
                        Ok(ActionOutput::empty())
                    } else {
                        Err(ActionError::Failed("still broken".into()))
                    }
                }
            })))
            .unwrap();
    }

    fn critical(alerts: &AlertTable, subject: &str) -> AlertId {
        alerts.raise(Alert::new(
            AlertKind::HealthCheck,
            AlertSeverity::Critical,
            subject,
            "Health check failed",
            alerts.now(),
        ))
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        use RecoveryAction::*;
        let f = fixture(&[OptimizeConfiguration, ScaleResources, Failover]);
        let calls = Arc::new(AtomicUsize::new(0));
        register(&f.engine, OptimizeConfiguration, false, Arc::clone(&calls));
        register(&f.engine, ScaleResources, true, Arc::clone(&calls));
        register(&f.engine, Failover, true, Arc::clone(&calls));

        let id = critical(&f.alerts, "cpu_usage");
        assert_eq!(f.supervisor.heal_pending().await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let alert = f.alerts.get(id).unwrap();
        assert_eq!(
            alert.resolution,
            Some(Resolution::RecoveryAction("scale_resources".into()))
        );
        let tried: Vec<_> = alert
            .recovery_attempts
            .iter()
            .map(|a| (a.action.as_str(), a.success))
            .collect();
        assert_eq!(
            tried,
            vec![("optimize_configuration", false), ("scale_resources", true)]
        );
        let stats = f.supervisor.stats();
        assert_eq!((stats.attempts, stats.successes, stats.alerts_healed), (2, 1, 1));
        assert_eq!(f.supervisor.recent(10).len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_alert_is_not_retried() {
        let f = fixture(&[RecoveryAction::RestartService]);
        let calls = Arc::new(AtomicUsize::new(0));
        register(&f.engine, RecoveryAction::RestartService, false, Arc::clone(&calls));

        let id = critical(&f.alerts, "cpu_usage");
        assert_eq!(f.supervisor.heal_pending().await, 0);
        assert_eq!(f.supervisor.heal_pending().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!f.alerts.get(id).unwrap().is_resolved());
        assert_eq!(f.supervisor.stats().alerts_exhausted, 1);
    }

    #[tokio::test]
    async fn test_resolved_exhausted_alert_is_forgotten() {
        let f = fixture(&[RecoveryAction::RestartService]);
        let calls = Arc::new(AtomicUsize::new(0));
        register(&f.engine, RecoveryAction::RestartService, false, Arc::clone(&calls));

        let id = critical(&f.alerts, "cpu_usage");
        f.supervisor.heal_pending().await;
        assert!(f.supervisor.exhausted.lock().unwrap().contains(&id));

        f.alerts.resolve(id, Resolution::Manual).unwrap();
        f.supervisor.heal_pending().await;
        assert!(f.supervisor.exhausted.lock().unwrap().is_empty());
        assert_eq!(f.supervisor.stats().alerts_exhausted, 1);

        let next = critical(&f.alerts, "cpu_usage");
        assert_ne!(next, id);
        f.supervisor.heal_pending().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.supervisor.stats().alerts_exhausted, 2);
    }

    #[tokio::test]
    async fn test_unregistered_action_counts_as_failure() {
        let f = fixture(&[RecoveryAction::ClearCache]);
        let id = critical(&f.alerts, "cpu_usage");
        assert_eq!(f.supervisor.heal_pending().await, 0);
        let alert = f.alerts.get(id).unwrap();
        assert_eq!(alert.recovery_attempts.len(), 1);
        assert!(!alert.recovery_attempts[0].success);
    }

    #[tokio::test]
    async fn test_disabled_and_non_critical() {
        let f = fixture(&[RecoveryAction::RestartService]);
        let calls = Arc::new(AtomicUsize::new(0));
        register(&f.engine, RecoveryAction::RestartService, true, Arc::clone(&calls));

        f.alerts.raise(Alert::new(
            AlertKind::HealthCheck,
            AlertSeverity::Error,
            "cpu_usage",
            "not yet critical",
            f.alerts.now(),
        ));
        assert_eq!(f.supervisor.heal_pending().await, 0);

        f.supervisor.set_enabled(false);
        critical(&f.alerts, "cpu_usage");
        assert_eq!(f.supervisor.heal_pending().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        f.supervisor.set_enabled(true);
        assert_eq!(f.supervisor.heal_pending().await, 1);
    }

    #[tokio::test]
    async fn test_alert_without_check_is_exhausted() {
        let f = fixture(&[]);
        critical(&f.alerts, "latency");
        assert_eq!(f.supervisor.heal_pending().await, 0);
        assert_eq!(f.supervisor.stats().alerts_exhausted, 1);
        assert_eq!(f.supervisor.stats().attempts, 0);
    }
}
