//! Point-in-time view of the whole system.

use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_decision::DecisionStatus;
use vigil_monitor::{Alert, AlertStats, CheckStatus, HealingStats, HealthSummary};
use vigil_runtime::{ActiveTask, ActiveWorkflow, ExecutionMetrics, PoolSnapshot};

/// Everything an operator asks for first
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Background loops running
    pub monitoring: bool,
    /// Self-healing enabled
    pub auto_healing: bool,
    /// Overall health score and band
    pub health: HealthSummary,
    /// Per-check state
    pub checks: Vec<CheckStatus>,
    /// Workflows in flight
    pub active_workflows: Vec<ActiveWorkflow>,
    /// Tasks in flight
    pub active_tasks: Vec<ActiveTask>,
    /// Unresolved alerts
    pub open_alerts: Vec<Alert>,
    /// Alert counters
    pub alert_stats: AlertStats,
    /// Pool capacity and allocation
    pub pools: Vec<PoolSnapshot>,
    /// Execution counters
    pub execution: ExecutionMetrics,
    /// Decision engine summary
    pub decisions: DecisionStatus,
    /// Self-healing counters
    pub healing: HealingStats,
    /// When this was taken
    pub generated_at: DateTime<Utc>,
}

impl SystemStatus {
    /// Critical alerts still open
    #[must_use]
    pub fn critical_alerts(&self) -> usize {
        self.open_alerts
            .iter()
            .filter(|a| a.severity == vigil_monitor::AlertSeverity::Critical)
            .count()
    }
}
