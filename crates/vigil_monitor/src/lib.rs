//! Vigil Monitoring
//!
//! Everything that watches the system and reacts to it: a bounded metric
//! store with pluggable sinks, periodic health checks with threshold
//! alerting, an alert table with escalation and stale sweeping, outlier
//! detection over metric streams and a supervisor that runs recovery
//! actions for critical alerts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod anomaly;
pub mod healing;
pub mod health;
pub mod isolation;
pub mod recovery;
pub mod sink;
pub mod store;

pub use alert::{
    Alert, AlertKind, AlertPolicy, AlertSeverity, AlertStats, AlertTable, RecoveryAttempt,
    Resolution, SweepReport,
};
pub use anomaly::{Anomaly, AnomalyConfig, AnomalyDetector, PerformanceBaseline, Trend};
pub use healing::{HealingStats, RecoveryRecord, SelfHealingSupervisor};
pub use health::{
    default_catalog, CheckState, CheckStatus, HealthBand, HealthCheckSpec, HealthMonitor,
    HealthProbe, HealthSummary, ProbeResult,
};
pub use isolation::{ForestConfig, IsolationForest};
pub use recovery::RecoveryAction;
pub use sink::{BroadcastSink, TracingSink};
pub use store::{MetricStore, MetricStoreConfig};
