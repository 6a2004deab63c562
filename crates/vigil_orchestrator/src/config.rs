//! Orchestrator configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty or missing file
//! is a valid configuration.
//!
//! ```toml
//! auto_healing = true
//!
//! [intervals]
//! decision_secs = 300
//! health_tick_secs = 10
//!
//! [engine.pools]
//! cpu = 100
//! memory = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vigil_decision::{Criterion, DecisionConfig};
use vigil_monitor::{AlertPolicy, AnomalyConfig, MetricStoreConfig};
use vigil_runtime::EngineConfig;

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// The configuration could not be rendered
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Offending field
        field: String,
        /// What is wrong
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Period of each background loop, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopIntervals {
    /// Autonomous decision cycle
    pub decision_secs: u64,
    /// How often due health checks are looked for
    pub health_tick_secs: u64,
    /// Metric collection
    pub metric_collection_secs: u64,
    /// Anomaly detection pass
    pub anomaly_secs: u64,
    /// Alert escalation and stale sweep
    pub alert_processing_secs: u64,
    /// Self-healing pass
    pub self_healing_secs: u64,
    /// Criteria adaptation
    pub adaptation_secs: u64,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            decision_secs: 300,
            health_tick_secs: 10,
            metric_collection_secs: 30,
            anomaly_secs: 120,
            alert_processing_secs: 60,
            self_healing_secs: 30,
            adaptation_secs: 1800,
        }
    }
}

impl LoopIntervals {
    fn named(&self) -> [(&'static str, u64); 7] {
        [
            ("intervals.decision_secs", self.decision_secs),
            ("intervals.health_tick_secs", self.health_tick_secs),
            ("intervals.metric_collection_secs", self.metric_collection_secs),
            ("intervals.anomaly_secs", self.anomaly_secs),
            ("intervals.alert_processing_secs", self.alert_processing_secs),
            ("intervals.self_healing_secs", self.self_healing_secs),
            ("intervals.adaptation_secs", self.adaptation_secs),
        ]
    }

    /// Decision cycle period
    #[must_use]
    pub fn decision(&self) -> Duration {
        Duration::from_secs(self.decision_secs)
    }

    /// Health tick period
    #[must_use]
    pub fn health_tick(&self) -> Duration {
        Duration::from_secs(self.health_tick_secs)
    }

    /// Metric collection period
    #[must_use]
    pub fn metric_collection(&self) -> Duration {
        Duration::from_secs(self.metric_collection_secs)
    }

    /// Anomaly detection period
    #[must_use]
    pub fn anomaly(&self) -> Duration {
        Duration::from_secs(self.anomaly_secs)
    }

    /// Alert processing period
    #[must_use]
    pub fn alert_processing(&self) -> Duration {
        Duration::from_secs(self.alert_processing_secs)
    }

    /// Self-healing period
    #[must_use]
    pub fn self_healing(&self) -> Duration {
        Duration::from_secs(self.self_healing_secs)
    }

    /// Adaptation period
    #[must_use]
    pub fn adaptation(&self) -> Duration {
        Duration::from_secs(self.adaptation_secs)
    }
}

/// Everything the orchestrator needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Run recovery actions for critical alerts
    pub auto_healing: bool,
    /// Recovery records kept
    pub recovery_history: usize,
    /// Loop periods
    pub intervals: LoopIntervals,
    /// Pools and workflow history
    pub engine: EngineConfig,
    /// Criterion weights and decision history
    pub decision: DecisionConfig,
    /// Metric buffer limits
    pub metrics: MetricStoreConfig,
    /// Alert aging and retention
    pub alerts: AlertPolicy,
    /// Anomaly detector parameters
    pub anomaly: AnomalyConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_healing: true,
            recovery_history: 500,
            intervals: LoopIntervals::default(),
            engine: EngineConfig::default(),
            decision: DecisionConfig::default(),
            metrics: MetricStoreConfig::default(),
            alerts: AlertPolicy::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from `path`; a missing file yields the defaults
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or
    /// the result does not validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns `Render` if serialization fails
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value is usable
    ///
    /// # Errors
    ///
    /// Returns `Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in self.intervals.named() {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "must be > 0"));
            }
        }
        if self.recovery_history == 0 {
            return Err(ConfigError::invalid("recovery_history", "must be > 0"));
        }
        if self.engine.history_capacity == 0 {
            return Err(ConfigError::invalid("engine.history_capacity", "must be > 0"));
        }

        let weights = &self.decision.weights;
        for criterion in Criterion::ALL {
            let w = weights.weight(criterion);
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::invalid(
                    format!("decision.weights.{criterion}"),
                    "must be a finite, non-negative number",
                ));
            }
        }
        if weights.total() <= 0.0 {
            return Err(ConfigError::invalid("decision.weights", "at least one weight must be > 0"));
        }
        if self.decision.history_capacity == 0 {
            return Err(ConfigError::invalid("decision.history_capacity", "must be > 0"));
        }

        if self.metrics.capacity == 0 {
            return Err(ConfigError::invalid("metrics.capacity", "must be > 0"));
        }
        if self.alerts.capacity == 0 {
            return Err(ConfigError::invalid("alerts.capacity", "must be > 0"));
        }
        if self.alerts.escalate_after_secs >= self.alerts.stale_after_secs {
            return Err(ConfigError::invalid(
                "alerts.escalate_after_secs",
                "must be below alerts.stale_after_secs",
            ));
        }

        let anomaly = &self.anomaly;
        if anomaly.min_samples == 0 || anomaly.min_samples > anomaly.window {
            return Err(ConfigError::invalid("anomaly.min_samples", "must be in 1..=anomaly.window"));
        }
        if anomaly.inspect == 0 || anomaly.inspect > anomaly.fit_samples {
            return Err(ConfigError::invalid("anomaly.inspect", "must be in 1..=anomaly.fit_samples"));
        }
        let contamination = anomaly.forest.contamination;
        if contamination.is_nan() || contamination <= 0.0 || contamination > 0.5 {
            return Err(ConfigError::invalid("anomaly.forest.contamination", "must be in (0, 0.5]"));
        }
        if anomaly.forest.trees == 0 {
            return Err(ConfigError::invalid("anomaly.forest.trees", "must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.intervals.decision(), Duration::from_secs(300));
        assert_eq!(config.intervals.adaptation(), Duration::from_secs(1800));
        assert_eq!(config.engine.pools.len(), 4);
        assert_eq!(config.decision.history_capacity, 1000);
        assert_eq!(config.engine.history_capacity, 100);
        assert_eq!(config.alerts.capacity, 1000);
        assert_eq!(config.recovery_history, 500);
        assert_eq!(config.metrics.capacity, 10_000);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(&dir.path().join("vigil.toml")).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    fn test_partial_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
auto_healing = false

[intervals]
health_tick_secs = 5

[engine]
strict_pools = true

[engine.pools]
gpu = 8

[decision.weights]
risk_level = 0.3
"#
        )
        .unwrap();
        let config = OrchestratorConfig::load(file.path()).unwrap();
        assert!(!config.auto_healing);
        assert_eq!(config.intervals.health_tick_secs, 5);
        assert_eq!(config.intervals.decision_secs, 300);
        assert!(config.engine.strict_pools);
        assert_eq!(config.engine.pools.len(), 1);
        assert_eq!(config.engine.pools["gpu"], 8);
        assert!((config.decision.weights.risk_level - 0.3).abs() < 1e-9);
        assert!((config.decision.weights.financial_impact - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "intervals = 3").unwrap();
        let err = OrchestratorConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = OrchestratorConfig::default();
        config.intervals.anomaly_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "intervals.anomaly_secs"
        ));

        let mut config = OrchestratorConfig::default();
        config.decision.weights.learning_opportunity = -0.1;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.alerts.escalate_after_secs = config.alerts.stale_after_secs;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.anomaly.forest.contamination = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_render_round_trips() {
        let config = OrchestratorConfig::default();
        let text = config.to_toml().unwrap();
        let back: OrchestratorConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
