//! Recovery actions a health check can name.

use serde::{Deserialize, Serialize};

/// Predefined remedial action, dispatched as an action type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Restart the affected service
    RestartService,
    /// Add capacity
    ScaleResources,
    /// Undo recent changes
    RollbackChanges,
    /// Switch to a standby
    Failover,
    /// Reapply a tuned configuration
    OptimizeConfiguration,
    /// Drop cached state
    ClearCache,
    /// Repair corrupted data
    RepairData,
}

impl RecoveryAction {
    /// Every recovery action
    pub const ALL: [Self; 7] = [
        Self::RestartService,
        Self::ScaleResources,
        Self::RollbackChanges,
        Self::Failover,
        Self::OptimizeConfiguration,
        Self::ClearCache,
        Self::RepairData,
    ];

    /// snake_case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RestartService => "restart_service",
            Self::ScaleResources => "scale_resources",
            Self::RollbackChanges => "rollback_changes",
            Self::Failover => "failover",
            Self::OptimizeConfiguration => "optimize_configuration",
            Self::ClearCache => "clear_cache",
            Self::RepairData => "repair_data",
        }
    }

    /// Registry key the action dispatches to
    #[must_use]
    pub fn action_type(self) -> String {
        format!("recovery.{}", self.as_str())
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_types_are_distinct() {
        let types: std::collections::HashSet<_> =
            RecoveryAction::ALL.iter().map(|a| a.action_type()).collect();
        assert_eq!(types.len(), RecoveryAction::ALL.len());
        assert_eq!(RecoveryAction::ClearCache.action_type(), "recovery.clear_cache");
    }

    #[test]
    fn test_serde_name_matches_as_str() {
        for action in RecoveryAction::ALL {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }
}
