//! Tasks: the unit of work the scheduler runs.

use crate::resource::ResourceRequirements;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use vigil_core::{ErrorKind, TaskId};

/// Default task timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started
    #[default]
    Pending,
    /// Action in flight
    Running,
    /// Action succeeded
    Completed,
    /// Action failed, timed out, was rejected or cancelled
    Failed,
    /// Completed and then compensated
    RolledBack,
    /// Held by a paused workflow
    Paused,
}

impl TaskStatus {
    /// Whether the task will not change state again without a rollback
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

/// Retry behaviour for retryable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Pause between attempts in milliseconds
    #[serde(default)]
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, no retries
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }

    /// Retry up to `max_retries` times
    #[must_use]
    pub const fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_ms: 0,
        }
    }

    /// Set the backoff
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Total attempts allowed
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// How to compensate a completed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackData {
    /// Action type of the compensating task; the task's own type when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    /// Parameters for the compensating action
    #[serde(default)]
    pub parameters: Value,
}

impl RollbackData {
    /// Compensate with the given action type and parameters
    #[must_use]
    pub fn new(action_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            action_type: Some(action_type.into()),
            parameters,
        }
    }

    /// Compensate by re-running the task's own action type with `parameters`
    #[must_use]
    pub fn same_action(parameters: Value) -> Self {
        Self {
            action_type: None,
            parameters,
        }
    }
}

/// Structured failure recorded on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl From<&vigil_core::CoreError> for TaskError {
    fn from(err: &vigil_core::CoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the workflow
    pub id: TaskId,
    /// Action type dispatched through the registry
    pub action_type: String,
    /// Action parameters
    #[serde(default)]
    pub parameters: Value,
    /// Tasks that must complete first
    #[serde(default)]
    pub dependencies: IndexSet<TaskId>,
    /// Deadline for one attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry behaviour
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Pool reservations held while running
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Compensation, if the task can be undone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackData>,
    /// Free-text description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Conditions that mean the task did what it should
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
    /// Conditions that should trigger a rollback
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback_triggers: Vec<String>,

    /// Current state
    #[serde(default)]
    pub status: TaskStatus,
    /// Attempts made so far
    #[serde(default)]
    pub attempts: u32,
    /// When the first attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Action output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure on error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Task {
    /// Create a pending task
    #[must_use]
    pub fn new(id: impl Into<TaskId>, action_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            parameters: Value::Null,
            dependencies: IndexSet::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::none(),
            resources: ResourceRequirements::new(),
            rollback: None,
            description: String::new(),
            success_criteria: Vec::new(),
            rollback_triggers: Vec::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// Set parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add a dependency
    #[must_use]
    pub fn depends_on(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Set the per-attempt timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set resource requirements
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Make the task compensable
    #[must_use]
    pub fn with_rollback(mut self, rollback: RollbackData) -> Self {
        self.rollback = Some(rollback);
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a success criterion
    #[must_use]
    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    /// Add a rollback trigger
    #[must_use]
    pub fn with_rollback_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.rollback_triggers.push(trigger.into());
        self
    }

    /// Per-attempt timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Wall time between start and finish
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(vigil_core::time::age(end, start)),
            _ => None,
        }
    }

    /// The compensating task for this one, if it carries rollback data
    #[must_use]
    pub fn compensation(&self) -> Option<Task> {
        let rollback = self.rollback.as_ref()?;
        let action_type = rollback
            .action_type
            .clone()
            .unwrap_or_else(|| self.action_type.clone());
        Some(
            Task::new(self.id.rollback_id(), action_type)
                .with_parameters(rollback.parameters.clone())
                .with_timeout(self.timeout())
                .with_retry(RetryPolicy::retries(1))
                .with_description(format!("rollback of {}", self.id)),
        )
    }

    /// Return to the pending state, clearing any previous outcome
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.attempts = 0;
        self.started_at = None;
        self.finished_at = None;
        self.result = None;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_builder() {
        let task = Task::new("b", "deploy")
            .depends_on("a")
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryPolicy::retries(2));
        assert_eq!(task.id.as_str(), "b");
        assert!(task.dependencies.contains(&TaskId::from("a")));
        assert_eq!(task.timeout(), Duration::from_secs(5));
        assert_eq!(task.retry.max_attempts(), 3);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_compensation_uses_rollback_type() {
        let task = Task::new("a", "deploy")
            .with_rollback(RollbackData::new("undeploy", json!({"version": 1})));
        let comp = task.compensation().unwrap();
        assert_eq!(comp.id.as_str(), "a_rollback");
        assert_eq!(comp.action_type, "undeploy");
        assert_eq!(comp.parameters, json!({"version": 1}));
        assert_eq!(comp.retry.max_retries, 1);
    }

    #[test]
    fn test_compensation_falls_back_to_own_type() {
        let task = Task::new("a", "deploy").with_rollback(RollbackData::same_action(json!({})));
        assert_eq!(task.compensation().unwrap().action_type, "deploy");
        assert!(Task::new("b", "deploy").compensation().is_none());
    }

    #[test]
    fn test_deserialize_minimal() {
        let task: Task = serde_json::from_value(json!({
            "id": "a",
            "action_type": "noop",
            "dependencies": ["x"],
            "resources": {"cpu": 10}
        }))
        .unwrap();
        assert_eq!(task.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(task.resources.get("cpu"), 10);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }
}
