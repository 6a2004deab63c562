//! Workflow validation performed before anything runs.

use crate::dag::DependencyGraph;
use crate::workflow::Workflow;
use vigil_core::{CoreError, CoreResult};

/// Structural checks on submitted workflows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowValidator {
    /// Reject workflows without tasks
    pub require_tasks: bool,
    /// Maximum allowed tasks (0 = no limit)
    pub max_tasks: usize,
}

impl WorkflowValidator {
    /// Create a validator with default limits
    #[must_use]
    pub fn new() -> Self {
        Self {
            require_tasks: true,
            max_tasks: 0,
        }
    }

    /// Set the task limit
    #[must_use]
    pub fn with_max_tasks(mut self, max: usize) -> Self {
        self.max_tasks = max;
        self
    }

    /// Accept empty workflows
    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.require_tasks = false;
        self
    }

    /// Validate a workflow and return its dependency graph
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed workflows and
    /// `CyclicDependency` for cyclic ones
    pub fn validate(&self, workflow: &Workflow) -> CoreResult<DependencyGraph> {
        if self.require_tasks && workflow.tasks.is_empty() {
            return Err(CoreError::invalid("tasks", "workflow has no tasks"));
        }
        if self.max_tasks > 0 && workflow.tasks.len() > self.max_tasks {
            return Err(CoreError::invalid(
                "tasks",
                format!(
                    "workflow has {} tasks, limit is {}",
                    workflow.tasks.len(),
                    self.max_tasks
                ),
            ));
        }
        for task in &workflow.tasks {
            if task.id.as_str().is_empty() {
                return Err(CoreError::invalid("id", "task id is empty"));
            }
            if task.action_type.is_empty() {
                return Err(CoreError::invalid(
                    "action_type",
                    format!("task {} has no action type", task.id),
                ));
            }
            if task.timeout_ms == 0 {
                return Err(CoreError::invalid(
                    "timeout_ms",
                    format!("task {} has a zero timeout", task.id),
                ));
            }
        }
        workflow.graph()
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}
