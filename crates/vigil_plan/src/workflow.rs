//! Workflows: tasks plus dependency edges and an execution mode.

use crate::dag::DependencyGraph;
use crate::task::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use vigil_core::{CoreResult, TaskId, WorkflowId};

/// How the scheduler walks the tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time in declared order
    #[default]
    Sequential,
    /// All tasks of a dependency level at once, level by level
    ParallelByLevel,
}

/// Aggregate state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Submitted, not started
    #[default]
    Pending,
    /// Tasks in flight
    Running,
    /// Every task completed
    Completed,
    /// At least one task failed (rollback may have run)
    Failed,
    /// Waiting for resume
    Paused,
    /// Stopped on request
    Cancelled,
}

impl WorkflowStatus {
    /// Whether the workflow has finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A set of tasks with dependency edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow id
    #[serde(default)]
    pub id: WorkflowId,
    /// Display name
    pub name: String,
    /// Tasks in declared order
    pub tasks: Vec<Task>,
    /// Execution mode
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Compensate completed tasks when one fails
    #[serde(default)]
    pub rollback_on_failure: bool,
    /// Aggregate state
    #[serde(default)]
    pub status: WorkflowStatus,
}

impl Workflow {
    /// Create an empty sequential workflow
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            tasks: Vec::new(),
            mode: ExecutionMode::Sequential,
            rollback_on_failure: false,
            status: WorkflowStatus::Pending,
        }
    }

    /// Append a task
    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Set the execution mode
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable rollback on failure
    #[must_use]
    pub fn with_rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    /// Look up a task
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Build and validate the dependency graph
    ///
    /// # Errors
    ///
    /// Returns error on duplicate ids, unknown dependencies or cycles
    pub fn graph(&self) -> CoreResult<DependencyGraph> {
        DependencyGraph::build(&self.tasks)
    }

    /// Ids of tasks currently in `status`, in declared order
    #[must_use]
    pub fn ids_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Reset every task to pending
    pub fn reset(&mut self) {
        self.status = WorkflowStatus::Pending;
        for task in &mut self.tasks {
            task.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_builder() {
        let wf = Workflow::new("deploy")
            .with_task(Task::new("a", "noop"))
            .with_task(Task::new("b", "noop").depends_on("a"))
            .with_mode(ExecutionMode::ParallelByLevel)
            .with_rollback_on_failure(true);
        assert_eq!(wf.tasks.len(), 2);
        assert!(wf.task(&TaskId::from("b")).is_some());
        assert_eq!(wf.ids_with_status(TaskStatus::Pending).len(), 2);
        assert_eq!(wf.mode, ExecutionMode::ParallelByLevel);
    }

    #[test]
    fn test_workflow_from_json() {
        let wf: Workflow = serde_json::from_str(
            r#"{"name":"w","mode":"parallel_by_level","rollback_on_failure":true,
                "tasks":[{"id":"a","action_type":"noop"}]}"#,
        )
        .unwrap();
        assert_eq!(wf.mode, ExecutionMode::ParallelByLevel);
        assert!(wf.rollback_on_failure);
        assert_eq!(wf.status, WorkflowStatus::Pending);
    }

    #[test]
    fn test_reset() {
        let mut wf = Workflow::new("w").with_task(Task::new("a", "noop"));
        wf.tasks[0].status = TaskStatus::Completed;
        wf.status = WorkflowStatus::Completed;
        wf.reset();
        assert_eq!(wf.tasks[0].status, TaskStatus::Pending);
        assert_eq!(wf.status, WorkflowStatus::Pending);
    }
}
