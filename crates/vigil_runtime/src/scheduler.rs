//! Dependency scheduler.
//!
//! Walks a validated workflow either sequentially in declared order or
//! level by level with every task of a level in flight at once. Level N+1
//! never starts before level N has settled. On failure with
//! `rollback_on_failure`, completed tasks carrying rollback data are
//! compensated in reverse declared order.

use crate::control::WorkflowControl;
use crate::executor::{TaskContext, TaskExecutor};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_core::{CoreResult, SharedClock, SystemClock, TaskId, WorkflowId};
use vigil_plan::{
    DependencyGraph, ExecutionMode, Task, TaskError, TaskStatus, Workflow, WorkflowStatus,
    WorkflowValidator,
};

/// A compensating task that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackFailure {
    /// Task whose compensation failed
    pub task_id: TaskId,
    /// Why
    pub error: TaskError,
}

/// Outcome of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow id
    pub workflow_id: WorkflowId,
    /// Workflow name
    pub name: String,
    /// Final aggregate status
    pub status: WorkflowStatus,
    /// Tasks that ended `Completed`
    pub completed: Vec<TaskId>,
    /// Tasks that ended `Failed`
    pub failed: Vec<TaskId>,
    /// Tasks that never started
    pub skipped: Vec<TaskId>,
    /// Tasks compensated after a failure, in compensation order
    pub rolled_back: Vec<TaskId>,
    /// Compensations that failed
    pub rollback_failures: Vec<RollbackFailure>,
    /// First failure message, if any
    pub error: Option<String>,
    /// Final task states in declared order
    pub tasks: Vec<Task>,
    /// Start of the run
    pub started_at: DateTime<Utc>,
    /// End of the run
    pub finished_at: DateTime<Utc>,
}

impl WorkflowResult {
    /// Whether every task completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// Mutable bookkeeping for one run
struct Run {
    first_error: Option<String>,
    failed: bool,
    cancelled: bool,
}

impl Run {
    fn new() -> Self {
        Self {
            first_error: None,
            failed: false,
            cancelled: false,
        }
    }

    fn fail(&mut self, task: &Task) {
        self.failed = true;
        if self.first_error.is_none() {
            let message = task
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_string(), |e| e.message.clone());
            self.first_error = Some(format!("task {} failed: {}", task.id, message));
        }
    }
}

/// Runs workflows over a [`TaskExecutor`]
#[derive(Debug, Clone)]
pub struct DependencyScheduler {
    executor: Arc<TaskExecutor>,
    validator: WorkflowValidator,
    clock: SharedClock,
}

impl DependencyScheduler {
    /// Create a scheduler
    #[must_use]
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            validator: WorkflowValidator::new(),
            clock: SystemClock::shared(),
        }
    }

    /// Use a custom validator
    #[must_use]
    pub fn with_validator(mut self, validator: WorkflowValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Use a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Validator applied before every run
    #[must_use]
    pub fn validator(&self) -> &WorkflowValidator {
        &self.validator
    }

    /// Validate without running; nothing is executed on error
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` or `CyclicDependency`
    pub fn validate(&self, workflow: &Workflow) -> CoreResult<DependencyGraph> {
        self.validator.validate(workflow)
    }

    /// Run a workflow to completion.
    ///
    /// Only graph-integrity problems are returned as errors, before any task
    /// runs. Task failures are reported in the [`WorkflowResult`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` or `CyclicDependency`
    pub async fn run(
        &self,
        mut workflow: Workflow,
        control: &mut WorkflowControl,
    ) -> CoreResult<WorkflowResult> {
        let graph = self.validate(&workflow)?;
        let started_at = self.clock.now();
        workflow.status = WorkflowStatus::Running;
        control.set_status(WorkflowStatus::Running);
        tracing::info!(
            workflow = %workflow.id,
            name = %workflow.name,
            mode = ?workflow.mode,
            tasks = workflow.tasks.len(),
            "workflow started"
        );

        let ctx = TaskContext::for_workflow(workflow.id, control.cancel_token().clone());
        let mut run = Run::new();
        match workflow.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&mut workflow, &graph, &ctx, control, &mut run)
                    .await;
            }
            ExecutionMode::ParallelByLevel => {
                self.run_levels(&mut workflow, &graph, &ctx, control, &mut run)
                    .await;
            }
        }

        let mut rolled_back = Vec::new();
        let mut rollback_failures = Vec::new();
        if run.failed && !run.cancelled && workflow.rollback_on_failure {
            (rolled_back, rollback_failures) = self.rollback(&mut workflow).await;
        }

        workflow.status = if run.cancelled {
            WorkflowStatus::Cancelled
        } else if workflow
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
        {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        control.set_status(workflow.status);

        let error = match workflow.status {
            WorkflowStatus::Cancelled => Some("workflow cancelled".to_string()),
            WorkflowStatus::Failed => run
                .first_error
                .or_else(|| Some("tasks skipped with unmet dependencies".to_string())),
            _ => None,
        };

        let result = WorkflowResult {
            workflow_id: workflow.id,
            name: workflow.name.clone(),
            status: workflow.status,
            completed: workflow.ids_with_status(TaskStatus::Completed),
            failed: workflow.ids_with_status(TaskStatus::Failed),
            skipped: workflow
                .tasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Paused))
                .map(|t| t.id.clone())
                .collect(),
            rolled_back,
            rollback_failures,
            error,
            tasks: workflow.tasks,
            started_at,
            finished_at: self.clock.now(),
        };

        match result.status {
            WorkflowStatus::Completed => {
                tracing::info!(workflow = %result.workflow_id, "workflow completed");
            }
            status => tracing::warn!(
                workflow = %result.workflow_id,
                ?status,
                failed = result.failed.len(),
                skipped = result.skipped.len(),
                rolled_back = result.rolled_back.len(),
                error = result.error.as_deref().unwrap_or(""),
                "workflow did not complete"
            ),
        }
        Ok(result)
    }

    async fn run_sequential(
        &self,
        workflow: &mut Workflow,
        graph: &DependencyGraph,
        ctx: &TaskContext,
        control: &mut WorkflowControl,
        run: &mut Run,
    ) {
        for pos in 0..workflow.tasks.len() {
            if !self.checkpoint(workflow, control).await {
                run.cancelled = true;
                return;
            }

            let unmet: Vec<&TaskId> = graph
                .dependencies(pos)
                .iter()
                .filter(|d| workflow.tasks[**d].status != TaskStatus::Completed)
                .map(|d| &workflow.tasks[*d].id)
                .collect();
            if !unmet.is_empty() {
                tracing::warn!(
                    task = %workflow.tasks[pos].id,
                    unmet = ?unmet,
                    "skipping task with unmet dependencies"
                );
                continue;
            }

            let task = &mut workflow.tasks[pos];
            if self.executor.run_task(task, ctx).await.is_err() {
                if control.is_cancelled() {
                    run.cancelled = true;
                    return;
                }
                run.fail(task);
                if workflow.rollback_on_failure {
                    return;
                }
            }
        }
    }

    async fn run_levels(
        &self,
        workflow: &mut Workflow,
        graph: &DependencyGraph,
        ctx: &TaskContext,
        control: &mut WorkflowControl,
        run: &mut Run,
    ) {
        for (depth, level) in graph.levels().into_iter().enumerate() {
            if !self.checkpoint(workflow, control).await {
                run.cancelled = true;
                return;
            }
            tracing::debug!(workflow = %workflow.id, depth, tasks = level.len(), "starting level");

            let in_level: Vec<&mut Task> = workflow
                .tasks
                .iter_mut()
                .enumerate()
                .filter(|(pos, _)| level.contains(pos))
                .map(|(_, task)| task)
                .collect();
            let settled = join_all(in_level.into_iter().map(|task| async move {
                let ok = self.executor.run_task(task, ctx).await.is_ok();
                (ok, task)
            }))
            .await;

            let mut level_failed = false;
            for (ok, task) in settled {
                if !ok {
                    level_failed = true;
                    if !control.is_cancelled() {
                        run.fail(task);
                    }
                }
            }
            if control.is_cancelled() {
                run.cancelled = true;
                return;
            }
            if level_failed {
                return;
            }
        }
    }

    /// Honour pause requests. Returns `false` once cancelled.
    async fn checkpoint(&self, workflow: &mut Workflow, control: &mut WorkflowControl) -> bool {
        if control.is_cancelled() {
            return false;
        }
        if !control.is_paused() {
            return true;
        }

        tracing::info!(workflow = %workflow.id, "workflow paused");
        set_pending(workflow, TaskStatus::Pending, TaskStatus::Paused);
        workflow.status = WorkflowStatus::Paused;
        control.set_status(WorkflowStatus::Paused);

        let resumed = control.wait_while_paused().await;

        set_pending(workflow, TaskStatus::Paused, TaskStatus::Pending);
        if resumed {
            tracing::info!(workflow = %workflow.id, "workflow resumed");
            workflow.status = WorkflowStatus::Running;
            control.set_status(WorkflowStatus::Running);
        }
        resumed
    }

    /// Compensate completed tasks with rollback data, newest first.
    /// Failures are logged and collected, never propagated.
    async fn rollback(&self, workflow: &mut Workflow) -> (Vec<TaskId>, Vec<RollbackFailure>) {
        let mut rolled_back = Vec::new();
        let mut failures = Vec::new();
        // compensation must run to the end even if the workflow is cancelled meanwhile
        let ctx = TaskContext::for_workflow(workflow.id, Default::default());

        for task in workflow.tasks.iter_mut().rev() {
            if task.status != TaskStatus::Completed {
                continue;
            }
            let Some(mut compensation) = task.compensation() else {
                continue;
            };
            tracing::info!(task = %task.id, action = %compensation.action_type, "rolling back task");
            match self.executor.run_task(&mut compensation, &ctx).await {
                Ok(()) => {
                    task.status = TaskStatus::RolledBack;
                    rolled_back.push(task.id.clone());
                    self.executor
                        .monitor()
                        .record(|m| m.rollbacks_completed += 1);
                }
                Err(err) => {
                    tracing::error!(task = %task.id, error = %err, "rollback failed");
                    self.executor.monitor().record(|m| m.rollbacks_failed += 1);
                    failures.push(RollbackFailure {
                        task_id: task.id.clone(),
                        error: TaskError::from(&err),
                    });
                }
            }
        }
        (rolled_back, failures)
    }
}

fn set_pending(workflow: &mut Workflow, from: TaskStatus, to: TaskStatus) {
    for task in workflow.tasks.iter_mut().filter(|t| t.status == from) {
        task.status = to;
    }
}
