//! Task executor.
//!
//! Runs one task through its registered action: reserves resources
//! all-or-nothing, enforces the per-attempt timeout, retries retryable
//! failures, and releases resources on every exit path via the lease.

use crate::metrics::{ActiveTask, ExecutionMonitor};
use crate::pool::ResourcePoolManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use vigil_action::SharedActionRegistry;
use vigil_core::{CoreError, CoreResult, SharedClock, SystemClock, WorkflowId};
use vigil_plan::{Task, TaskError, TaskStatus};

/// Where a task runs
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Owning workflow
    pub workflow_id: Option<WorkflowId>,
    /// Cancelled when the owner gives up
    pub cancel: CancellationToken,
}

impl TaskContext {
    /// Context for a task belonging to `workflow_id`
    #[must_use]
    pub fn for_workflow(workflow_id: WorkflowId, cancel: CancellationToken) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            cancel,
        }
    }
}

/// Executes individual tasks
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    registry: Arc<SharedActionRegistry>,
    pools: Arc<ResourcePoolManager>,
    monitor: Arc<ExecutionMonitor>,
    clock: SharedClock,
}

impl TaskExecutor {
    /// Create an executor over shared registry, pools and monitor
    #[must_use]
    pub fn new(
        registry: Arc<SharedActionRegistry>,
        pools: Arc<ResourcePoolManager>,
        monitor: Arc<ExecutionMonitor>,
    ) -> Self {
        Self {
            registry,
            pools,
            monitor,
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for task timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Shared pools
    #[must_use]
    pub fn pools(&self) -> &Arc<ResourcePoolManager> {
        &self.pools
    }

    /// Shared monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    /// Run `task` to a terminal state.
    ///
    /// The task's status, attempts, timestamps, result and error are
    /// updated in place. Resource exhaustion fails immediately and is
    /// never retried.
    ///
    /// # Errors
    ///
    /// Returns the error that left the task `Failed`
    pub async fn run_task(&self, task: &mut Task, ctx: &TaskContext) -> CoreResult<()> {
        let started = Instant::now();
        task.status = TaskStatus::Running;
        task.started_at = Some(self.clock.now());
        task.finished_at = None;
        task.error = None;

        let outcome = self.execute(task, ctx).await;
        let elapsed = started.elapsed();
        task.finished_at = Some(self.clock.now());
        self.monitor.record_task(outcome.is_ok(), elapsed);

        match &outcome {
            Ok(()) => {
                task.status = TaskStatus::Completed;
                tracing::info!(
                    task = %task.id,
                    action = %task.action_type,
                    attempts = task.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "task completed"
                );
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskError::from(err));
                match err {
                    CoreError::Timeout { .. } => self.monitor.record(|m| m.tasks_timed_out += 1),
                    CoreError::ResourceExhausted { .. } => {
                        self.monitor.record(|m| m.tasks_rejected += 1);
                    }
                    _ => {}
                }
                tracing::warn!(
                    task = %task.id,
                    action = %task.action_type,
                    attempts = task.attempts,
                    error = %err,
                    "task failed"
                );
            }
        }
        outcome
    }

    async fn execute(&self, task: &mut Task, ctx: &TaskContext) -> CoreResult<()> {
        let action = self.registry.get(&task.action_type)?;
        let _lease = self.pools.allocate(&task.resources)?;
        let _active = self.monitor.track(ActiveTask {
            workflow_id: ctx.workflow_id,
            task_id: task.id.clone(),
            action_type: task.action_type.clone(),
            started_at: task.started_at.unwrap_or_else(|| self.clock.now()),
        });

        let max_attempts = task.retry.max_attempts();
        let timeout = task.timeout();
        loop {
            task.attempts += 1;
            tracing::debug!(task = %task.id, attempt = task.attempts, "dispatching action");

            let attempt = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => Err(CoreError::Cancelled),
                res = tokio::time::timeout(timeout, action.execute(&task.parameters)) => match res {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(err)) => Err(CoreError::from(err)),
                    Err(_) => Err(CoreError::Timeout {
                        operation: format!("task {}", task.id),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                },
            };

            match attempt {
                Ok(output) => {
                    task.result = Some(output.data);
                    return Ok(());
                }
                Err(err) if err.is_retryable() && task.attempts < max_attempts => {
                    self.monitor.record(|m| m.task_retries += 1);
                    tracing::warn!(
                        task = %task.id,
                        attempt = task.attempts,
                        max_attempts,
                        error = %err,
                        "retrying task"
                    );
                    let backoff = Duration::from_millis(task.retry.backoff_ms);
                    if !backoff.is_zero() {
                        tokio::select! {
                            () = ctx.cancel.cancelled() => return Err(CoreError::Cancelled),
                            () = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_action::{ActionError, ActionOutput, FnAction, NoopAction};
    use vigil_plan::{ResourceRequirements, RetryPolicy};

    fn executor_with(pools: ResourcePoolManager) -> TaskExecutor {
        let registry = Arc::new(SharedActionRegistry::new());
        registry.register(Arc::new(NoopAction::new())).unwrap();
        registry
            .register(Arc::new(FnAction::new("fail", |_| async {
                Err(ActionError::Failed("boom".into()))
            })))
            .unwrap();
        registry
            .register(Arc::new(FnAction::new("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ActionOutput::empty())
            })))
            .unwrap();
        TaskExecutor::new(registry, Arc::new(pools), Arc::new(ExecutionMonitor::new()))
    }

    #[tokio::test]
    async fn test_run_task_success() {
        let exec = executor_with(ResourcePoolManager::with_defaults());
        let mut task = Task::new("a", "noop")
            .with_parameters(json!({"k": "v"}))
            .with_resources(ResourceRequirements::new().with("cpu", 50));
        exec.run_task(&mut task, &TaskContext::default()).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"k": "v"})));
        assert_eq!(task.attempts, 1);
        assert!(task.finished_at.is_some());
        assert_eq!(exec.pools().available("cpu"), Some(100));
        assert!(exec.monitor().active_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_fails_typed() {
        let exec = executor_with(ResourcePoolManager::with_defaults());
        let mut task = Task::new("a", "missing");
        let err = exec.run_task(&mut task, &TaskContext::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 0);
    }

    #[tokio::test]
    async fn test_resource_exhaustion_never_starts() {
        let exec = executor_with(ResourcePoolManager::new().with_pool("cpu", 10));
        let mut task = Task::new("a", "noop")
            .with_resources(ResourceRequirements::new().with("cpu", 11))
            .with_retry(RetryPolicy::retries(3));
        let err = exec.run_task(&mut task, &TaskContext::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::ResourceExhausted { .. }));
        assert_eq!(task.attempts, 0);
        assert_eq!(exec.monitor().metrics().tasks_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_resources() {
        let exec = executor_with(ResourcePoolManager::new().with_pool("cpu", 10));
        let mut task = Task::new("a", "slow")
            .with_timeout(Duration::from_millis(100))
            .with_resources(ResourceRequirements::new().with("cpu", 10));
        let err = exec.run_task(&mut task, &TaskContext::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout { timeout_ms: 100, .. }));
        assert_eq!(task.error.as_ref().unwrap().kind, vigil_core::ErrorKind::Timeout);
        assert_eq!(exec.pools().available("cpu"), Some(10));
        assert_eq!(exec.monitor().metrics().tasks_timed_out, 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let exec = executor_with(ResourcePoolManager::with_defaults());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        exec.registry
            .register(Arc::new(FnAction::new("flaky", move |_: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ActionError::Unavailable("try later".into()))
                    } else {
                        Ok(ActionOutput::empty())
                    }
                }
            })))
            .unwrap();

        let mut task = Task::new("a", "flaky").with_retry(RetryPolicy::retries(2));
        exec.run_task(&mut task, &TaskContext::default()).await.unwrap();
        assert_eq!(task.attempts, 3);
        assert_eq!(exec.monitor().metrics().task_retries, 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let exec = executor_with(ResourcePoolManager::with_defaults());
        let mut task = Task::new("a", "fail").with_retry(RetryPolicy::retries(1));
        let err = exec.run_task(&mut task, &TaskContext::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::Execution { .. }));
        assert_eq!(task.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_action() {
        let exec = executor_with(ResourcePoolManager::new().with_pool("cpu", 10));
        let ctx = TaskContext::default();
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let mut task = Task::new("a", "slow")
            .with_resources(ResourceRequirements::new().with("cpu", 5));
        let err = exec.run_task(&mut task, &ctx).await.unwrap_err();
        assert_eq!(err, CoreError::Cancelled);
        assert_eq!(exec.pools().available("cpu"), Some(10));
    }

    #[tokio::test]
    async fn test_concurrent_burst_admits_what_fits() {
        let exec = executor_with(ResourcePoolManager::new().with_pool("cpu", 100));
        exec.registry
            .register(Arc::new(FnAction::new("hold", |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(ActionOutput::empty())
            })))
            .unwrap();

        let mut tasks: Vec<Task> = (0..5)
            .map(|i| {
                Task::new(format!("t{i}"), "hold")
                    .with_resources(ResourceRequirements::new().with("cpu", 40))
            })
            .collect();
        let ctx = TaskContext::default();
        let results =
            futures::future::join_all(tasks.iter_mut().map(|t| exec.run_task(t, &ctx))).await;

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(CoreError::ResourceExhausted { .. })))
            .count();
        assert_eq!(admitted, 2);
        assert_eq!(rejected, 3);
        assert_eq!(exec.pools().available("cpu"), Some(100));
    }
}
