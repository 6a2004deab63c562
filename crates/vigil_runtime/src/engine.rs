//! Execution engine.
//!
//! Facade over the action registry, resource pools, task executor and
//! dependency scheduler. Owns the table of active workflows, the bounded
//! history of finished ones and the execution counters.

use crate::control::{ActiveWorkflow, WorkflowTable};
use crate::executor::{TaskContext, TaskExecutor};
use crate::metrics::{ActiveTask, ExecutionMetrics, ExecutionMonitor};
use crate::pool::{PoolSnapshot, ResourcePoolManager, DEFAULT_POOLS};
use crate::scheduler::{DependencyScheduler, WorkflowResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_action::SharedActionRegistry;
use vigil_core::{
    BoundedHistory, CoreResult, MetricSample, MetricsSink, NullSink, SharedClock, SystemClock,
    WorkflowId,
};
use vigil_plan::{Task, Workflow, WorkflowStatus, WorkflowValidator};

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pool name to capacity
    pub pools: IndexMap<String, u64>,
    /// Reject resource requests naming unknown pools
    pub strict_pools: bool,
    /// Finished workflows kept for inspection
    pub history_capacity: usize,
    /// Largest accepted workflow, 0 for unlimited
    pub max_tasks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pools: DEFAULT_POOLS
                .iter()
                .map(|(name, cap)| ((*name).to_string(), *cap))
                .collect(),
            strict_pools: false,
            history_capacity: 100,
            max_tasks: 0,
        }
    }
}

/// Runs workflows and single tasks against shared resources
pub struct ExecutionEngine {
    registry: Arc<SharedActionRegistry>,
    pools: Arc<ResourcePoolManager>,
    monitor: Arc<ExecutionMonitor>,
    executor: Arc<TaskExecutor>,
    scheduler: DependencyScheduler,
    workflows: Arc<WorkflowTable>,
    history: BoundedHistory<WorkflowResult>,
    sink: Arc<dyn MetricsSink>,
    clock: SharedClock,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("pools", &self.pools)
            .field("workflows", &self.workflows)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Create an engine with its own registry
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, Arc::new(SharedActionRegistry::new()))
    }

    /// Create an engine dispatching through `registry`
    #[must_use]
    pub fn with_registry(config: EngineConfig, registry: Arc<SharedActionRegistry>) -> Self {
        let pools = config
            .pools
            .iter()
            .fold(ResourcePoolManager::new(), |m, (name, cap)| {
                m.with_pool(name.clone(), *cap)
            })
            .with_strict(config.strict_pools);
        Self::assemble(
            registry,
            Arc::new(pools),
            &config,
            SystemClock::shared(),
            Arc::new(NullSink),
        )
    }

    fn assemble(
        registry: Arc<SharedActionRegistry>,
        pools: Arc<ResourcePoolManager>,
        config: &EngineConfig,
        clock: SharedClock,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let monitor = Arc::new(ExecutionMonitor::new());
        let executor = Arc::new(
            TaskExecutor::new(Arc::clone(&registry), Arc::clone(&pools), Arc::clone(&monitor))
                .with_clock(Arc::clone(&clock)),
        );
        let scheduler = DependencyScheduler::new(Arc::clone(&executor))
            .with_validator(WorkflowValidator::new().with_max_tasks(config.max_tasks))
            .with_clock(Arc::clone(&clock));
        Self {
            registry,
            pools,
            monitor,
            executor,
            scheduler,
            workflows: Arc::new(WorkflowTable::new()),
            history: BoundedHistory::new(config.history_capacity.max(1)),
            sink,
            clock,
        }
    }

    /// Use a different clock for timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        let executor = Arc::new(
            TaskExecutor::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.pools),
                Arc::clone(&self.monitor),
            )
            .with_clock(Arc::clone(&clock)),
        );
        let validator = self.scheduler.validator().clone();
        self.scheduler = DependencyScheduler::new(Arc::clone(&executor))
            .with_validator(validator)
            .with_clock(Arc::clone(&clock));
        self.executor = executor;
        self.clock = clock;
        self
    }

    /// Emit workflow samples to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Action registry used for dispatch
    #[must_use]
    pub fn registry(&self) -> &Arc<SharedActionRegistry> {
        &self.registry
    }

    /// Shared pools
    #[must_use]
    pub fn pools(&self) -> &Arc<ResourcePoolManager> {
        &self.pools
    }

    /// Run a workflow to completion.
    ///
    /// The workflow is visible in [`active_workflows`](Self::active_workflows)
    /// while it runs and lands in the history afterwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` or `CyclicDependency` for a malformed graph,
    /// or `AlreadyExists` if a workflow with the same id is running
    pub async fn submit_workflow(&self, workflow: Workflow) -> CoreResult<WorkflowResult> {
        let mut control = self.workflows.register(&workflow, self.clock.now())?;
        let result = self.scheduler.run(workflow, &mut control).await;
        drop(control);

        let result = result?;
        self.monitor.record(|m| match result.status {
            WorkflowStatus::Completed => m.workflows_completed += 1,
            WorkflowStatus::Cancelled => m.workflows_cancelled += 1,
            _ => m.workflows_failed += 1,
        });
        self.emit_samples(&result);
        self.history.push(result.clone());
        Ok(result)
    }

    fn emit_samples(&self, result: &WorkflowResult) {
        let now = self.clock.now();
        let duration_ms = (result.finished_at - result.started_at)
            .num_milliseconds()
            .max(0) as f64;
        let status = format!("{:?}", result.status).to_lowercase();
        self.sink.emit(
            &MetricSample::new("workflow_duration_ms", duration_ms, now)
                .with_tag("workflow", result.name.clone())
                .with_tag("status", status),
        );
        self.sink.emit(&MetricSample::new(
            "workflow_success_rate",
            self.metrics().workflow_success_rate().unwrap_or(1.0),
            now,
        ));
        for pool in self.pools.snapshot() {
            self.sink.emit(
                &MetricSample::new("resource_utilization", pool.utilization(), now)
                    .with_tag("pool", pool.name),
            );
        }
    }

    /// Run a single task outside any workflow
    ///
    /// # Errors
    ///
    /// Returns the error that left the task `Failed`
    pub async fn run_task(&self, task: &mut Task) -> CoreResult<()> {
        self.executor.run_task(task, &TaskContext::default()).await
    }

    /// Pause a running workflow at its next checkpoint
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is not running
    pub fn pause(&self, id: WorkflowId) -> CoreResult<()> {
        self.workflows.pause(id)
    }

    /// Resume a paused workflow
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is not running
    pub fn resume(&self, id: WorkflowId) -> CoreResult<()> {
        self.workflows.resume(id)
    }

    /// Cancel a running workflow
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is not running
    pub fn cancel(&self, id: WorkflowId) -> CoreResult<()> {
        self.workflows.cancel(id)
    }

    /// Workflows currently running
    #[must_use]
    pub fn active_workflows(&self) -> Vec<ActiveWorkflow> {
        self.workflows.active()
    }

    /// Tasks currently executing
    #[must_use]
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.monitor.active_tasks()
    }

    /// Up to `n` most recent finished workflows, oldest first
    #[must_use]
    pub fn recent_workflows(&self, n: usize) -> Vec<WorkflowResult> {
        self.history.recent(n)
    }

    /// Snapshot of the execution counters
    #[must_use]
    pub fn metrics(&self) -> ExecutionMetrics {
        self.monitor.metrics()
    }

    /// Snapshot of every pool
    #[must_use]
    pub fn pool_snapshot(&self) -> Vec<PoolSnapshot> {
        self.pools.snapshot()
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
