//! Execution metrics and the active-task table.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use vigil_core::{TaskId, WorkflowId};

/// Execution counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Tasks that reached a terminal state
    pub tasks_executed: u64,
    /// Tasks that completed
    pub tasks_completed: u64,
    /// Tasks that failed for any reason
    pub tasks_failed: u64,
    /// Failures caused by a timeout
    pub tasks_timed_out: u64,
    /// Failures caused by resource exhaustion
    pub tasks_rejected: u64,
    /// Extra attempts made under a retry policy
    pub task_retries: u64,
    /// Sum of task wall time
    pub total_task_ms: u64,
    /// Workflows that completed
    pub workflows_completed: u64,
    /// Workflows that failed
    pub workflows_failed: u64,
    /// Workflows cancelled on request
    pub workflows_cancelled: u64,
    /// Compensating tasks that succeeded
    pub rollbacks_completed: u64,
    /// Compensating tasks that failed
    pub rollbacks_failed: u64,
}

impl ExecutionMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Task success rate (0.0 - 1.0), 1.0 before anything ran
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.tasks_executed == 0 {
            return 1.0;
        }
        self.tasks_completed as f64 / self.tasks_executed as f64
    }

    /// Task failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.tasks_executed == 0 {
            return 0.0;
        }
        self.tasks_failed as f64 / self.tasks_executed as f64
    }

    /// Workflow success rate, `None` before any workflow finished
    #[must_use]
    pub fn workflow_success_rate(&self) -> Option<f64> {
        let finished = self.workflows_completed + self.workflows_failed;
        (finished > 0).then(|| self.workflows_completed as f64 / finished as f64)
    }

    /// Mean task wall time in milliseconds
    #[must_use]
    pub fn average_task_ms(&self) -> f64 {
        if self.tasks_executed == 0 {
            return 0.0;
        }
        self.total_task_ms as f64 / self.tasks_executed as f64
    }
}

/// A task currently holding resources or awaiting its action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTask {
    /// Owning workflow, if any
    pub workflow_id: Option<WorkflowId>,
    /// Task id
    pub task_id: TaskId,
    /// Action type
    pub action_type: String,
    /// When it started
    pub started_at: DateTime<Utc>,
}

/// Shared metrics plus the table of in-flight tasks
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    metrics: Mutex<ExecutionMetrics>,
    active: Mutex<IndexMap<u64, ActiveTask>>,
    next_slot: AtomicU64,
}

impl ExecutionMonitor {
    /// Create a new monitor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn metrics_mut(&self) -> MutexGuard<'_, ExecutionMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the counters
    #[must_use]
    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics_mut().clone()
    }

    /// Apply an update to the counters
    pub fn record(&self, f: impl FnOnce(&mut ExecutionMetrics)) {
        f(&mut self.metrics_mut());
    }

    /// Count a finished task
    pub fn record_task(&self, completed: bool, elapsed: Duration) {
        self.record(|m| {
            m.tasks_executed += 1;
            if completed {
                m.tasks_completed += 1;
            } else {
                m.tasks_failed += 1;
            }
            m.total_task_ms += elapsed.as_millis() as u64;
        });
    }

    /// Track a task as in flight until the returned guard drops
    pub fn track(self: &Arc<Self>, task: ActiveTask) -> ActiveTaskGuard {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, task);
        ActiveTaskGuard {
            monitor: Arc::clone(self),
            slot,
        }
    }

    /// In-flight tasks, oldest first
    #[must_use]
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Reset the counters
    pub fn reset(&self) {
        *self.metrics_mut() = ExecutionMetrics::default();
    }
}

/// Removes a task from the active table when dropped
#[derive(Debug)]
pub struct ActiveTaskGuard {
    monitor: Arc<ExecutionMonitor>,
    slot: u64,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.monitor
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&self.slot);
    }
}
