//! Table of running workflows and the per-workflow control handle.
//!
//! Pause and cancel requests arrive through the table; the scheduler only
//! observes them at checkpoints between tasks (sequential) or levels
//! (parallel). Cancellation additionally interrupts in-flight actions.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vigil_core::{CoreError, CoreResult, WorkflowId};
use vigil_plan::{ExecutionMode, Workflow, WorkflowStatus};

/// Status entry for a workflow that has not finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWorkflow {
    /// Workflow id
    pub id: WorkflowId,
    /// Display name
    pub name: String,
    /// Current aggregate status
    pub status: WorkflowStatus,
    /// Execution mode
    pub mode: ExecutionMode,
    /// Number of tasks
    pub task_count: usize,
    /// Submission time
    pub started_at: DateTime<Utc>,
}

struct Slot {
    info: ActiveWorkflow,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

/// Registry of in-flight workflows
#[derive(Default)]
pub struct WorkflowTable {
    slots: Mutex<IndexMap<WorkflowId, Slot>>,
}

impl std::fmt::Debug for WorkflowTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowTable")
            .field("active", &self.lock().len())
            .finish()
    }
}

impl WorkflowTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<WorkflowId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a workflow and hand back its control handle
    ///
    /// # Errors
    ///
    /// Returns error if a workflow with the same id is already running
    pub fn register(
        self: &Arc<Self>,
        workflow: &Workflow,
        now: DateTime<Utc>,
    ) -> CoreResult<WorkflowControl> {
        let mut slots = self.lock();
        if slots.contains_key(&workflow.id) {
            return Err(CoreError::AlreadyExists {
                kind: "Workflow".to_string(),
                id: workflow.id.to_string(),
            });
        }
        let cancel = CancellationToken::new();
        let (pause, paused) = watch::channel(false);
        slots.insert(
            workflow.id,
            Slot {
                info: ActiveWorkflow {
                    id: workflow.id,
                    name: workflow.name.clone(),
                    status: WorkflowStatus::Pending,
                    mode: workflow.mode,
                    task_count: workflow.tasks.len(),
                    started_at: now,
                },
                cancel: cancel.clone(),
                pause,
            },
        );
        Ok(WorkflowControl {
            id: workflow.id,
            cancel,
            paused,
            table: Some(Arc::clone(self)),
            _detached_pause: None,
        })
    }

    fn with_slot<R>(&self, id: WorkflowId, f: impl FnOnce(&mut Slot) -> R) -> CoreResult<R> {
        self.lock()
            .get_mut(&id)
            .map(f)
            .ok_or_else(|| CoreError::not_found("Workflow", id.to_string()))
    }

    /// Request a pause at the next checkpoint
    ///
    /// # Errors
    ///
    /// Returns error if the workflow is not running
    pub fn pause(&self, id: WorkflowId) -> CoreResult<()> {
        self.with_slot(id, |slot| {
            slot.pause.send_replace(true);
        })
    }

    /// Lift a pause
    ///
    /// # Errors
    ///
    /// Returns error if the workflow is not running
    pub fn resume(&self, id: WorkflowId) -> CoreResult<()> {
        self.with_slot(id, |slot| {
            slot.pause.send_replace(false);
        })
    }

    /// Cancel a workflow, interrupting in-flight tasks
    ///
    /// # Errors
    ///
    /// Returns error if the workflow is not running
    pub fn cancel(&self, id: WorkflowId) -> CoreResult<()> {
        self.with_slot(id, |slot| slot.cancel.cancel())
    }

    fn set_status(&self, id: WorkflowId, status: WorkflowStatus) {
        if let Some(slot) = self.lock().get_mut(&id) {
            slot.info.status = status;
        }
    }

    fn remove(&self, id: WorkflowId) {
        self.lock().shift_remove(&id);
    }

    /// Running workflows in submission order
    #[must_use]
    pub fn active(&self) -> Vec<ActiveWorkflow> {
        self.lock().values().map(|s| s.info.clone()).collect()
    }

    /// Number of running workflows
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is running
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle the scheduler uses to observe pause/cancel requests.
///
/// Dropping it removes the workflow from its table.
#[derive(Debug)]
pub struct WorkflowControl {
    id: WorkflowId,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    table: Option<Arc<WorkflowTable>>,
    /// Sender for detached controls, which have no table slot to own it
    _detached_pause: Option<watch::Sender<bool>>,
}

impl WorkflowControl {
    /// A control not attached to any table; it can still be cancelled
    /// through [`cancel_token`](Self::cancel_token)
    #[must_use]
    pub fn detached(id: WorkflowId) -> Self {
        let (pause, paused) = watch::channel(false);
        Self {
            id,
            cancel: CancellationToken::new(),
            paused,
            table: None,
            _detached_pause: Some(pause),
        }
    }

    /// Workflow id
    #[must_use]
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    /// Token cancelled when the workflow is cancelled
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether a pause is currently requested
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Publish a status change
    pub fn set_status(&self, status: WorkflowStatus) {
        if let Some(table) = &self.table {
            table.set_status(self.id, status);
        }
    }

    /// Block while paused. Returns `false` if the workflow was cancelled.
    pub async fn wait_while_paused(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*self.paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        // sender gone with the table entry; nothing can resume us
                        return !self.cancel.is_cancelled();
                    }
                }
            }
        }
    }
}

impl Drop for WorkflowControl {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            table.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vigil_plan::Task;

    fn workflow() -> Workflow {
        Workflow::new("w").with_task(Task::new("a", "noop"))
    }

    #[test]
    fn test_register_and_drop() {
        let table = Arc::new(WorkflowTable::new());
        let wf = workflow();
        let control = table.register(&wf, Utc::now()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.register(&wf, Utc::now()).is_err());

        control.set_status(WorkflowStatus::Running);
        assert_eq!(table.active()[0].status, WorkflowStatus::Running);

        drop(control);
        assert!(table.is_empty());
    }

    #[test]
    fn test_unknown_workflow() {
        let table = WorkflowTable::new();
        assert!(matches!(
            table.cancel(WorkflowId::new()),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_pause_then_resume() {
        let table = Arc::new(WorkflowTable::new());
        let wf = workflow();
        let mut control = table.register(&wf, Utc::now()).unwrap();

        table.pause(wf.id).unwrap();
        assert!(control.is_paused());

        let id = wf.id;
        let resumer = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                table.resume(id).unwrap();
            })
        };
        assert!(control.wait_while_paused().await);
        resumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let table = Arc::new(WorkflowTable::new());
        let wf = workflow();
        let mut control = table.register(&wf, Utc::now()).unwrap();
        table.pause(wf.id).unwrap();
        table.cancel(wf.id).unwrap();
        assert!(!control.wait_while_paused().await);
        assert!(control.is_cancelled());
    }

    #[tokio::test]
    async fn test_detached_never_pauses() {
        let mut control = WorkflowControl::detached(WorkflowId::new());
        assert!(control.wait_while_paused().await);
        control.cancel_token().cancel();
        assert!(!control.wait_while_paused().await);
    }
}
