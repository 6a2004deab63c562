//! Vigil Runtime
//!
//! Resource pools, the task executor and the dependency scheduler that
//! together run workflows with timeouts, retries, pause/cancel and
//! compensating rollback.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod engine;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod scheduler;

pub use control::{ActiveWorkflow, WorkflowControl, WorkflowTable};
pub use engine::{EngineConfig, ExecutionEngine};
pub use executor::{TaskContext, TaskExecutor};
pub use metrics::{ActiveTask, ActiveTaskGuard, ExecutionMetrics, ExecutionMonitor};
pub use pool::{PoolSnapshot, ResourceLease, ResourcePoolManager, DEFAULT_POOLS};
pub use scheduler::{DependencyScheduler, RollbackFailure, WorkflowResult};
