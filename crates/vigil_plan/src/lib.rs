//! Vigil Planner
//!
//! Task and workflow model, resource requirements, and the validated
//! dependency graph the scheduler walks level by level.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod resource;
pub mod task;
pub mod validate;
pub mod workflow;

pub use dag::DependencyGraph;
pub use resource::ResourceRequirements;
pub use task::{RetryPolicy, RollbackData, Task, TaskError, TaskStatus, DEFAULT_TIMEOUT_MS};
pub use validate::WorkflowValidator;
pub use workflow::{ExecutionMode, Workflow, WorkflowStatus};
