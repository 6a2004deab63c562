//! Vigil Actions
//!
//! The single capability every task type dispatches through, and the
//! registry that maps task types to handlers. Unknown types are a typed
//! error, never a silent default.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod builtin;
pub mod registry;

pub use action::{Action, ActionError, ActionOutput};
pub use builtin::{FnAction, NoopAction};
pub use registry::{ActionEntry, ActionRegistry, RegistryError, SharedActionRegistry};
