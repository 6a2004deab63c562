//! Vigil Core Types
//!
//! Identifiers, the error taxonomy, clocks, bounded history and metric
//! samples shared by every other vigil crate. No I/O lives here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod history;
pub mod id;
pub mod metric;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult, ErrorKind};
pub use history::BoundedHistory;
pub use id::{AlertId, DecisionId, TaskId, WorkflowId};
pub use metric::{MetricSample, MetricsSink, NullSink};
pub use time::{Clock, ManualClock, SharedClock, SystemClock};
