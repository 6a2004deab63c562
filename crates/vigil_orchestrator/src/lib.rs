//! Vigil Orchestrator
//!
//! Wires the execution engine, decision engine and monitoring stack into one
//! process and runs their background loops until told to stop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod orchestrator;
pub mod status;

pub use config::{ConfigError, LoopIntervals, OrchestratorConfig};
pub use orchestrator::{DecisionOutcome, MetricSource, Orchestrator};
pub use status::SystemStatus;
