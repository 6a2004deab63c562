//! Vigil Decision Engine
//!
//! Multi-criteria decision analysis over caller-supplied options. A
//! decision names the chosen option, why it was chosen, how confident the
//! engine is, the workflow that carries it out and the plan that undoes it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod criteria;
pub mod engine;
pub mod option;
pub mod plan;
pub mod provider;

pub use context::{
    ContextAnalysis, DecisionContext, HistoricalOutcome, MarketConditions, OutcomeKind,
    PerformanceTrend, RiskAssessment, StakeholderPreference, NEUTRAL,
};
pub use criteria::{CriteriaWeights, Criterion};
pub use engine::{Decision, DecisionConfig, DecisionEngine, DecisionStatus, Evaluation, CANDIDATE_RATIO};
pub use option::DecisionOption;
pub use plan::{
    implementation_workflow, RollbackPlan, RollbackStep, RollbackStepPlan, EXECUTE_ACTION,
    MONITOR_ACTION, PREPARE_ACTION,
};
pub use provider::{ContextProvider, StaticContextProvider};
