//! Implementation and rollback templates for a chosen option.
//!
//! Every decision is carried out by the same three-phase workflow:
//! prepare and validate, execute, then monitor and optimize. The execute
//! phase carries the option's resources and a compensating restore step.

use crate::option::DecisionOption;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use vigil_core::DecisionId;
use vigil_plan::{ExecutionMode, ResourceRequirements, RollbackData, Task, Workflow};

/// Action type of the preparation phase
pub const PREPARE_ACTION: &str = "decision.prepare";
/// Action type of the execution phase
pub const EXECUTE_ACTION: &str = "decision.execute";
/// Action type of the monitoring phase
pub const MONITOR_ACTION: &str = "decision.monitor";

const HOUR: u64 = 3600;

/// Build the implementation workflow for `option`
#[must_use]
pub fn implementation_workflow(decision_id: DecisionId, option: &DecisionOption) -> Workflow {
    let params = |phase: u32, name: &str| {
        json!({
            "decision_id": decision_id.to_string(),
            "option_id": option.id,
            "phase": phase,
            "name": name,
        })
    };

    let prepare = Task::new("prepare_validate", PREPARE_ACTION)
        .with_parameters(params(1, "Preparation and Validation"))
        .with_description("Validate resources and stakeholder alignment, set up monitoring")
        .with_timeout(Duration::from_secs(2 * HOUR))
        .with_success_criterion("All resources confirmed available")
        .with_success_criterion("Implementation environment ready")
        .with_success_criterion("Monitoring systems active")
        .with_rollback_trigger("Resource unavailability")
        .with_rollback_trigger("Critical system failures");

    let mut execute_params = params(2, "Initial Implementation");
    execute_params["expected_outcomes"] = json!(option.expected_outcomes);
    let execute = Task::new("execute", EXECUTE_ACTION)
        .with_parameters(execute_params)
        .with_description(format!("Carry out '{}'", option.description))
        .depends_on("prepare_validate")
        .with_timeout(Duration::from_secs(6 * HOUR))
        .with_resources(ResourceRequirements::from_fractional(
            option.resource_requirements.iter(),
        ))
        .with_rollback(RollbackData::new(
            RollbackStep::Restore.action_type(),
            json!({
                "decision_id": decision_id.to_string(),
                "option_id": option.id,
            }),
        ))
        .with_success_criterion("Implementation completed without errors")
        .with_success_criterion("Initial metrics within expected ranges")
        .with_success_criterion("No critical issues detected")
        .with_rollback_trigger("Implementation failures")
        .with_rollback_trigger("Performance below minimum thresholds")
        .with_rollback_trigger("Critical errors or security issues");

    let monitor = Task::new("monitor_optimize", MONITOR_ACTION)
        .with_parameters(params(3, "Monitoring and Optimization"))
        .with_description("Track performance, collect feedback, tune")
        .depends_on("execute")
        .with_timeout(Duration::from_secs(24 * HOUR))
        .with_success_criterion("Performance meets or exceeds expectations")
        .with_success_criterion("Stakeholder satisfaction maintained")
        .with_success_criterion("No significant issues detected")
        .with_rollback_trigger("Sustained performance degradation")
        .with_rollback_trigger("Significant stakeholder dissatisfaction")
        .with_rollback_trigger("Unexpected negative impacts");

    Workflow::new(format!("decision-{}-{}", decision_id, option.id))
        .with_mode(ExecutionMode::Sequential)
        .with_rollback_on_failure(true)
        .with_task(prepare)
        .with_task(execute)
        .with_task(monitor)
}

/// Fixed rollback steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStep {
    /// Stop the implementation immediately
    Halt,
    /// Put the previous configuration back
    Restore,
    /// Confirm the system is stable
    Validate,
    /// Tell stakeholders and log the incident
    Notify,
}

impl RollbackStep {
    /// Steps in the order they run
    pub const ORDER: [Self; 4] = [Self::Halt, Self::Restore, Self::Validate, Self::Notify];

    /// Action type dispatched for this step
    #[must_use]
    pub fn action_type(self) -> &'static str {
        match self {
            Self::Halt => "rollback.halt",
            Self::Restore => "rollback.restore",
            Self::Validate => "rollback.validate",
            Self::Notify => "rollback.notify",
        }
    }

    fn task_id(self) -> &'static str {
        match self {
            Self::Halt => "halt",
            Self::Restore => "restore",
            Self::Validate => "validate",
            Self::Notify => "notify",
        }
    }
}

/// One planned rollback step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStepPlan {
    /// Which step
    pub step: RollbackStep,
    /// What it does
    pub action: String,
    /// Time budget in minutes
    pub duration_minutes: u64,
    /// How success is confirmed
    pub validation: String,
}

/// Explicit plan for undoing a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Decision this plan undoes
    pub decision_id: DecisionId,
    /// Option that was chosen
    pub option_id: String,
    /// Conditions that start a rollback
    pub triggers: Vec<String>,
    /// Steps in execution order
    pub steps: Vec<RollbackStepPlan>,
    /// What a completed rollback guarantees
    pub success_criteria: Vec<String>,
    /// Expected total time
    pub estimated_minutes: u64,
}

impl RollbackPlan {
    /// The standard halt, restore, validate, notify plan
    #[must_use]
    pub fn standard(decision_id: DecisionId, option: &DecisionOption) -> Self {
        let step = |step, action: &str, duration_minutes, validation: &str| RollbackStepPlan {
            step,
            action: action.to_string(),
            duration_minutes,
            validation: validation.to_string(),
        };
        Self {
            decision_id,
            option_id: option.id.clone(),
            triggers: vec![
                "Implementation failure".to_string(),
                "Performance below minimum thresholds".to_string(),
                "Critical errors or security issues".to_string(),
                "Stakeholder intervention request".to_string(),
            ],
            steps: vec![
                step(RollbackStep::Halt, "Immediate halt of implementation", 5, "Confirm implementation stopped"),
                step(RollbackStep::Restore, "Restore previous configuration", 15, "Previous state restored successfully"),
                step(RollbackStep::Validate, "Validate system stability", 30, "All systems operating normally"),
                step(RollbackStep::Notify, "Notify stakeholders and log incident", 10, "Notifications sent and incident logged"),
            ],
            success_criteria: vec![
                "System restored to stable state".to_string(),
                "No data loss or corruption".to_string(),
                "All stakeholders notified".to_string(),
                "Incident properly documented".to_string(),
            ],
            estimated_minutes: 60,
        }
    }

    /// Sequential workflow running every step, each depending on the last.
    /// The workflow does not itself roll back.
    #[must_use]
    pub fn to_workflow(&self) -> Workflow {
        let mut workflow = Workflow::new(format!("rollback-{}-{}", self.decision_id, self.option_id))
            .with_mode(ExecutionMode::Sequential)
            .with_rollback_on_failure(false);
        let mut previous: Option<&str> = None;
        for planned in &self.steps {
            let id = planned.step.task_id();
            let mut task = Task::new(id, planned.step.action_type())
                .with_parameters(json!({
                    "decision_id": self.decision_id.to_string(),
                    "option_id": self.option_id,
                    "action": planned.action,
                }))
                .with_description(planned.action.clone())
                .with_timeout(Duration::from_secs(planned.duration_minutes * 60))
                .with_success_criterion(planned.validation.clone());
            if let Some(dep) = previous {
                task = task.depends_on(dep);
            }
            workflow = workflow.with_task(task);
            previous = Some(id);
        }
        workflow
    }
}
