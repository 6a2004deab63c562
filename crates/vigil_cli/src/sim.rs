//! Stand-ins for real infrastructure so the loop can be exercised locally.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use vigil_action::{Action, ActionError, ActionOutput};
use vigil_core::CoreResult;
use vigil_decision::{RollbackStep, EXECUTE_ACTION, MONITOR_ACTION, PREPARE_ACTION};
use vigil_monitor::{HealthProbe, ProbeResult, RecoveryAction};
use vigil_orchestrator::Orchestrator;
use vigil_plan::Workflow;

/// Action that sleeps briefly and fails at a fixed rate
#[derive(Debug, Clone)]
pub struct SimulatedAction {
    action_type: String,
    failure_rate: f64,
    max_latency_ms: u64,
}

impl SimulatedAction {
    /// Simulate `action_type`
    pub fn new(action_type: impl Into<String>, failure_rate: f64) -> Self {
        Self {
            action_type: action_type.into(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            max_latency_ms: 200,
        }
    }
}

#[async_trait]
impl Action for SimulatedAction {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    fn description(&self) -> &str {
        "simulated"
    }

    async fn execute(&self, parameters: &Value) -> Result<ActionOutput, ActionError> {
        let (latency, fail) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..=self.max_latency_ms),
                rng.gen_bool(self.failure_rate),
            )
        };
        tokio::time::sleep(Duration::from_millis(latency)).await;
        if fail {
            return Err(ActionError::Failed(format!(
                "simulated failure of {}",
                self.action_type
            )));
        }
        Ok(ActionOutput::new(json!({
            "action": self.action_type,
            "latency_ms": latency,
            "parameters": parameters,
        }))
        .with_message("simulated"))
    }
}

/// Probe reporting a random usage figure against a limit
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    name: String,
    mean: f64,
    spread: f64,
    limit: f64,
}

impl SimulatedProbe {
    /// Values drawn uniformly from `mean ± spread`
    pub fn new(name: impl Into<String>, mean: f64, spread: f64, limit: f64) -> Self {
        Self {
            name: name.into(),
            mean,
            spread,
            limit,
        }
    }
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self) -> CoreResult<ProbeResult> {
        let value = self.mean + rand::thread_rng().gen_range(-self.spread..=self.spread);
        Ok(ProbeResult::below(&self.name, value, self.limit))
    }
}

/// Register simulated handlers for every action type the decision cycle,
/// rollback plans and recovery can dispatch. Existing handlers are replaced.
pub fn install_actions(orchestrator: &Orchestrator, failure_rate: f64) {
    let registry = orchestrator.registry();
    let types = [PREPARE_ACTION, EXECUTE_ACTION, MONITOR_ACTION]
        .into_iter()
        .map(str::to_string)
        .chain(RollbackStep::ORDER.iter().map(|s| s.action_type().to_string()))
        .chain(RecoveryAction::ALL.iter().map(|a| a.action_type()));
    for action_type in types {
        registry.upsert(Arc::new(SimulatedAction::new(action_type, failure_rate)));
    }
}

/// Register a simulated handler for every action type `workflow` uses,
/// compensations included, unless one is already registered
pub fn install_workflow_actions(orchestrator: &Orchestrator, workflow: &Workflow, failure_rate: f64) {
    let registry = orchestrator.registry();
    for task in &workflow.tasks {
        let compensation = task
            .rollback
            .as_ref()
            .and_then(|r| r.action_type.clone());
        for action_type in std::iter::once(task.action_type.clone()).chain(compensation) {
            if !registry.contains(&action_type) {
                registry.upsert(Arc::new(SimulatedAction::new(action_type, failure_rate)));
            }
        }
    }
}

/// Probes for the default check catalog
pub fn probe_for(check: &str) -> Arc<dyn HealthProbe> {
    let probe = match check {
        "cpu_usage" => SimulatedProbe::new(check, 55.0, 40.0, 90.0),
        "memory_usage" => SimulatedProbe::new(check, 60.0, 30.0, 85.0),
        "disk_usage" => SimulatedProbe::new(check, 70.0, 15.0, 90.0),
        _ => SimulatedProbe::new(check, 40.0, 40.0, 95.0),
    };
    Arc::new(probe)
}
