//! The orchestration loop.
//!
//! One [`Orchestrator`] owns the execution engine, decision engine, metric
//! store, alert table, health monitor, anomaly detector and self-healing
//! supervisor. Monitoring runs each concern as its own tokio task on its own
//! interval. The loops share state only through those components and never
//! call each other. A failed iteration is logged and the loop carries on.

use crate::config::{ConfigError, OrchestratorConfig};
use crate::status::SystemStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use vigil_action::{Action, SharedActionRegistry};
use vigil_core::{CoreResult, MetricsSink, SharedClock, SystemClock, WorkflowId};
use vigil_decision::{ContextProvider, Decision, DecisionContext, DecisionEngine, DecisionOption};
use vigil_monitor::{
    AlertTable, AnomalyDetector, HealthCheckSpec, HealthMonitor, HealthProbe, MetricStore,
    SelfHealingSupervisor,
};
use vigil_plan::Workflow;
use vigil_runtime::{ExecutionEngine, WorkflowResult};

/// Embedder-supplied metrics, collected on the metric loop
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Current values as `(metric, value)` pairs
    ///
    /// # Errors
    ///
    /// Returns an error if the source could not be read; other sources are
    /// still collected
    async fn collect(&self) -> CoreResult<Vec<(String, f64)>>;
}

/// What happened to one decision end to end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// The decision
    pub decision: Decision,
    /// Result of the implementation workflow
    pub implementation: WorkflowResult,
    /// Result of the rollback-plan workflow, if it ran
    pub rollback: Option<WorkflowResult>,
}

impl DecisionOutcome {
    /// Whether the implementation completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.implementation.is_success()
    }
}

struct Running {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Owns every component and the background loops
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<SharedActionRegistry>,
    engine: Arc<ExecutionEngine>,
    decisions: Arc<DecisionEngine>,
    store: Arc<MetricStore>,
    alerts: Arc<AlertTable>,
    health: Arc<HealthMonitor>,
    anomaly: Arc<AnomalyDetector>,
    healing: Arc<SelfHealingSupervisor>,
    provider: RwLock<Option<Arc<dyn ContextProvider>>>,
    sources: RwLock<Vec<Arc<dyn MetricSource>>>,
    running: Mutex<Option<Running>>,
    clock: SharedClock,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("monitoring", &self.is_monitoring())
            .field("engine", &self.engine)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build every component from `config`
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the configuration does not validate
    pub fn new(config: OrchestratorConfig) -> Result<Self, ConfigError> {
        Self::build(config, SystemClock::shared())
    }

    /// Build every component from `config`, reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the configuration does not validate
    pub fn build(config: OrchestratorConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Arc::new(SharedActionRegistry::new());
        let store = Arc::new(MetricStore::new(config.metrics.clone()).with_clock(Arc::clone(&clock)));
        let sink: Arc<dyn MetricsSink> = Arc::clone(&store) as Arc<dyn MetricsSink>;
        let engine = Arc::new(
            ExecutionEngine::with_registry(config.engine.clone(), Arc::clone(&registry))
                .with_clock(Arc::clone(&clock))
                .with_sink(sink),
        );
        let decisions =
            Arc::new(DecisionEngine::new(config.decision.clone()).with_clock(Arc::clone(&clock)));
        let alerts = Arc::new(AlertTable::new(config.alerts.clone()).with_clock(Arc::clone(&clock)));
        let health = Arc::new(
            HealthMonitor::new(Arc::clone(&alerts), Arc::clone(&store))
                .with_clock(Arc::clone(&clock)),
        );
        let anomaly = Arc::new(
            AnomalyDetector::new(config.anomaly.clone(), Arc::clone(&store), Arc::clone(&alerts))
                .with_clock(Arc::clone(&clock)),
        );
        let healing = Arc::new(
            SelfHealingSupervisor::new(
                Arc::clone(&engine),
                Arc::clone(&health),
                Arc::clone(&alerts),
                config.recovery_history,
            )
            .with_clock(Arc::clone(&clock)),
        );
        healing.set_enabled(config.auto_healing);

        Ok(Self {
            config,
            registry,
            engine,
            decisions,
            store,
            alerts,
            health,
            anomaly,
            healing,
            provider: RwLock::new(None),
            sources: RwLock::new(Vec::new()),
            running: Mutex::new(None),
            clock,
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Action registry shared by every workflow
    #[must_use]
    pub fn registry(&self) -> &Arc<SharedActionRegistry> {
        &self.registry
    }

    /// Execution engine
    #[must_use]
    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Decision engine
    #[must_use]
    pub fn decisions(&self) -> &Arc<DecisionEngine> {
        &self.decisions
    }

    /// Metric store
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Alert table
    #[must_use]
    pub fn alerts(&self) -> &Arc<AlertTable> {
        &self.alerts
    }

    /// Health monitor
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Self-healing supervisor
    #[must_use]
    pub fn healing(&self) -> &Arc<SelfHealingSupervisor> {
        &self.healing
    }

    /// Register an action handler
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the type is taken
    pub fn register_action(&self, action: Arc<dyn Action>) -> CoreResult<()> {
        Ok(self.registry.register(action)?)
    }

    /// Register a health check
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken
    pub fn register_check(&self, spec: HealthCheckSpec, probe: Arc<dyn HealthProbe>) -> CoreResult<()> {
        self.health.register(spec, probe)
    }

    /// Feed the autonomous decision cycle from `provider`
    pub fn set_context_provider(&self, provider: Arc<dyn ContextProvider>) {
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    /// Collect `source` on the metric loop
    pub fn add_metric_source(&self, source: Arc<dyn MetricSource>) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source);
    }

    /// Choose among `options` without executing anything
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty or malformed option list
    pub fn submit_decision_request(
        &self,
        context: &DecisionContext,
        options: Vec<DecisionOption>,
    ) -> CoreResult<Decision> {
        self.decisions.decide(context, options)
    }

    /// Decide, run the implementation workflow and, if it fails, the
    /// rollback-plan workflow
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for bad options or a malformed workflow
    pub async fn decide_and_execute(
        &self,
        context: &DecisionContext,
        options: Vec<DecisionOption>,
    ) -> CoreResult<DecisionOutcome> {
        let decision = self.decisions.decide(context, options)?;
        let implementation = self.engine.submit_workflow(decision.workflow.clone()).await?;

        let rollback = if implementation.is_success() {
            None
        } else {
            tracing::warn!(
                decision = %decision.id,
                option = %decision.option.id,
                error = implementation.error.as_deref().unwrap_or("unknown"),
                "implementation failed, running rollback plan"
            );
            let result = self
                .engine
                .submit_workflow(decision.rollback_plan.to_workflow())
                .await?;
            if !result.is_success() {
                tracing::error!(decision = %decision.id, "rollback plan did not complete");
            }
            Some(result)
        };

        Ok(DecisionOutcome {
            decision,
            implementation,
            rollback,
        })
    }

    /// Run a workflow on the shared engine
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` or `CyclicDependency` for a malformed graph
    pub async fn submit_workflow(&self, workflow: Workflow) -> CoreResult<WorkflowResult> {
        self.engine.submit_workflow(workflow).await
    }

    /// Pause a running workflow
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is not running
    pub fn pause_workflow(&self, id: WorkflowId) -> CoreResult<()> {
        self.engine.pause(id)
    }

    /// Resume a paused workflow
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is not running
    pub fn resume_workflow(&self, id: WorkflowId) -> CoreResult<()> {
        self.engine.resume(id)
    }

    /// Cancel a running workflow
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is not running
    pub fn cancel_workflow(&self, id: WorkflowId) -> CoreResult<()> {
        self.engine.cancel(id)
    }

    /// Whether the background loops are running
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn every background loop. Returns `false` if already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            tracing::warn!("monitoring already running");
            return false;
        }

        let token = CancellationToken::new();
        let intervals = &self.config.intervals;
        let handles = vec![
            self.spawn_loop("decision", intervals.decision(), &token, |o| async move {
                o.decision_tick().await.map(|_| ())
            }),
            self.spawn_loop("health", intervals.health_tick(), &token, |o| async move {
                o.health.run_due_checks().await;
                Ok(())
            }),
            self.spawn_loop("metrics", intervals.metric_collection(), &token, |o| async move {
                o.collect_metrics().await;
                Ok(())
            }),
            self.spawn_loop("anomaly", intervals.anomaly(), &token, |o| async move {
                let found = o.anomaly.detect_all();
                if !found.is_empty() {
                    tracing::info!(anomalies = found.len(), "anomaly pass flagged samples");
                }
                Ok(())
            }),
            self.spawn_loop("alerts", intervals.alert_processing(), &token, |o| async move {
                let report = o.alerts.sweep();
                if !report.escalated.is_empty() || !report.stale.is_empty() {
                    tracing::info!(
                        escalated = report.escalated.len(),
                        stale = report.stale.len(),
                        "alert sweep"
                    );
                }
                Ok(())
            }),
            self.spawn_loop("healing", intervals.self_healing(), &token, |o| async move {
                o.healing.heal_pending().await;
                Ok(())
            }),
            self.spawn_loop("adaptation", intervals.adaptation(), &token, |o| async move {
                o.adapt();
                Ok(())
            }),
        ];

        tracing::info!(loops = handles.len(), "monitoring started");
        *running = Some(Running { token, handles });
        true
    }

    /// Stop every background loop and wait for them to finish.
    /// Returns `false` if nothing was running.
    pub async fn stop_monitoring(&self) -> bool {
        let Some(running) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        running.token.cancel();
        for handle in running.handles {
            if let Err(err) = handle.await {
                tracing::error!(%err, "monitoring loop ended abnormally");
            }
        }
        tracing::info!("monitoring stopped");
        true
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        token: &CancellationToken,
        tick: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        let this = Arc::clone(self);
        let token = token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(loop_name = name, period_secs = period.as_secs(), "loop started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = tick(Arc::clone(&this)).await {
                            tracing::error!(loop_name = name, %err, "loop iteration failed");
                        }
                    }
                }
            }
            tracing::debug!(loop_name = name, "loop stopped");
        })
    }

    /// One autonomous decision cycle; a no-op without a provider or options
    ///
    /// # Errors
    ///
    /// Returns provider failures and decision input errors
    pub async fn decision_tick(&self) -> CoreResult<Option<DecisionOutcome>> {
        let provider = self
            .provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(provider) = provider else {
            return Ok(None);
        };
        let options = provider.candidate_options().await?;
        if options.is_empty() {
            tracing::debug!("no candidate options this cycle");
            return Ok(None);
        }
        let mut context = provider.decision_context().await?;
        if context.available_resources.is_none() {
            context.available_resources = Some(
                self.engine
                    .pool_snapshot()
                    .into_iter()
                    .map(|p| {
                        let available = p.available() as f64;
                        (p.name, available)
                    })
                    .collect(),
            );
        }
        let outcome = self.decide_and_execute(&context, options).await?;
        tracing::info!(
            decision = %outcome.decision.id,
            option = %outcome.decision.option.id,
            success = outcome.is_success(),
            "decision cycle finished"
        );
        Ok(Some(outcome))
    }

    /// Record pool, execution and embedder metrics, then prune the store
    pub async fn collect_metrics(&self) {
        for pool in self.engine.pool_snapshot() {
            self.store
                .record_value(format!("pool_utilization_{}", pool.name), pool.utilization());
        }
        let execution = self.engine.metrics();
        self.store
            .record_value("task_success_rate", execution.success_rate());
        self.store
            .record_value("active_tasks", self.engine.active_tasks().len() as f64);
        self.store
            .record_value("active_workflows", self.engine.active_workflows().len() as f64);
        self.store
            .record_value("open_alerts", self.alerts.open().len() as f64);

        let sources = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for source in sources {
            match source.collect().await {
                Ok(values) => {
                    for (name, value) in values {
                        self.store.record_value(name, value);
                    }
                }
                Err(err) => tracing::warn!(source = source.name(), %err, "metric source failed"),
            }
        }

        let pruned = self.store.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "expired metric samples dropped");
        }
    }

    /// Feed the workflow success rate into the decision criteria
    pub fn adapt(&self) {
        if let Some(rate) = self.engine.metrics().workflow_success_rate() {
            self.decisions.adapt_criteria(rate);
        }
    }

    /// Snapshot of the whole system
    #[must_use]
    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            monitoring: self.is_monitoring(),
            auto_healing: self.healing.is_enabled(),
            health: self.health.summary(),
            checks: self.health.statuses(),
            active_workflows: self.engine.active_workflows(),
            active_tasks: self.engine.active_tasks(),
            open_alerts: self.alerts.open(),
            alert_stats: self.alerts.stats(),
            pools: self.engine.pool_snapshot(),
            execution: self.engine.metrics(),
            decisions: self.decisions.status(),
            healing: self.healing.stats(),
            generated_at: self.clock.now(),
        }
    }
}
