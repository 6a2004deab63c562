//! Multi-criteria decision engine.
//!
//! Scores every option over the weighted criteria, keeps the options within
//! 10% of the best risk-adjusted score and breaks the tie with a
//! context-sensitive secondary score. Remaining ties go to the option that
//! came first. The chosen option is turned into an implementation workflow
//! plus a rollback plan, and the decision is kept in a bounded history.

use crate::context::{ContextAnalysis, DecisionContext, NEUTRAL};
use crate::criteria::{CriteriaWeights, Criterion};
use crate::option::DecisionOption;
use crate::plan::{implementation_workflow, RollbackPlan};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use vigil_core::{
    BoundedHistory, CoreError, CoreResult, DecisionId, SharedClock, SystemClock,
};
use vigil_plan::Workflow;

/// Options scoring at least this fraction of the best are candidates
pub const CANDIDATE_RATIO: f64 = 0.9;

/// Decision engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Initial criterion weights
    pub weights: CriteriaWeights,
    /// Decisions kept in history
    pub history_capacity: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            weights: CriteriaWeights::default(),
            history_capacity: 1000,
        }
    }
}

impl DecisionConfig {
    /// Set weights
    #[must_use]
    pub fn with_weights(mut self, weights: CriteriaWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set history capacity
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

/// Score breakdown for one option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Option id
    pub option_id: String,
    /// Per-criterion scores
    pub scores: IndexMap<Criterion, f64>,
    /// Σ weight × score
    pub weighted_score: f64,
    /// Weighted score discounted by risk
    pub risk_adjusted_score: f64,
}

/// Outcome of one decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Decision id
    pub id: DecisionId,
    /// Chosen option
    pub option: DecisionOption,
    /// Human readable reasons
    pub rationale: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Evaluation of every submitted option in input order
    pub evaluations: Vec<Evaluation>,
    /// Workflow that carries the decision out
    pub workflow: Workflow,
    /// How to undo it
    pub rollback_plan: RollbackPlan,
    /// Metrics to watch afterwards
    pub monitoring_metrics: Vec<String>,
    /// When it was made
    pub decided_at: DateTime<Utc>,
}

/// Summary of engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStatus {
    /// Decisions made since start, including evicted ones
    pub total_decisions: u64,
    /// Decisions currently held in history
    pub retained_decisions: usize,
    /// Mean confidence of the last ten decisions
    pub average_recent_confidence: Option<f64>,
    /// Current weights
    pub weights: CriteriaWeights,
}

/// Chooses among options
#[derive(Debug)]
pub struct DecisionEngine {
    weights: RwLock<CriteriaWeights>,
    history: BoundedHistory<Decision>,
    total: std::sync::atomic::AtomicU64,
    clock: SharedClock,
}

impl DecisionEngine {
    /// Create an engine
    #[must_use]
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            weights: RwLock::new(config.weights),
            history: BoundedHistory::new(config.history_capacity.max(1)),
            total: std::sync::atomic::AtomicU64::new(0),
            clock: SystemClock::shared(),
        }
    }

    /// Use a different clock for urgency and timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Current weights
    #[must_use]
    pub fn weights(&self) -> CriteriaWeights {
        *self.weights.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Choose one of `options` for `context`.
    ///
    /// Deterministic for identical input: the same option is chosen every
    /// time, only the ids differ.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `options` is empty, any option fails
    /// validation or the current weights are unusable. Nothing is recorded
    /// in that case.
    pub fn decide(
        &self,
        context: &DecisionContext,
        options: Vec<DecisionOption>,
    ) -> CoreResult<Decision> {
        if options.is_empty() {
            return Err(CoreError::invalid("options", "at least one option is required"));
        }
        for option in &options {
            option.validate()?;
        }
        let weights = self.weights();
        weights.validate()?;

        let now = self.clock.now();
        let analysis = ContextAnalysis::analyze(context, now);
        let evaluations: Vec<Evaluation> = options
            .iter()
            .map(|o| evaluate(o, context, &weights))
            .collect();
        let chosen = select(&options, &evaluations, &analysis);
        let option = options[chosen].clone();

        let id = DecisionId::new();
        let confidence = confidence(&option, &analysis);
        let decision = Decision {
            id,
            rationale: rationale(&option, &analysis),
            confidence,
            evaluations,
            workflow: implementation_workflow(id, &option),
            rollback_plan: RollbackPlan::standard(id, &option),
            monitoring_metrics: monitoring_metrics(&option),
            decided_at: now,
            option,
        };

        tracing::info!(
            decision = %decision.id,
            option = %decision.option.id,
            candidates = options.len(),
            confidence = decision.confidence,
            "decision made"
        );
        self.history.push(decision.clone());
        self.total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(decision)
    }

    /// Feed back the observed success rate of implemented decisions
    pub fn adapt_criteria(&self, success_rate: f64) -> CriteriaWeights {
        let mut weights = self.weights.write().unwrap_or_else(PoisonError::into_inner);
        if weights.adapt(success_rate) {
            tracing::info!(success_rate, weights = ?*weights, "decision criteria adapted");
        }
        *weights
    }

    /// Up to `n` most recent decisions, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<Decision> {
        self.history.recent(n)
    }

    /// Engine summary
    #[must_use]
    pub fn status(&self) -> DecisionStatus {
        let recent = self.history.recent(10);
        let average_recent_confidence = (!recent.is_empty())
            .then(|| recent.iter().map(|d| d.confidence).sum::<f64>() / recent.len() as f64);
        DecisionStatus {
            total_decisions: self.total.load(std::sync::atomic::Ordering::Relaxed),
            retained_decisions: self.history.len(),
            average_recent_confidence,
            weights: self.weights(),
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(DecisionConfig::default())
    }
}

fn evaluate(option: &DecisionOption, context: &DecisionContext, weights: &CriteriaWeights) -> Evaluation {
    let scores: IndexMap<Criterion, f64> = Criterion::ALL
        .iter()
        .map(|c| (*c, c.score(option, context).unwrap_or(NEUTRAL)))
        .collect();
    let weighted_score: f64 = scores.iter().map(|(c, s)| weights.weight(*c) * s).sum();
    Evaluation {
        option_id: option.id.clone(),
        scores,
        weighted_score,
        risk_adjusted_score: weighted_score * (1.0 - option.risk_level * 0.3),
    }
}

/// Index of the winning option; `options` and `evaluations` are parallel
/// and non-empty
fn select(options: &[DecisionOption], evaluations: &[Evaluation], analysis: &ContextAnalysis) -> usize {
    let best = evaluations
        .iter()
        .map(|e| e.risk_adjusted_score)
        .fold(f64::NEG_INFINITY, f64::max);
    let threshold = best * CANDIDATE_RATIO;
    let candidates: Vec<usize> = evaluations
        .iter()
        .enumerate()
        .filter(|(_, e)| e.risk_adjusted_score >= threshold)
        .map(|(i, _)| i)
        .collect();

    let Some(&first) = candidates.first() else {
        // no finite best score; take the plain maximum
        return evaluations
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.risk_adjusted_score.total_cmp(&b.risk_adjusted_score))
            .map_or(0, |(i, _)| i);
    };
    let mut winner = first;
    if candidates.len() > 1 {
        let mut winning_score = tiebreak(&options[winner], analysis);
        for &i in &candidates[1..] {
            let score = tiebreak(&options[i], analysis);
            if score > winning_score {
                winner = i;
                winning_score = score;
            }
        }
        tracing::debug!(
            candidates = candidates.len(),
            winner = %options[winner].id,
            "tie broken among near-equal options"
        );
    }
    winner
}

fn tiebreak(option: &DecisionOption, analysis: &ContextAnalysis) -> f64 {
    let complexity = if analysis.urgency_level() > 0.7 {
        (1.0 - option.implementation_complexity) * 0.3
    } else {
        option.implementation_complexity * 0.1
    };
    let risk = if analysis.tolerance() > 0.6 {
        option.risk_level * 0.2
    } else {
        (1.0 - option.risk_level) * 0.2
    };
    option.confidence * 0.3 + complexity + risk + option.stakeholder_alignment * 0.2
}

fn confidence(option: &DecisionOption, analysis: &ContextAnalysis) -> f64 {
    let factors = [
        option.confidence,
        analysis.health(),
        1.0 - analysis.volatility(),
        analysis.alignment(),
        analysis.historical_success(),
    ];
    let mean = factors.iter().sum::<f64>() / factors.len() as f64;
    (mean * (1.0 - option.risk_level * 0.2)).clamp(0.0, 1.0)
}

fn rationale(option: &DecisionOption, analysis: &ContextAnalysis) -> String {
    let mut parts = vec![format!(
        "Selected '{}' based on multi-criteria analysis.",
        option.description
    )];

    let mut strengths = Vec::new();
    if option.confidence > 0.8 {
        strengths.push("high confidence in outcomes");
    }
    if option.stakeholder_alignment > 0.8 {
        strengths.push("strong stakeholder alignment");
    }
    if option.risk_level < 0.3 {
        strengths.push("low risk profile");
    }
    if !strengths.is_empty() {
        parts.push(format!("Key strengths include: {}.", strengths.join(", ")));
    }

    match analysis.ecosystem_health {
        Some(h) if h > 0.8 => parts.push("Current system health supports this decision.".into()),
        Some(h) if h < 0.4 => parts.push("Decision accounts for current system challenges.".into()),
        _ => {}
    }

    let improvements: Vec<String> = option
        .expected_outcomes
        .iter()
        .filter(|(_, v)| **v > 0.1)
        .map(|(k, v)| format!("{k} improvement of {:.1}%", v * 100.0))
        .collect();
    if !improvements.is_empty() {
        parts.push(format!("Expected outcomes include: {}.", improvements.join(", ")));
    }

    if option.risk_level > 0.5 {
        parts.push(format!(
            "Accepted moderate risk ({:.1}%) given current conditions.",
            option.risk_level * 100.0
        ));
    }
    parts.join(" ")
}

fn monitoring_metrics(option: &DecisionOption) -> Vec<String> {
    let standard = [
        "implementation_success_rate",
        "performance_vs_baseline",
        "stakeholder_satisfaction",
        "risk_realization_rate",
    ];
    standard
        .iter()
        .map(|s| (*s).to_string())
        .chain(option.expected_outcomes.keys().map(|k| format!("{k}_actual_vs_expected")))
        .chain(
            option
                .resource_requirements
                .keys()
                .map(|k| format!("{k}_utilization_efficiency")),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RiskAssessment;
    use proptest::prelude::*;
    use vigil_core::ManualClock;

    fn options() -> Vec<DecisionOption> {
        vec![
            DecisionOption::new("cautious", "Tune cache sizes")
                .with_outcome("efficiency", 0.2)
                .with_risk(0.1)
                .with_confidence(0.9)
                .with_complexity(0.2)
                .with_alignment(0.8),
            DecisionOption::new("bold", "Migrate storage tier")
                .with_outcome("revenue", 0.6)
                .with_outcome("growth", 0.5)
                .with_risk(0.6)
                .with_confidence(0.5)
                .with_complexity(0.8)
                .with_alignment(0.4),
            DecisionOption::new("idle", "Do nothing")
                .with_risk(0.0)
                .with_confidence(0.4)
                .with_complexity(0.0)
                .with_alignment(0.3),
        ]
    }

    fn eval(id: &str, score: f64) -> Evaluation {
        Evaluation {
            option_id: id.to_string(),
            scores: IndexMap::new(),
            weighted_score: score,
            risk_adjusted_score: score,
        }
    }

    #[test]
    fn test_empty_options_rejected() {
        let engine = DecisionEngine::default();
        let err = engine.decide(&DecisionContext::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert_eq!(engine.status().total_decisions, 0);
    }

    #[test]
    fn test_invalid_option_rejected() {
        let engine = DecisionEngine::default();
        let bad = vec![DecisionOption::new("x", "").with_risk(2.0)];
        assert!(engine.decide(&DecisionContext::new(), bad).is_err());
        assert!(engine.recent(10).is_empty());
    }

    #[test]
    fn test_unusable_weights_rejected() {
        let negative = CriteriaWeights {
            financial_impact: -1.0,
            strategic_alignment: -1.0,
            risk_level: -1.0,
            stakeholder_satisfaction: -1.0,
            implementation_feasibility: -1.0,
            learning_opportunity: -1.0,
        };
        let engine = DecisionEngine::new(DecisionConfig::default().with_weights(negative));
        let opts = vec![
            DecisionOption::new("a", ""),
            DecisionOption::new("b", "").with_risk(0.9),
        ];
        let err = engine.decide(&DecisionContext::new(), opts).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert_eq!(engine.status().total_decisions, 0);
    }

    #[test]
    fn test_negative_scores_pick_maximum() {
        let opts = vec![DecisionOption::new("a", ""), DecisionOption::new("b", "")];
        let evals = vec![eval("a", -0.6), eval("b", -0.5)];
        assert_eq!(select(&opts, &evals, &ContextAnalysis::default()), 1);

        let evals = vec![eval("a", f64::NAN), eval("b", f64::NAN)];
        assert!(select(&opts, &evals, &ContextAnalysis::default()) < 2);
    }

    #[test]
    fn test_decision_shape() {
        let engine = DecisionEngine::default();
        let decision = engine.decide(&DecisionContext::new(), options()).unwrap();
        assert_eq!(decision.evaluations.len(), 3);
        assert_eq!(decision.workflow.tasks.len(), 3);
        assert_eq!(decision.rollback_plan.option_id, decision.option.id);
        assert!(decision.rationale.starts_with("Selected '"));
        assert!(decision
            .monitoring_metrics
            .contains(&"implementation_success_rate".to_string()));
        assert_eq!(engine.recent(1)[0].id, decision.id);
    }

    #[test]
    fn test_deterministic_choice() {
        let engine = DecisionEngine::default();
        let ctx = DecisionContext::new().with_health_factor("overall_health", 0.7);
        let first = engine.decide(&ctx, options()).unwrap().option.id;
        for _ in 0..20 {
            assert_eq!(engine.decide(&ctx, options()).unwrap().option.id, first);
        }
    }

    #[test]
    fn test_near_tie_prefers_confidence_when_not_urgent() {
        // 0.81 and 0.80 both clear 0.9 × 0.81 = 0.729
        let opts = vec![
            DecisionOption::new("a", "")
                .with_confidence(0.6)
                .with_risk(0.3)
                .with_complexity(0.5)
                .with_alignment(0.5),
            DecisionOption::new("b", "")
                .with_confidence(0.9)
                .with_risk(0.3)
                .with_complexity(0.5)
                .with_alignment(0.5),
        ];
        let evals = vec![eval("a", 0.81), eval("b", 0.80)];
        let analysis = ContextAnalysis::default();
        assert_eq!(select(&opts, &evals, &analysis), 1);
    }

    #[test]
    fn test_exact_tie_keeps_input_order() {
        let opts = vec![DecisionOption::new("a", ""), DecisionOption::new("b", "")];
        let evals = vec![eval("a", 0.5), eval("b", 0.5)];
        assert_eq!(select(&opts, &evals, &ContextAnalysis::default()), 0);
    }

    #[test]
    fn test_outside_band_never_wins() {
        let opts = vec![
            DecisionOption::new("a", "").with_confidence(0.0),
            DecisionOption::new("b", "").with_confidence(1.0).with_alignment(1.0),
        ];
        let evals = vec![eval("a", 0.81), eval("b", 0.70)];
        assert_eq!(select(&opts, &evals, &ContextAnalysis::default()), 0);
    }

    #[test]
    fn test_urgency_favours_simple_options() {
        let opts = vec![
            DecisionOption::new("complex", "").with_complexity(0.9),
            DecisionOption::new("simple", "").with_complexity(0.1),
        ];
        let evals = vec![eval("complex", 0.8), eval("simple", 0.8)];
        let urgent = ContextAnalysis {
            urgency: Some(1.0),
            ..ContextAnalysis::default()
        };
        assert_eq!(select(&opts, &evals, &urgent), 1);
        let relaxed = ContextAnalysis {
            urgency: Some(0.3),
            ..ContextAnalysis::default()
        };
        assert_eq!(select(&opts, &evals, &relaxed), 0);
    }

    #[test]
    fn test_risk_tolerance_flips_preference() {
        let opts = vec![
            DecisionOption::new("safe", "").with_risk(0.1),
            DecisionOption::new("risky", "").with_risk(0.9),
        ];
        let evals = vec![eval("safe", 0.8), eval("risky", 0.8)];
        let tolerant = ContextAnalysis {
            risk_tolerance: Some(0.9),
            ..ContextAnalysis::default()
        };
        assert_eq!(select(&opts, &evals, &tolerant), 1);
        assert_eq!(select(&opts, &evals, &ContextAnalysis::default()), 0);
    }

    #[test]
    fn test_confidence_neutral_context() {
        let opt = DecisionOption::new("a", "").with_confidence(1.0).with_risk(0.5);
        let c = confidence(&opt, &ContextAnalysis::default());
        // mean(1, .5, .5, .5, .5) = .6, × 0.9
        assert!((c - 0.54).abs() < 1e-9);
    }

    #[test]
    fn test_adapt_and_status() {
        let engine = DecisionEngine::default();
        let weights = engine.adapt_criteria(0.5);
        assert!((weights.risk_level - 0.25).abs() < 1e-9);
        assert_eq!(engine.weights(), weights);

        engine.decide(&DecisionContext::new(), options()).unwrap();
        let status = engine.status();
        assert_eq!(status.total_decisions, 1);
        assert!(status.average_recent_confidence.is_some());
    }

    #[test]
    fn test_history_bounded() {
        let engine = DecisionEngine::new(DecisionConfig::default().with_history_capacity(3));
        for _ in 0..5 {
            engine.decide(&DecisionContext::new(), options()).unwrap();
        }
        let status = engine.status();
        assert_eq!(status.total_decisions, 5);
        assert_eq!(status.retained_decisions, 3);
    }

    #[test]
    fn test_deadline_uses_clock() {
        let start = Utc::now();
        let clock = std::sync::Arc::new(ManualClock::new(start));
        let engine = DecisionEngine::default().with_clock(clock.clone());
        let ctx = DecisionContext::new()
            .with_deadline(start + chrono::Duration::minutes(30))
            .with_risk(RiskAssessment::default());
        let decision = engine.decide(&ctx, options()).unwrap();
        assert_eq!(decision.decided_at, start);
    }

    fn arb_option() -> impl Strategy<Value = DecisionOption> {
        (
            "[a-z]{1,6}",
            0.0f64..=1.0,
            0.0f64..=1.0,
            0.0f64..=1.0,
            0.0f64..=1.0,
            -1.0f64..=1.0,
        )
            .prop_map(|(id, risk, conf, cx, align, revenue)| {
                DecisionOption::new(id, "generated")
                    .with_risk(risk)
                    .with_confidence(conf)
                    .with_complexity(cx)
                    .with_alignment(align)
                    .with_outcome("revenue", revenue)
            })
    }

    proptest! {
        #[test]
        fn prop_choice_is_member_with_bounded_confidence(
            opts in proptest::collection::vec(arb_option(), 1..8),
            health in 0.0f64..=1.0,
        ) {
            let engine = DecisionEngine::default();
            let ctx = DecisionContext::new().with_health_factor("overall_health", health);
            let decision = engine.decide(&ctx, opts.clone()).unwrap();
            prop_assert!(opts.contains(&decision.option));
            prop_assert!((0.0..=1.0).contains(&decision.confidence));

            let again = engine.decide(&ctx, opts).unwrap();
            prop_assert_eq!(again.option, decision.option);
        }
    }
}
