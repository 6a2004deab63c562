//! MCDA criteria, weights and per-criterion scoring.
//!
//! Weights are not required to sum to one. Scorers return `None` when the
//! option or context carries nothing to score; the evaluator substitutes
//! [`NEUTRAL`].

use crate::context::{DecisionContext, NEUTRAL};
use crate::option::DecisionOption;
use serde::{Deserialize, Serialize};
use vigil_core::{CoreError, CoreResult};

/// Fixed set of scoring criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Financial, revenue and cost outcomes
    FinancialImpact,
    /// Growth, efficiency, innovation and strategic outcomes
    StrategicAlignment,
    /// Inverted risk
    RiskLevel,
    /// Stakeholder alignment of the option
    StakeholderSatisfaction,
    /// Complexity and resource availability
    ImplementationFeasibility,
    /// Complexity and novelty
    LearningOpportunity,
}

impl Criterion {
    /// Every criterion in scoring order
    pub const ALL: [Self; 6] = [
        Self::FinancialImpact,
        Self::StrategicAlignment,
        Self::RiskLevel,
        Self::StakeholderSatisfaction,
        Self::ImplementationFeasibility,
        Self::LearningOpportunity,
    ];

    /// Stable snake_case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FinancialImpact => "financial_impact",
            Self::StrategicAlignment => "strategic_alignment",
            Self::RiskLevel => "risk_level",
            Self::StakeholderSatisfaction => "stakeholder_satisfaction",
            Self::ImplementationFeasibility => "implementation_feasibility",
            Self::LearningOpportunity => "learning_opportunity",
        }
    }

    /// Score `option`, or `None` if there is nothing to score
    #[must_use]
    pub fn score(self, option: &DecisionOption, context: &DecisionContext) -> Option<f64> {
        let score = match self {
            Self::FinancialImpact => financial_impact(option)?,
            Self::StrategicAlignment => strategic_alignment(option)?,
            Self::RiskLevel => 1.0 - option.risk_level.min(1.0),
            Self::StakeholderSatisfaction => option.stakeholder_alignment,
            Self::ImplementationFeasibility => {
                let resources = resource_feasibility(option, context).unwrap_or(NEUTRAL);
                ((1.0 - option.implementation_complexity) + resources) / 2.0
            }
            Self::LearningOpportunity => {
                let similar = context.similar_decisions(&option.id) as f64;
                let novelty = 1.0 - (similar / 10.0).min(1.0);
                (option.implementation_complexity + novelty) / 2.0
            }
        };
        Some(score.clamp(0.0, 1.0))
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn outcomes_matching<'a>(
    option: &'a DecisionOption,
    terms: &'a [&'a str],
) -> impl Iterator<Item = f64> + 'a {
    option
        .expected_outcomes
        .iter()
        .filter(move |(name, _)| {
            let name = name.to_lowercase();
            terms.iter().any(|t| name.contains(t))
        })
        .map(|(_, v)| *v)
}

fn financial_impact(option: &DecisionOption) -> Option<f64> {
    let values: Vec<f64> = outcomes_matching(option, &["financial", "revenue", "cost"]).collect();
    if values.is_empty() {
        return None;
    }
    let total: f64 = values.iter().sum();
    Some((total + 1.0) / 2.0)
}

fn strategic_alignment(option: &DecisionOption) -> Option<f64> {
    let values: Vec<f64> =
        outcomes_matching(option, &["growth", "efficiency", "innovation", "strategic"]).collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean + 1.0) / 2.0)
}

/// Product of `available / required` over every short resource, `None`
/// when the context does not know what is available
fn resource_feasibility(option: &DecisionOption, context: &DecisionContext) -> Option<f64> {
    let available = context.available_resources.as_ref()?;
    let feasibility = option
        .resource_requirements
        .iter()
        .filter(|(_, required)| **required > 0.0)
        .fold(1.0, |acc, (name, required)| {
            let have = available.get(name).copied().unwrap_or(0.0).max(0.0);
            if have < *required {
                acc * (have / required)
            } else {
                acc
            }
        });
    Some(feasibility)
}

/// Criterion weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaWeights {
    /// Weight of [`Criterion::FinancialImpact`]
    pub financial_impact: f64,
    /// Weight of [`Criterion::StrategicAlignment`]
    pub strategic_alignment: f64,
    /// Weight of [`Criterion::RiskLevel`]
    pub risk_level: f64,
    /// Weight of [`Criterion::StakeholderSatisfaction`]
    pub stakeholder_satisfaction: f64,
    /// Weight of [`Criterion::ImplementationFeasibility`]
    pub implementation_feasibility: f64,
    /// Weight of [`Criterion::LearningOpportunity`]
    pub learning_opportunity: f64,
}

impl Default for CriteriaWeights {
    fn default() -> Self {
        Self {
            financial_impact: 0.25,
            strategic_alignment: 0.20,
            risk_level: 0.20,
            stakeholder_satisfaction: 0.15,
            implementation_feasibility: 0.10,
            learning_opportunity: 0.10,
        }
    }
}

impl CriteriaWeights {
    /// Weight for `criterion`
    #[must_use]
    pub fn weight(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::FinancialImpact => self.financial_impact,
            Criterion::StrategicAlignment => self.strategic_alignment,
            Criterion::RiskLevel => self.risk_level,
            Criterion::StakeholderSatisfaction => self.stakeholder_satisfaction,
            Criterion::ImplementationFeasibility => self.implementation_feasibility,
            Criterion::LearningOpportunity => self.learning_opportunity,
        }
    }

    /// Sum of all weights
    #[must_use]
    pub fn total(&self) -> f64 {
        Criterion::ALL.iter().map(|c| self.weight(*c)).sum()
    }

    /// Check every weight is finite and non-negative with a positive total
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first bad weight
    pub fn validate(&self) -> CoreResult<()> {
        for criterion in Criterion::ALL {
            let w = self.weight(criterion);
            if !w.is_finite() || w < 0.0 {
                return Err(CoreError::invalid(
                    format!("weights.{criterion}"),
                    "must be a finite, non-negative number",
                ));
            }
        }
        if self.total() <= 0.0 {
            return Err(CoreError::invalid("weights", "at least one weight must be > 0"));
        }
        Ok(())
    }

    /// Shift weight toward caution when outcomes are poor and toward
    /// exploration when they are good. Returns whether anything changed.
    pub fn adapt(&mut self, success_rate: f64) -> bool {
        let before = *self;
        if success_rate < 0.7 {
            self.risk_level = (self.risk_level + 0.05).min(0.4);
            self.implementation_feasibility = (self.implementation_feasibility + 0.05).min(0.2);
        } else if success_rate > 0.85 {
            self.learning_opportunity = (self.learning_opportunity + 0.02).min(0.15);
        }
        *self != before
    }
}
