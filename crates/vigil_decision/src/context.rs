//! Decision context and its analysis.
//!
//! A [`DecisionContext`] is an immutable snapshot built once per decision
//! cycle. [`ContextAnalysis::analyze`] reduces it to the handful of signals
//! the scoring needs. Every signal is an `Option`: a missing input yields
//! `None` and the caller picks the fallback, normally [`NEUTRAL`].

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Value used when a signal is unavailable
pub const NEUTRAL: f64 = 0.5;

/// Number of most recent outcomes used for the trend
const TREND_WINDOW: usize = 10;

/// Market risk signals, each in `[0, 1]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConditions {
    /// Price volatility
    pub price_volatility: Option<f64>,
    /// Volume volatility
    pub volume_volatility: Option<f64>,
    /// Sentiment volatility
    pub sentiment_volatility: Option<f64>,
}

/// Inputs to the risk tolerance estimate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskAssessment {
    /// Current health as seen by risk owners
    pub ecosystem_health: Option<f64>,
    /// Recent performance
    pub recent_performance: Option<f64>,
    /// Appetite for risk among stakeholders
    pub stakeholder_risk_appetite: Option<f64>,
}

/// Preferences of one stakeholder group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakeholderPreference {
    /// Satisfaction in `[0, 1]`
    pub satisfaction_level: Option<f64>,
}

/// How a past decision turned out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Met its goals
    Success,
    /// Did not
    Failure,
    /// Not evaluated yet
    #[default]
    Unknown,
}

/// One past decision outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalOutcome {
    /// Option that was chosen
    pub option_id: Option<String>,
    /// Result
    pub outcome: OutcomeKind,
    /// Measured performance in `[0, 1]`
    pub performance_score: Option<f64>,
}

impl HistoricalOutcome {
    /// Outcome for `option_id`
    #[must_use]
    pub fn new(option_id: impl Into<String>, outcome: OutcomeKind) -> Self {
        Self {
            option_id: Some(option_id.into()),
            outcome,
            performance_score: None,
        }
    }

    /// Set the measured performance
    #[must_use]
    pub fn with_performance(mut self, score: f64) -> Self {
        self.performance_score = Some(score);
        self
    }
}

/// Snapshot of everything a decision may look at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionContext {
    /// Named health factors (e.g. `overall_health`), each in `[0, 1]`
    pub ecosystem_state: IndexMap<String, f64>,
    /// Market signals
    pub market_conditions: MarketConditions,
    /// Stakeholder group to preferences
    pub stakeholder_preferences: IndexMap<String, StakeholderPreference>,
    /// Risk signals
    pub risk_assessment: RiskAssessment,
    /// Past outcomes, oldest first
    pub historical_performance: Vec<HistoricalOutcome>,
    /// Resource name to available amount; `None` when unknown
    pub available_resources: Option<IndexMap<String, f64>>,
    /// Point in time the decision must be implemented by
    pub deadline: Option<DateTime<Utc>>,
}

impl DecisionContext {
    /// Empty context; every signal falls back to neutral
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a health factor
    #[must_use]
    pub fn with_health_factor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.ecosystem_state.insert(name.into(), value);
        self
    }

    /// Set market conditions
    #[must_use]
    pub fn with_market(mut self, market: MarketConditions) -> Self {
        self.market_conditions = market;
        self
    }

    /// Add a stakeholder group
    #[must_use]
    pub fn with_stakeholder(mut self, group: impl Into<String>, satisfaction: f64) -> Self {
        self.stakeholder_preferences.insert(
            group.into(),
            StakeholderPreference {
                satisfaction_level: Some(satisfaction),
            },
        );
        self
    }

    /// Set risk signals
    #[must_use]
    pub fn with_risk(mut self, risk: RiskAssessment) -> Self {
        self.risk_assessment = risk;
        self
    }

    /// Append a past outcome
    #[must_use]
    pub fn with_outcome(mut self, outcome: HistoricalOutcome) -> Self {
        self.historical_performance.push(outcome);
        self
    }

    /// Declare an available resource amount
    #[must_use]
    pub fn with_resource(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.available_resources
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), amount);
        self
    }

    /// Set the deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Past outcomes recorded for `option_id`
    #[must_use]
    pub fn similar_decisions(&self, option_id: &str) -> usize {
        self.historical_performance
            .iter()
            .filter(|h| h.option_id.as_deref() == Some(option_id))
            .count()
    }
}

/// Direction of recent performance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTrend {
    /// Last score above the first of the window
    Improving,
    /// Last score at or below the first
    Declining,
    /// Too little data
    #[default]
    Stable,
}

/// Signals derived from a [`DecisionContext`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    /// Mean of the health factors
    pub ecosystem_health: Option<f64>,
    /// Mean of the market volatility signals
    pub market_volatility: Option<f64>,
    /// Mean stakeholder satisfaction
    pub stakeholder_alignment: Option<f64>,
    /// 0.4 health + 0.3 recent performance + 0.3 appetite
    pub risk_tolerance: Option<f64>,
    /// Urgency derived from the deadline
    pub urgency: Option<f64>,
    /// Fraction of past outcomes that succeeded
    pub success_rate: Option<f64>,
    /// Mean recorded performance
    pub average_performance: Option<f64>,
    /// Direction over the last outcomes
    pub trend: PerformanceTrend,
    /// Number of past outcomes
    pub total_decisions: usize,
}

impl ContextAnalysis {
    /// Reduce `context` to scoring signals as of `now`
    #[must_use]
    pub fn analyze(context: &DecisionContext, now: DateTime<Utc>) -> Self {
        let history = &context.historical_performance;
        Self {
            ecosystem_health: mean(context.ecosystem_state.values().copied()),
            market_volatility: mean(
                [
                    context.market_conditions.price_volatility,
                    context.market_conditions.volume_volatility,
                    context.market_conditions.sentiment_volatility,
                ]
                .into_iter()
                .flatten(),
            ),
            stakeholder_alignment: mean(
                context
                    .stakeholder_preferences
                    .values()
                    .filter_map(|p| p.satisfaction_level),
            ),
            risk_tolerance: risk_tolerance(&context.risk_assessment),
            urgency: context.deadline.map(|d| urgency(d - now)),
            success_rate: (!history.is_empty()).then(|| {
                let wins = history
                    .iter()
                    .filter(|h| h.outcome == OutcomeKind::Success)
                    .count();
                wins as f64 / history.len() as f64
            }),
            average_performance: mean(history.iter().filter_map(|h| h.performance_score)),
            trend: trend(history),
            total_decisions: history.len(),
        }
    }

    /// Health with neutral fallback
    #[must_use]
    pub fn health(&self) -> f64 {
        self.ecosystem_health.unwrap_or(NEUTRAL)
    }

    /// Volatility with neutral fallback
    #[must_use]
    pub fn volatility(&self) -> f64 {
        self.market_volatility.unwrap_or(NEUTRAL)
    }

    /// Stakeholder alignment with neutral fallback
    #[must_use]
    pub fn alignment(&self) -> f64 {
        self.stakeholder_alignment.unwrap_or(NEUTRAL)
    }

    /// Risk tolerance with neutral fallback
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.risk_tolerance.unwrap_or(NEUTRAL)
    }

    /// Urgency with neutral fallback
    #[must_use]
    pub fn urgency_level(&self) -> f64 {
        self.urgency.unwrap_or(NEUTRAL)
    }

    /// Historical success rate with neutral fallback
    #[must_use]
    pub fn historical_success(&self) -> f64 {
        self.success_rate.unwrap_or(NEUTRAL)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn risk_tolerance(risk: &RiskAssessment) -> Option<f64> {
    if risk.ecosystem_health.is_none()
        && risk.recent_performance.is_none()
        && risk.stakeholder_risk_appetite.is_none()
    {
        return None;
    }
    let tolerance = risk.ecosystem_health.unwrap_or(NEUTRAL) * 0.4
        + risk.recent_performance.unwrap_or(NEUTRAL) * 0.3
        + risk.stakeholder_risk_appetite.unwrap_or(NEUTRAL) * 0.3;
    Some(tolerance.clamp(0.0, 1.0))
}

/// Less time left means more urgency; a passed deadline is maximal
fn urgency(remaining: Duration) -> f64 {
    if remaining <= Duration::hours(1) {
        1.0
    } else if remaining <= Duration::hours(24) {
        0.8
    } else if remaining <= Duration::days(7) {
        0.6
    } else {
        0.3
    }
}

fn trend(history: &[HistoricalOutcome]) -> PerformanceTrend {
    let start = history.len().saturating_sub(TREND_WINDOW);
    let recent: Vec<f64> = history[start..]
        .iter()
        .map(|h| h.performance_score.unwrap_or(NEUTRAL))
        .collect();
    match (recent.first(), recent.last()) {
        (Some(first), Some(last)) if recent.len() >= 2 => {
            if last > first {
                PerformanceTrend::Improving
            } else {
                PerformanceTrend::Declining
            }
        }
        _ => PerformanceTrend::Stable,
    }
}
