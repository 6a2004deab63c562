//! Candidate options.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use vigil_core::{CoreError, CoreResult};

/// One course of action the engine may choose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    /// Caller-supplied identifier
    pub id: String,
    /// Human readable summary
    #[serde(default)]
    pub description: String,
    /// Metric name to expected delta (roughly `[-1, 1]`)
    #[serde(default)]
    pub expected_outcomes: IndexMap<String, f64>,
    /// Resource name to required amount
    #[serde(default)]
    pub resource_requirements: IndexMap<String, f64>,
    /// Probability-like risk in `[0, 1]`
    pub risk_level: f64,
    /// Confidence in the expected outcomes, `[0, 1]`
    pub confidence: f64,
    /// Implementation complexity, `[0, 1]`
    pub implementation_complexity: f64,
    /// Stakeholder alignment, `[0, 1]`
    pub stakeholder_alignment: f64,
}

impl DecisionOption {
    /// Option with every scalar at the midpoint
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected_outcomes: IndexMap::new(),
            resource_requirements: IndexMap::new(),
            risk_level: 0.5,
            confidence: 0.5,
            implementation_complexity: 0.5,
            stakeholder_alignment: 0.5,
        }
    }

    /// Add an expected outcome
    #[must_use]
    pub fn with_outcome(mut self, metric: impl Into<String>, delta: f64) -> Self {
        self.expected_outcomes.insert(metric.into(), delta);
        self
    }

    /// Add a resource requirement
    #[must_use]
    pub fn with_resource(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.resource_requirements.insert(name.into(), amount);
        self
    }

    /// Set risk
    #[must_use]
    pub fn with_risk(mut self, risk: f64) -> Self {
        self.risk_level = risk;
        self
    }

    /// Set confidence
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set complexity
    #[must_use]
    pub fn with_complexity(mut self, complexity: f64) -> Self {
        self.implementation_complexity = complexity;
        self
    }

    /// Set stakeholder alignment
    #[must_use]
    pub fn with_alignment(mut self, alignment: f64) -> Self {
        self.stakeholder_alignment = alignment;
        self
    }

    /// Check identifier and unit-interval fields
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first bad field
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::invalid("option.id", "must not be empty"));
        }
        let scalars = [
            ("risk_level", self.risk_level),
            ("confidence", self.confidence),
            ("implementation_complexity", self.implementation_complexity),
            ("stakeholder_alignment", self.stakeholder_alignment),
        ];
        for (field, value) in scalars {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CoreError::invalid(
                    format!("option.{field}"),
                    format!("{value} is outside [0, 1] for option {}", self.id),
                ));
            }
        }
        let vectors = self
            .expected_outcomes
            .iter()
            .chain(self.resource_requirements.iter());
        for (name, value) in vectors {
            if !value.is_finite() {
                return Err(CoreError::invalid(
                    format!("option.{name}"),
                    format!("non-finite value for option {}", self.id),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        let opt = DecisionOption::new("a", "do a")
            .with_risk(0.0)
            .with_confidence(1.0)
            .with_outcome("revenue", -0.4);
        assert!(opt.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(DecisionOption::new(" ", "").validate().is_err());
        assert!(DecisionOption::new("a", "").with_risk(1.5).validate().is_err());
        assert!(DecisionOption::new("a", "").with_confidence(f64::NAN).validate().is_err());
        assert!(DecisionOption::new("a", "")
            .with_resource("cpu", f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn test_deserialize_requires_scalars() {
        let ok: Result<DecisionOption, _> = serde_json::from_str(
            r#"{"id": "a", "risk_level": 0.1, "confidence": 0.9,
                "implementation_complexity": 0.3, "stakeholder_alignment": 0.8}"#,
        );
        assert!(ok.is_ok());
        let missing: Result<DecisionOption, _> = serde_json::from_str(r#"{"id": "a"}"#);
        assert!(missing.is_err());
    }
}
