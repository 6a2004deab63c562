//! Resource requirements declared by tasks.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Amounts a task needs from named resource pools while it runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRequirements {
    amounts: IndexMap<String, u64>,
}

impl ResourceRequirements {
    /// No requirements
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `amount` units of `pool`; repeated pools accumulate
    #[must_use]
    pub fn with(mut self, pool: impl Into<String>, amount: u64) -> Self {
        *self.amounts.entry(pool.into()).or_insert(0) += amount;
        self
    }

    /// Build from fractional amounts, rounding each up to a whole unit.
    /// Non-positive and non-finite amounts are dropped.
    #[must_use]
    pub fn from_fractional<'a>(amounts: impl IntoIterator<Item = (&'a String, &'a f64)>) -> Self {
        let amounts = amounts
            .into_iter()
            .filter(|(_, v)| v.is_finite() && **v > 0.0)
            .map(|(k, v)| (k.clone(), v.ceil() as u64))
            .collect();
        Self { amounts }
    }

    /// Amount required from `pool`
    #[must_use]
    pub fn get(&self, pool: &str) -> u64 {
        self.amounts.get(pool).copied().unwrap_or(0)
    }

    /// Iterate `(pool, amount)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.amounts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Whether nothing is required
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amounts.values().all(|v| *v == 0)
    }

    /// Number of pools named
    #[must_use]
    pub fn len(&self) -> usize {
        self.amounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_accumulate() {
        let req = ResourceRequirements::new().with("cpu", 10).with("cpu", 5).with("memory", 1);
        assert_eq!(req.get("cpu"), 15);
        assert_eq!(req.get("memory"), 1);
        assert_eq!(req.get("disk"), 0);
        assert_eq!(req.len(), 2);
    }

    #[test]
    fn test_from_fractional_rounds_up() {
        let mut raw = IndexMap::new();
        raw.insert("cpu".to_string(), 2.1);
        raw.insert("budget".to_string(), -4.0);
        raw.insert("memory".to_string(), f64::NAN);
        let req = ResourceRequirements::from_fractional(&raw);
        assert_eq!(req.get("cpu"), 3);
        assert_eq!(req.len(), 1);
    }

    #[test]
    fn test_empty() {
        assert!(ResourceRequirements::new().is_empty());
        assert!(ResourceRequirements::new().with("cpu", 0).is_empty());
        assert!(!ResourceRequirements::new().with("cpu", 1).is_empty());
    }
}
