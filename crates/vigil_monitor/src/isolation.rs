//! Isolation forest over one-dimensional samples.
//!
//! Points that random splits isolate in few steps score close to 1; the
//! `contamination` share of highest-scoring training points are outliers.
//! Seeded so a given input always yields the same verdicts.

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Forest parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees
    pub trees: usize,
    /// Sub-sample per tree, capped at the input size
    pub max_samples: usize,
    /// Expected outlier share in (0, 0.5]
    pub contamination: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf { size: usize },
    Split { at: f64, left: Box<Node>, right: Box<Node> },
}

/// A fitted forest
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit on `data`; `None` when it is empty
    #[must_use]
    pub fn fit(data: &[f64], config: &ForestConfig) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let sample_size = config.max_samples.clamp(1, data.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..config.trees.max(1))
            .map(|_| {
                let mut points: Vec<f64> = sample(&mut rng, data.len(), sample_size)
                    .into_iter()
                    .map(|i| data[i])
                    .collect();
                grow(&mut points, 0, height_limit, &mut rng)
            })
            .collect();
        Some(Self { trees, sample_size })
    }

    /// Anomaly score of `x` in (0, 1]
    #[must_use]
    pub fn score(&self, x: f64) -> f64 {
        let mean_path =
            self.trees.iter().map(|t| path_length(t, x, 0)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path(self.sample_size);
        if norm <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / norm)
    }

    /// Fit on `data` and flag its outliers
    #[must_use]
    pub fn fit_predict(data: &[f64], config: &ForestConfig) -> Vec<bool> {
        let Some(forest) = Self::fit(data, config) else {
            return Vec::new();
        };
        let scores: Vec<f64> = data.iter().map(|x| forest.score(*x)).collect();
        let threshold = percentile(&scores, 1.0 - config.contamination.clamp(0.0, 0.5));
        scores.iter().map(|s| *s > threshold).collect()
    }
}

fn grow(points: &mut [f64], depth: usize, limit: usize, rng: &mut ChaCha8Rng) -> Node {
    if depth >= limit || points.len() <= 1 {
        return Node::Leaf { size: points.len() };
    }
    let (min, max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    if !min.is_finite() || !max.is_finite() || min >= max {
        return Node::Leaf { size: points.len() };
    }
    let at = rng.gen_range(min..max);
    let split = partition(points, at);
    let (left, right) = points.split_at_mut(split);
    Node::Split {
        at,
        left: Box::new(grow(left, depth + 1, limit, rng)),
        right: Box::new(grow(right, depth + 1, limit, rng)),
    }
}

/// Move values below `at` to the front; returns how many there are
fn partition(points: &mut [f64], at: f64) -> usize {
    let mut next = 0;
    for i in 0..points.len() {
        if points[i] < at {
            points.swap(i, next);
            next += 1;
        }
    }
    next
}

fn path_length(node: &Node, x: f64, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path(*size),
        Node::Split { at, left, right } => {
            let next = if x < *at { left } else { right };
            path_length(next, x, depth + 1)
        }
    }
}

/// Average unsuccessful-search path length in a BST of `n` nodes
fn average_path(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in [0, 1]
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Z-scores of `values`; all zero when they do not vary
#[must_use]
pub fn standardize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 || !std.is_finite() {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wobble(n: usize) -> Vec<f64> {
        (0..n).map(|i| 50.0 + (i % 7) as f64 * 0.5).collect()
    }

    #[test]
    fn test_spike_is_flagged() {
        let mut data = wobble(49);
        data.push(400.0);
        let flags = IsolationForest::fit_predict(&standardize(&data), &ForestConfig::default());
        assert_eq!(flags.len(), 50);
        assert!(flags[49]);
        assert!(flags.iter().filter(|f| **f).count() <= 6);
    }

    #[test]
    fn test_deterministic() {
        let mut data = wobble(60);
        data[30] = -80.0;
        let config = ForestConfig::default();
        assert_eq!(
            IsolationForest::fit_predict(&data, &config),
            IsolationForest::fit_predict(&data, &config)
        );
    }

    #[test]
    fn test_constant_input_has_no_outliers() {
        let data = vec![3.0; 50];
        let flags = IsolationForest::fit_predict(&standardize(&data), &ForestConfig::default());
        assert!(flags.iter().all(|f| !f));
    }

    #[test]
    fn test_empty() {
        assert!(IsolationForest::fit(&[], &ForestConfig::default()).is_none());
        assert!(IsolationForest::fit_predict(&[], &ForestConfig::default()).is_empty());
    }

    #[test]
    fn test_average_path() {
        assert_eq!(average_path(1), 0.0);
        assert_eq!(average_path(2), 1.0);
        assert!((average_path(256) - 10.244).abs() < 0.01);
    }

    proptest! {
        #[test]
        fn prop_scores_in_unit_interval(data in prop::collection::vec(-1e3f64..1e3, 1..80)) {
            let forest = IsolationForest::fit(&data, &ForestConfig { trees: 10, ..ForestConfig::default() }).unwrap();
            for x in &data {
                let s = forest.score(*x);
                prop_assert!(s > 0.0 && s <= 1.0);
            }
        }
    }
}
