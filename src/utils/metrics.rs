//! Metrics Module for Ordinal Grading
//!
//! Regression scores are judged by quadratic weighted Cohen's kappa after
//! rounding to the nearest grade, plus the mean squared error used as loss.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Summary of one evaluation pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Number of samples evaluated
    pub samples: usize,
    /// Mean squared error between scores and labels
    pub mse: f64,
    /// Quadratic weighted kappa of rounded scores against labels
    pub kappa: f64,
}

impl RegressionMetrics {
    /// Compute metrics from raw scores and float labels
    pub fn from_scores(scores: &[f32], labels: &[f32]) -> Self {
        let rounded = round_half_even(scores);
        let targets = round_half_even(labels);

        Self {
            samples: scores.len().min(labels.len()),
            mse: mean_squared_error(scores, labels),
            kappa: quadratic_weighted_kappa(&rounded, &targets),
        }
    }
}

/// Round every score to the nearest integer, ties to even
pub fn round_half_even(values: &[f32]) -> Vec<i64> {
    values.iter().map(|v| v.round_ties_even() as i64).collect()
}

/// Mean squared error over paired values (0 for empty input)
pub fn mean_squared_error(predictions: &[f32], targets: &[f32]) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }

    let sum: f64 = predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| {
            let d = *p as f64 - *t as f64;
            d * d
        })
        .sum();

    sum / n as f64
}

/// Quadratic weighted Cohen's kappa between two ratings
///
/// The label set is the sorted union of both ratings; weights are the squared
/// distance between label indices. Returns 1.0 when there is no possible
/// disagreement and the ratings agree, 0.0 for empty input.
pub fn quadratic_weighted_kappa(rater_a: &[i64], rater_b: &[i64]) -> f64 {
    let n = rater_a.len().min(rater_b.len());
    if n == 0 {
        return 0.0;
    }

    let labels: Vec<i64> = rater_a[..n]
        .iter()
        .chain(&rater_b[..n])
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let k = labels.len();
    let index_of = |v: i64| labels.binary_search(&v).unwrap_or(0);

    let mut observed = vec![vec![0.0f64; k]; k];
    let mut hist_a = vec![0.0f64; k];
    let mut hist_b = vec![0.0f64; k];

    for (a, b) in rater_a[..n].iter().zip(&rater_b[..n]) {
        let i = index_of(*a);
        let j = index_of(*b);
        observed[i][j] += 1.0;
        hist_a[i] += 1.0;
        hist_b[j] += 1.0;
    }

    let mut weighted_observed = 0.0;
    let mut weighted_expected = 0.0;
    for i in 0..k {
        for j in 0..k {
            let weight = ((i as f64) - (j as f64)).powi(2);
            weighted_observed += weight * observed[i][j];
            weighted_expected += weight * hist_a[i] * hist_b[j] / n as f64;
        }
    }

    if weighted_expected == 0.0 {
        return if weighted_observed == 0.0 { 1.0 } else { 0.0 };
    }

    1.0 - weighted_observed / weighted_expected
}
