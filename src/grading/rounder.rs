//! Ordinal rounding of regression scores
//!
//! A score becomes the number of thresholds it reaches, so four increasing
//! coefficients split the real line into five half-open grade intervals.
//! `OptimizedRounder` tunes the thresholds for quadratic weighted kappa
//! with a Nelder-Mead simplex search.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::error::{GradingError, Result};
use crate::utils::metrics::quadratic_weighted_kappa;

/// Default grade thresholds
pub const DEFAULT_COEFFICIENTS: [f32; 4] = [0.5, 1.5, 2.5, 3.5];

/// Fixed-threshold rounder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrdinalRounder {
    pub coefficients: [f32; 4],
}

impl Default for OrdinalRounder {
    fn default() -> Self {
        Self {
            coefficients: DEFAULT_COEFFICIENTS,
        }
    }
}

impl OrdinalRounder {
    pub fn new(coefficients: [f32; 4]) -> Self {
        Self { coefficients }
    }

    /// Grade every score; thresholds are inclusive and NaN maps to 0
    pub fn predict(&self, scores: &[f32]) -> Vec<i64> {
        predict_with(scores, &self.coefficients)
    }
}

fn predict_with(scores: &[f32], coefficients: &[f32]) -> Vec<i64> {
    scores
        .iter()
        .map(|&s| coefficients.iter().filter(|&&c| s >= c).count() as i64)
        .collect()
}

/// Nelder-Mead settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub max_iterations: usize,
    pub x_tolerance: f64,
    pub f_tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 800,
            x_tolerance: 1e-4,
            f_tolerance: 1e-4,
        }
    }
}

/// Threshold rounder fit to maximise kappa
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizedRounder {
    pub settings: OptimizerSettings,
}

impl OptimizedRounder {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Fit thresholds on `scores` against integer `labels`, starting from the defaults
    pub fn fit(&self, scores: &[f32], labels: &[i64]) -> Result<OrdinalRounder> {
        if scores.len() != labels.len() {
            return Err(GradingError::Dataset(format!(
                "Cannot fit rounder on {} scores and {} labels",
                scores.len(),
                labels.len()
            )));
        }
        if scores.is_empty() {
            return Err(GradingError::Dataset("Cannot fit rounder on no scores".into()));
        }

        let objective = |x: &[f64]| -> f64 {
            let coefficients = sorted_coefficients(x);
            -quadratic_weighted_kappa(&predict_with(scores, &coefficients), labels)
        };

        let start: Vec<f64> = DEFAULT_COEFFICIENTS.iter().map(|&c| c as f64).collect();
        let initial_kappa = -objective(&start);
        let (best, value, iterations) = nelder_mead(objective, &start, &self.settings);

        let coefficients = sorted_coefficients(&best);
        let mut fitted = DEFAULT_COEFFICIENTS;
        fitted.copy_from_slice(&coefficients);

        info!(
            "Rounder fit in {} iterations: kappa {:.4} -> {:.4}, thresholds {:?}",
            iterations, initial_kappa, -value, fitted
        );

        Ok(OrdinalRounder::new(fitted))
    }
}

fn sorted_coefficients(x: &[f64]) -> Vec<f32> {
    let mut c: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    c.sort_by(|a, b| a.total_cmp(b));
    c
}

/// Minimise `f` from `start`; returns (argmin, min, iterations)
fn nelder_mead<F>(f: F, start: &[f64], settings: &OptimizerSettings) -> (Vec<f64>, f64, usize)
where
    F: Fn(&[f64]) -> f64,
{
    const ALPHA: f64 = 1.0;
    const GAMMA: f64 = 2.0;
    const RHO: f64 = 0.5;
    const SIGMA: f64 = 0.5;

    let n = start.len();

    // initial simplex: perturb each coordinate by 5%
    let mut simplex: Vec<Vec<f64>> = vec![start.to_vec()];
    for i in 0..n {
        let mut point = start.to_vec();
        point[i] = if point[i] != 0.0 { point[i] * 1.05 } else { 0.00025 };
        simplex.push(point);
    }
    let mut values: Vec<f64> = simplex.iter().map(|p| f(p)).collect();

    let mut iterations = 0;
    while iterations < settings.max_iterations {
        iterations += 1;

        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let x_spread = simplex[1..]
            .iter()
            .flat_map(|p| p.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|v| (v - values[0]).abs())
            .fold(0.0, f64::max);
        if x_spread <= settings.x_tolerance && f_spread <= settings.f_tolerance {
            break;
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|p| p[j]).sum::<f64>() / n as f64)
            .collect();
        let along = |t: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&simplex[n])
                .map(|(c, w)| c + t * (w - c))
                .collect()
        };

        let reflected = along(-ALPHA);
        let f_reflected = f(&reflected);

        if f_reflected < values[0] {
            let expanded = along(-GAMMA);
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let c = along(-RHO);
            let fc = f(&c);
            (c, fc)
        } else {
            let c = along(RHO);
            let fc = f(&c);
            (c, fc)
        };

        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        // shrink towards the best point
        let best = simplex[0].clone();
        for i in 1..=n {
            simplex[i] = simplex[i]
                .iter()
                .zip(&best)
                .map(|(x, b)| b + SIGMA * (x - b))
                .collect();
            values[i] = f(&simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    debug!("Nelder-Mead stopped after {} iterations", iterations);

    (simplex[best].clone(), values[best], iterations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let rounder = OrdinalRounder::default();
        let scores = [-1.0, 0.49, 0.5, 1.4999, 1.5, 2.5, 3.49, 3.5, 10.0];
        assert_eq!(rounder.predict(&scores), vec![0, 0, 1, 1, 2, 3, 3, 4, 4]);
    }

    #[test]
    fn test_nan_maps_to_zero() {
        assert_eq!(OrdinalRounder::default().predict(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn test_monotonic() {
        let rounder = OrdinalRounder::default();
        let scores: Vec<f32> = (0..100).map(|i| i as f32 * 0.05 - 0.5).collect();
        let grades = rounder.predict(&scores);
        assert!(grades.windows(2).all(|w| w[0] <= w[1]));
        assert!(grades.iter().all(|g| (0..=4).contains(g)));
    }

    #[test]
    fn test_nelder_mead_quadratic() {
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2);
        let settings = OptimizerSettings {
            max_iterations: 2000,
            x_tolerance: 1e-8,
            f_tolerance: 1e-10,
        };
        let (best, value, _) = nelder_mead(f, &[0.5, 0.5], &settings);
        assert!((best[0] - 1.0).abs() < 1e-3);
        assert!((best[1] + 2.0).abs() < 1e-3);
        assert!(value < 1e-6);
    }

    #[test]
    fn test_fit_never_worse_than_defaults() {
        // scores systematically shifted up by 0.3
        let labels: Vec<i64> = (0..50).map(|i| i % 5).collect();
        let scores: Vec<f32> = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| l as f32 + 0.3 + ((i % 7) as f32 - 3.0) * 0.08)
            .collect();

        let baseline = quadratic_weighted_kappa(&OrdinalRounder::default().predict(&scores), &labels);

        let optimizer = OptimizedRounder::default();
        let fitted = optimizer.fit(&scores, &labels).unwrap();
        let tuned = quadratic_weighted_kappa(&fitted.predict(&scores), &labels);

        assert!(tuned >= baseline);
        let c = fitted.coefficients;
        assert!(c.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_fit_rejects_mismatch() {
        let optimizer = OptimizedRounder::default();
        assert!(optimizer.fit(&[1.0], &[1, 2]).is_err());
        assert!(optimizer.fit(&[], &[]).is_err());
    }
}
