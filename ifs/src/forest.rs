//! Thin configuration layer over the `randomforest` crate.
//!
//! Tree construction, splitting and prediction are entirely delegated; this
//! module only shuttles rows into the library's table format.

use std::num::NonZeroUsize;

use anyhow::{anyhow, ensure, Context, Result};
use randomforest::criterion::Mse;
use randomforest::table::TableBuilder;
use randomforest::{RandomForestRegressor, RandomForestRegressorOptions};

/// Configuration of a delegated regression forest.
#[derive(Clone, Debug)]
pub struct ForestOptions {
    /// Number of trees in the ensemble.
    pub trees: usize,
    /// Features considered per split; the library default (all) when `None`.
    pub max_features: Option<usize>,
    /// Build trees on all available cores.
    pub parallel: bool,
    pub seed: u64,
}

impl Default for ForestOptions {
    fn default() -> Self {
        Self {
            trees: 50,
            max_features: None,
            parallel: true,
            seed: 0x5eed,
        }
    }
}

/// Fits a regression forest on `rows` against `targets`.
pub fn fit_regressor(
    rows: &[Vec<f64>],
    targets: &[f64],
    options: &ForestOptions,
) -> Result<RandomForestRegressor> {
    ensure!(!rows.is_empty(), "cannot fit a forest on an empty dataset");
    ensure!(
        rows.len() == targets.len(),
        "row count {} does not match target count {}",
        rows.len(),
        targets.len()
    );

    let mut builder = TableBuilder::new();
    for (row, &target) in rows.iter().zip(targets) {
        builder
            .add_row(row, target)
            .map_err(|e| anyhow!("table row rejected: {e}"))?;
    }
    let table = builder.build().map_err(|e| anyhow!("table build failed: {e}"))?;

    let mut forest_options = RandomForestRegressorOptions::new();
    forest_options.trees(NonZeroUsize::new(options.trees).context("tree count must be non-zero")?);
    if let Some(max_features) = options.max_features {
        forest_options
            .max_features(NonZeroUsize::new(max_features).context("max_features must be non-zero")?);
    }
    if options.parallel {
        forest_options.parallel();
    }
    forest_options.seed(options.seed);

    Ok(forest_options.fit(Mse, table))
}

/// Mean squared error of predictions against ground truth.
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    assert_eq!(y_true.len(), y_pred.len());
    assert!(!y_true.is_empty());
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>()
        / y_true.len() as f64
}

/// Coefficient of determination; 0.0 when the targets carry no variance.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    assert_eq!(y_true.len(), y_pred.len());
    assert!(!y_true.is_empty());
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean) * (t - mean)).sum();
    if ss_tot <= f64::EPSILON {
        return 0.0;
    }
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_and_predict_constant_target() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let targets = vec![3.0; 40];
        let regressor = fit_regressor(&rows, &targets, &ForestOptions::default()).unwrap();
        let prediction = regressor.predict(&[5.0, 5.0]);
        assert!((prediction - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rejects_empty_and_mismatched_input() {
        assert!(fit_regressor(&[], &[], &ForestOptions::default()).is_err());
        let rows = vec![vec![1.0], vec![2.0]];
        assert!(fit_regressor(&rows, &[1.0], &ForestOptions::default()).is_err());
    }

    #[test]
    fn test_r2_score_of_perfect_prediction() {
        let y = [1.0, 2.0, 3.0, 4.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_r2_score_of_mean_prediction_is_zero() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let mean = [2.5; 4];
        assert!(r2_score(&y, &mean).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mse() {
        assert!((mse(&[1.0, 2.0], &[1.0, 4.0]) - 2.0).abs() < f64::EPSILON);
    }
}
