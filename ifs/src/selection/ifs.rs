//! Iterative feature selection against the reward column.
//!
//! Greedy forward selection: each round one forest is fit over the selected
//! columns plus all remaining candidates, the candidates are ranked by
//! permutation relevance on a held-out split, and the top of the ranking is
//! admitted when it buys enough additional R². Forest fitting itself is
//! delegated to the regression library.

use anyhow::{bail, ensure, Result};
use itertools::Itertools;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;

use crate::forest::{self, ForestOptions};

/// Parameters of the iterative feature selection procedure.
#[derive(Clone, Debug)]
pub struct IfsOptions {
    /// Trees per ranking/evaluation forest.
    pub n_estimators: usize,
    /// Features admitted per round.
    pub n_features_step: usize,
    /// Required R² gain per round, as a percentage of the still unexplained
    /// variance.
    pub significance: f64,
    /// Standardize feature columns before fitting.
    pub scale: bool,
    /// Parallel tree construction in the delegated forest.
    pub parallel: bool,
    pub seed: u64,
}

impl Default for IfsOptions {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            n_features_step: 1,
            significance: 1.0,
            scale: true,
            parallel: true,
            seed: 0x1f5,
        }
    }
}

/// Outcome of one [Ifs::fit] run.
#[derive(Clone, Debug)]
pub struct IfsReport {
    /// Boolean mask over all input columns; selected columns are `true`.
    pub support: Vec<bool>,
    /// R² of the selected set after the preload round and each admission.
    pub round_scores: Vec<f64>,
    pub n_selected: usize,
}

pub struct Ifs {
    options: IfsOptions,
    support: Option<Vec<bool>>,
}

impl Ifs {
    pub fn new(options: IfsOptions) -> Self {
        Self {
            options,
            support: None,
        }
    }

    /// Greedy forward selection of the columns of `fa` against `r`.
    ///
    /// `preload_features` are admitted unconditionally before the first
    /// round, so the first reported score is the variance explained by the
    /// preloaded set alone.
    pub fn fit(
        &mut self,
        fa: ArrayView2<f64>,
        r: ArrayView1<f64>,
        preload_features: &[usize],
    ) -> Result<IfsReport> {
        let n_cols = fa.ncols();
        ensure!(n_cols > 0, "FA matrix has no columns");
        ensure!(
            fa.nrows() == r.len(),
            "FA row count {} does not match R length {}",
            fa.nrows(),
            r.len()
        );
        ensure!(
            fa.nrows() >= 5,
            "need at least 5 samples for a holdout split, got {}",
            fa.nrows()
        );
        ensure!(
            preload_features.iter().all(|&c| c < n_cols),
            "preload feature index out of range"
        );
        ensure!(self.options.n_features_step > 0, "n_features_step must be positive");

        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let data = if self.options.scale {
            standardize_columns(&fa)
        } else {
            fa.to_owned()
        };
        let (train_idx, eval_idx) = split_indices(data.nrows(), &mut rng);

        let forest_options = ForestOptions {
            trees: self.options.n_estimators,
            max_features: None,
            parallel: self.options.parallel,
            seed: self.options.seed,
        };

        let mut selected = vec![false; n_cols];
        for &c in preload_features {
            selected[c] = true;
        }

        let mut score = if selected.iter().any(|&s| s) {
            evaluate(&data, &r, &selected, &train_idx, &eval_idx, &forest_options)?
        } else {
            0.0
        };
        let mut round_scores = vec![score];
        log::info!(
            "IFS: R2 {:.4} with {} preloaded features",
            score,
            preload_features.len()
        );

        loop {
            let candidates = (0..n_cols).filter(|&c| !selected[c]).collect_vec();
            if candidates.is_empty() {
                break;
            }

            let ranked = rank_candidates(
                &data,
                &r,
                &selected,
                &candidates,
                &train_idx,
                &eval_idx,
                &forest_options,
                &mut rng,
            )?;
            let step = self.options.n_features_step.min(ranked.len());
            let admitted = ranked[..step].iter().map(|&(c, _)| c).collect_vec();

            let mut trial = selected.clone();
            for &c in &admitted {
                trial[c] = true;
            }
            let trial_score =
                evaluate(&data, &r, &trial, &train_idx, &eval_idx, &forest_options)?;

            let min_gain = self.options.significance / 100.0 * (1.0 - score).max(0.0);
            if trial_score - score < min_gain {
                log::debug!(
                    "IFS: stopping, R2 gain {:.4} below threshold {:.4}",
                    trial_score - score,
                    min_gain
                );
                break;
            }

            log::info!(
                "IFS: admitted columns [{}], R2 {:.4} -> {:.4}",
                admitted.iter().join(", "),
                score,
                trial_score
            );
            selected = trial;
            score = trial_score;
            round_scores.push(score);
        }

        let n_selected = selected.iter().filter(|&&s| s).count();
        self.support = Some(selected.clone());
        Ok(IfsReport {
            support: selected,
            round_scores,
            n_selected,
        })
    }

    /// Mask over all input columns, from the last [Self::fit] run.
    pub fn support(&self) -> Result<&[bool]> {
        match &self.support {
            Some(mask) => Ok(mask),
            None => bail!("support is only available after fit"),
        }
    }
}

fn standardize_columns(fa: &ArrayView2<f64>) -> Array2<f64> {
    let mut data = fa.to_owned();
    for mut column in data.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        let std = column.std(0.0);
        if std > f64::EPSILON {
            column.mapv_inplace(|v| (v - mean) / std);
        } else {
            column.mapv_inplace(|v| v - mean);
        }
    }
    data
}

/// Seeded shuffle split; one fifth (at least one sample) is held out for
/// scoring and candidate ranking.
fn split_indices(n: usize, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let mut indices = (0..n).collect_vec();
    indices.shuffle(rng);
    let n_eval = (n / 5).max(1);
    (indices[n_eval..].to_vec(), indices[..n_eval].to_vec())
}

fn collect_rows(data: &Array2<f64>, mask: &[bool], indices: &[usize]) -> Vec<Vec<f64>> {
    indices
        .iter()
        .map(|&i| {
            let row = data.row(i);
            mask.iter()
                .enumerate()
                .filter(|&(_, &keep)| keep)
                .map(|(c, _)| row[c])
                .collect()
        })
        .collect()
}

fn collect_targets(r: &ArrayView1<f64>, indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| r[i]).collect()
}

/// R² of a forest fit on the masked training rows, scored on the holdout.
fn evaluate(
    data: &Array2<f64>,
    r: &ArrayView1<f64>,
    mask: &[bool],
    train_idx: &[usize],
    eval_idx: &[usize],
    forest_options: &ForestOptions,
) -> Result<f64> {
    let regressor = forest::fit_regressor(
        &collect_rows(data, mask, train_idx),
        &collect_targets(r, train_idx),
        forest_options,
    )?;
    let eval_rows = collect_rows(data, mask, eval_idx);
    let predictions = eval_rows.iter().map(|row| regressor.predict(row)).collect_vec();
    Ok(forest::r2_score(&collect_targets(r, eval_idx), &predictions))
}

/// Ranks `candidates` by permutation relevance, descending.
///
/// One forest is fit over selected plus candidate columns; a candidate's
/// relevance is the holdout MSE increase when its column is shuffled.
#[allow(clippy::too_many_arguments)]
fn rank_candidates(
    data: &Array2<f64>,
    r: &ArrayView1<f64>,
    selected: &[bool],
    candidates: &[usize],
    train_idx: &[usize],
    eval_idx: &[usize],
    forest_options: &ForestOptions,
    rng: &mut StdRng,
) -> Result<Vec<(usize, f64)>> {
    let mut mask = selected.to_vec();
    for &c in candidates {
        mask[c] = true;
    }
    let columns = mask
        .iter()
        .enumerate()
        .filter(|&(_, &keep)| keep)
        .map(|(c, _)| c)
        .collect_vec();

    let regressor = forest::fit_regressor(
        &collect_rows(data, &mask, train_idx),
        &collect_targets(r, train_idx),
        forest_options,
    )?;

    let eval_rows = collect_rows(data, &mask, eval_idx);
    let eval_targets = collect_targets(r, eval_idx);
    let baseline_predictions = eval_rows.iter().map(|row| regressor.predict(row)).collect_vec();
    let baseline = forest::mse(&eval_targets, &baseline_predictions);

    let mut ranked = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        let slot = columns
            .iter()
            .position(|&c| c == candidate)
            .expect("candidate column is part of the fitted mask");
        let mut permuted = eval_rows.clone();
        let mut column_values = permuted.iter().map(|row| row[slot]).collect_vec();
        column_values.shuffle(rng);
        for (row, value) in permuted.iter_mut().zip(column_values) {
            row[slot] = value;
        }
        let predictions = permuted.iter().map(|row| regressor.predict(row)).collect_vec();
        ranked.push((candidate, forest::mse(&eval_targets, &predictions) - baseline));
    }
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(ranked)
}
