//! Fitted-Q-Iteration on feature-space transitions.

use anyhow::{bail, ensure, Result};
use randomforest::RandomForestRegressor;

use crate::dataset::FeatureDataset;
use crate::forest::{self, ForestOptions};
use crate::prelude::ActionValue;

/// Parameters of the fitted-Q estimator.
#[derive(Clone, Debug)]
pub struct FqiParameter {
    /// Discount factor for future rewards.
    pub gamma: f64,
    /// Number of Bellman regression iterations.
    pub iterations: usize,
    /// The discrete action set the estimator ranges over.
    pub discrete_actions: Vec<ActionValue>,
    /// Configuration of the delegated regression forest.
    pub forest: ForestOptions,
}

impl Default for FqiParameter {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            iterations: 10,
            discrete_actions: vec![0, 1, 2, 3],
            forest: ForestOptions::default(),
        }
    }
}

/// Approximates the action-value function by iterated forest regression.
///
/// Each iteration fits a fresh forest on `(state features ++ action)` rows
/// against the Bellman-updated targets; tree fitting itself is delegated to
/// the regression library.
pub struct Fqi {
    param: FqiParameter,
    state_dim: usize,
    estimator: Option<RandomForestRegressor>,
}

impl Fqi {
    pub fn new(param: FqiParameter, state_dim: usize) -> Self {
        Self {
            param,
            state_dim,
            estimator: None,
        }
    }

    pub fn param(&self) -> &FqiParameter {
        &self.param
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn is_fitted(&self) -> bool {
        self.estimator.is_some()
    }

    pub fn fit(&mut self, dataset: &FeatureDataset) -> Result<()> {
        ensure!(
            dataset.state_dim() == self.state_dim,
            "dataset state dimension {} does not match estimator dimension {}",
            dataset.state_dim(),
            self.state_dim
        );
        ensure!(!dataset.is_empty(), "cannot fit FQI on an empty dataset");
        ensure!(
            !self.param.discrete_actions.is_empty(),
            "discrete action set is empty"
        );
        ensure!(self.param.iterations > 0, "iteration count must be positive");

        let transitions = dataset.transitions();
        let rows: Vec<Vec<f64>> = transitions
            .iter()
            .map(|t| {
                let mut row = t.features.clone();
                row.push(t.action as f64);
                row
            })
            .collect();
        let mut targets: Vec<f64> = transitions.iter().map(|t| t.reward).collect();

        for iteration in 0..self.param.iterations {
            let estimator = forest::fit_regressor(&rows, &targets, &self.param.forest)?;

            if iteration + 1 < self.param.iterations {
                // Bellman update: r + gamma * max_a Q(s', a).
                // Absorbing transitions keep the bare reward.
                for (target, transition) in targets.iter_mut().zip(transitions) {
                    *target = if transition.absorbing {
                        transition.reward
                    } else {
                        transition.reward
                            + self.param.gamma
                                * max_q(
                                    &estimator,
                                    &transition.next_features,
                                    &self.param.discrete_actions,
                                )
                    };
                }
            }
            self.estimator = Some(estimator);
        }
        Ok(())
    }

    /// Q-value of `action` at a feature vector.
    pub fn q(&self, features: &[f64], action: ActionValue) -> Result<f64> {
        let Some(estimator) = self.estimator.as_ref() else {
            bail!("estimator is not fitted");
        };
        ensure!(
            features.len() == self.state_dim,
            "feature vector length {} does not match state dimension {}",
            features.len(),
            self.state_dim
        );
        let mut row = features.to_vec();
        row.push(action as f64);
        Ok(estimator.predict(&row))
    }

    /// Greedy action at a feature vector.
    ///
    /// Absorbing states carry no decision; the first discrete action is
    /// returned without consulting the estimator.
    pub fn draw_action(&self, features: &[f64], absorbing: bool) -> Result<ActionValue> {
        let Some(&first) = self.param.discrete_actions.first() else {
            bail!("discrete action set is empty");
        };
        if absorbing {
            return Ok(first);
        }
        let mut best = (first, f64::NEG_INFINITY);
        for &action in &self.param.discrete_actions {
            let q = self.q(features, action)?;
            if q > best.1 {
                best = (action, q);
            }
        }
        Ok(best.0)
    }
}

fn max_q(
    estimator: &RandomForestRegressor,
    features: &[f64],
    actions: &[ActionValue],
) -> f64 {
    let mut row = Vec::with_capacity(features.len() + 1);
    row.extend_from_slice(features);
    row.push(0.0);
    let action_slot = row.len() - 1;
    let mut best = f64::NEG_INFINITY;
    for &action in actions {
        row[action_slot] = action as f64;
        best = best.max(estimator.predict(&row));
    }
    best
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use crate::dataset::FeatureTransition;

    use super::*;

    /// Single-step decision problem: action 1 always earns reward 1,
    /// action 0 earns nothing.
    fn bandit_dataset() -> FeatureDataset {
        let mut rng = StdRng::seed_from_u64(11);
        let transitions = (0..60)
            .map(|i| {
                let action = (i % 2) as ActionValue;
                FeatureTransition {
                    features: vec![rng.gen_range(0.0..1.0)],
                    action,
                    reward: action as f64,
                    next_features: vec![rng.gen_range(0.0..1.0)],
                    absorbing: true,
                }
            })
            .collect();
        FeatureDataset::new(1, transitions).unwrap()
    }

    fn test_param() -> FqiParameter {
        FqiParameter {
            gamma: 0.99,
            iterations: 2,
            discrete_actions: vec![0, 1],
            forest: ForestOptions {
                trees: 25,
                seed: 3,
                ..ForestOptions::default()
            },
        }
    }

    #[test]
    fn test_fit_and_greedy_action() {
        let dataset = bandit_dataset();
        let mut fqi = Fqi::new(test_param(), 1);
        fqi.fit(&dataset).unwrap();
        assert!(fqi.is_fitted());

        assert_eq!(fqi.draw_action(&[0.5], false).unwrap(), 1);
        assert!(fqi.q(&[0.5], 1).unwrap() > fqi.q(&[0.5], 0).unwrap());
    }

    #[test]
    fn test_q_before_fit_is_an_error() {
        let fqi = Fqi::new(test_param(), 1);
        assert!(fqi.q(&[0.5], 0).is_err());
        assert!(fqi.draw_action(&[0.5], false).is_err());
    }

    #[test]
    fn test_absorbing_state_short_circuits() {
        let dataset = bandit_dataset();
        let mut fqi = Fqi::new(test_param(), 1);
        fqi.fit(&dataset).unwrap();
        assert_eq!(fqi.draw_action(&[0.5], true).unwrap(), 0);
    }

    #[test]
    fn test_fit_rejects_mismatched_state_dim() {
        let dataset = bandit_dataset();
        let mut fqi = Fqi::new(test_param(), 2);
        assert!(fqi.fit(&dataset).is_err());
    }

    #[test]
    fn test_q_rejects_wrong_feature_length() {
        let dataset = bandit_dataset();
        let mut fqi = Fqi::new(test_param(), 1);
        fqi.fit(&dataset).unwrap();
        assert!(fqi.q(&[0.5, 0.5], 0).is_err());
    }
}
