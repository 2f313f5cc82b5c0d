//! Epsilon-greedy exploration around a fitted-Q estimator.

use anyhow::{ensure, Context, Result};
use rand::prelude::*;

use crate::dataset::FeatureDataset;
use crate::policy::fqi::{Fqi, FqiParameter};
use crate::prelude::{ActionValue, FeatureExtractor, Observation};

/// Wraps a [Fqi] estimator with a multiplicative exploration schedule and
/// the feature extractor that projects raw observations into the
/// estimator's feature space.
pub struct EpsilonFqi<F: FeatureExtractor> {
    extractor: F,
    support: Option<Vec<bool>>,
    fqi: Fqi,
    epsilon: f64,
    epsilon_rate: f64,
    rng: ThreadRng,
}

impl<F: FeatureExtractor> EpsilonFqi<F> {
    pub fn new(fqi_param: FqiParameter, extractor: F, epsilon: f64, epsilon_rate: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&epsilon),
            "epsilon must be within [0,1], got {epsilon}"
        );
        ensure!(epsilon_rate > 0.0, "epsilon_rate must be positive, got {epsilon_rate}");
        ensure!(
            !fqi_param.discrete_actions.is_empty(),
            "discrete action set is empty"
        );
        let state_dim = extractor.feature_count();
        Ok(Self {
            fqi: Fqi::new(fqi_param, state_dim),
            extractor,
            support: None,
            epsilon,
            epsilon_rate,
            rng: thread_rng(),
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn extractor(&self) -> &F {
        &self.extractor
    }

    pub fn fqi(&self) -> &Fqi {
        &self.fqi
    }

    /// Restricts the estimator input to the features marked in `support`.
    pub fn set_support(&mut self, support: Vec<bool>) -> Result<()> {
        ensure!(
            support.len() == self.extractor.feature_count(),
            "support mask length {} does not match feature count {}",
            support.len(),
            self.extractor.feature_count()
        );
        self.support = Some(support);
        Ok(())
    }

    /// Rebuilds the estimator for the dataset's feature dimension and fits it.
    pub fn fit_on_dataset(&mut self, dataset: &FeatureDataset) -> Result<()> {
        self.fqi = Fqi::new(self.fqi.param().clone(), dataset.state_dim());
        self.fqi.fit(dataset)
    }

    /// Multiplicative epsilon decay; uses the configured rate when none is
    /// given.
    pub fn epsilon_step(&mut self, epsilon_rate: Option<f64>) {
        self.epsilon *= epsilon_rate.unwrap_or(self.epsilon_rate);
    }

    /// Epsilon-greedy action selection.
    ///
    /// With probability epsilon a uniformly random action from the discrete
    /// set is drawn; under `evaluation` the random branch is skipped.
    /// Otherwise the observation is projected through the extractor (and the
    /// support mask, when set) and the estimator picks greedily.
    pub fn draw_action(
        &mut self,
        state: &Observation,
        absorbing: bool,
        evaluation: bool,
    ) -> Result<ActionValue> {
        if !evaluation && self.rng.gen::<f64>() <= self.epsilon {
            let &action = self
                .fqi
                .param()
                .discrete_actions
                .choose(&mut self.rng)
                .context("discrete action set is empty")?;
            return Ok(action);
        }
        let features = match &self.support {
            Some(support) => self.extractor.supported_features(state, support)?,
            None => self.extractor.features(state)?,
        };
        let features: Vec<f64> = features.into_iter().map(f64::from).collect();
        self.fqi.draw_action(&features, absorbing)
    }
}

#[cfg(test)]
mod tests {
    use crate::dataset::FeatureTransition;
    use crate::forest::ForestOptions;

    use super::*;

    struct FirstPixels(usize);

    impl FeatureExtractor for FirstPixels {
        fn feature_count(&self) -> usize {
            self.0
        }

        fn features(&self, state: &Observation) -> Result<Vec<f32>> {
            Ok(state.data()[..self.0]
                .iter()
                .map(|&v| v as f32 / 255.0)
                .collect())
        }
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

    /// Action 1 always earns reward 1, action 0 earns nothing.
    fn bandit_dataset(state_dim: usize) -> FeatureDataset {
        let transitions = (0..60)
            .map(|i| {
                let action = (i % 2) as ActionValue;
                FeatureTransition {
                    features: vec![(i % 10) as f64 / 10.0; state_dim],
                    action,
                    reward: action as f64,
                    next_features: vec![(i % 10) as f64 / 10.0; state_dim],
                    absorbing: true,
                }
            })
            .collect();
        FeatureDataset::new(state_dim, transitions).unwrap()
    }

    #[test]
    fn test_epsilon_step_decays_strictly_and_stays_non_negative() {
        let mut policy = EpsilonFqi::new(test_param(), FirstPixels(1), 1.0, 0.99).unwrap();
        let mut previous = policy.epsilon();
        for _ in 0..200 {
            policy.epsilon_step(None);
            assert!(policy.epsilon() < previous);
            assert!(policy.epsilon() >= 0.0);
            previous = policy.epsilon();
        }
    }

    #[test]
    fn test_epsilon_step_with_explicit_rate() {
        let mut policy = EpsilonFqi::new(test_param(), FirstPixels(1), 0.8, 0.99).unwrap();
        policy.epsilon_step(Some(0.5));
        assert!((policy.epsilon() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_new_rejects_out_of_range_epsilon() {
        assert!(EpsilonFqi::new(test_param(), FirstPixels(1), 1.5, 0.99).is_err());
        assert!(EpsilonFqi::new(test_param(), FirstPixels(1), -0.1, 0.99).is_err());
    }

    #[test]
    fn test_evaluation_mode_is_greedy() {
        let mut policy = EpsilonFqi::new(test_param(), FirstPixels(1), 1.0, 0.99).unwrap();
        policy.fit_on_dataset(&bandit_dataset(1)).unwrap();

        let state = Observation::new([1, 1, 4], vec![128, 0, 0, 0]).unwrap();
        // epsilon is 1.0, but evaluation skips the random branch entirely
        for _ in 0..20 {
            assert_eq!(policy.draw_action(&state, false, true).unwrap(), 1);
        }
    }

    #[test]
    fn test_full_exploration_never_consults_the_estimator() {
        // the estimator is unfitted, so any greedy draw would error out
        let mut policy = EpsilonFqi::new(test_param(), FirstPixels(1), 1.0, 0.99).unwrap();
        let state = Observation::new([1, 1, 4], vec![128, 0, 0, 0]).unwrap();
        for _ in 0..20 {
            let action = policy.draw_action(&state, false, false).unwrap();
            assert!([0, 1].contains(&action));
        }
    }

    #[test]
    fn test_fit_on_dataset_adopts_the_dataset_dimension() {
        let mut policy = EpsilonFqi::new(test_param(), FirstPixels(4), 1.0, 0.99).unwrap();
        assert_eq!(policy.fqi().state_dim(), 4);
        policy.set_support(vec![true, false, true, false]).unwrap();
        policy.fit_on_dataset(&bandit_dataset(2)).unwrap();
        assert_eq!(policy.fqi().state_dim(), 2);

        let state = Observation::new([1, 1, 4], vec![128, 0, 64, 0]).unwrap();
        assert_eq!(policy.draw_action(&state, false, true).unwrap(), 1);
    }
}
