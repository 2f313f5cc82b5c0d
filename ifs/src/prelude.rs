use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::pixel;

/// Numeric action representation shared between dataset files and the policy.
pub type ActionValue = u8;

/// A fixed-shape pixel observation.
///
/// `dims` is `(channels, rows, cols)`; `data` holds the byte-valued pixels in
/// row-major order. Pixels are only ever handed to a learning library after
/// [Self::normalized] scaled them into `[0,1]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    dims: [usize; 3],
    data: Vec<u8>,
}

impl Observation {
    pub fn new(dims: [usize; 3], data: Vec<u8>) -> Result<Self> {
        ensure!(
            data.len() == dims.iter().product::<usize>(),
            "observation data length {} does not match dims {:?}",
            data.len(),
            dims
        );
        Ok(Self { dims, data })
    }

    pub fn zeros(dims: [usize; 3]) -> Self {
        Self {
            data: vec![0; dims.iter().product()],
            dims,
        }
    }

    pub fn dims(&self) -> &[usize; 3] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel values scaled into `[0,1]`, optionally converted to 1-bit color
    /// space.
    pub fn normalized(&self, binarize: bool) -> Vec<f32> {
        let mut values = pixel::normalize(&self.data);
        if binarize {
            pixel::binarize_in_place(&mut values);
        }
        values
    }
}

/// Access to the penultimate-layer features of a trained encoder model.
pub trait FeatureExtractor {
    /// Length of the vector returned by [Self::features].
    fn feature_count(&self) -> usize;

    /// Flattened feature vector of a single observation.
    fn features(&self, state: &Observation) -> Result<Vec<f32>>;

    /// Feature vector projected to the subset marked in `support`.
    fn supported_features(&self, state: &Observation, support: &[bool]) -> Result<Vec<f32>> {
        let features = self.features(state)?;
        ensure!(
            support.len() == features.len(),
            "support mask length {} does not match feature count {}",
            support.len(),
            features.len()
        );
        Ok(features
            .into_iter()
            .zip(support)
            .filter(|&(_, &keep)| keep)
            .map(|(f, _)| f)
            .collect())
    }
}
