#![allow(non_upper_case_globals)]

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use lazy_static::lazy_static;
use tensorflow::{Graph, SavedModelBundle, SessionOptions, Tensor};

use ifs::pixel;
use ifs::prelude::{FeatureExtractor, Observation};

use crate::extraction::architecture::{NetworkArchitecture, Optimizer};
use crate::extraction::model_function::{ModelFunction1, ModelFunction2};

lazy_static! {
    /// Conventional location of the pipeline's pixel model.
    pub static ref CONV_NET_4x108x84_512_PATH: PathBuf =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tf_model/saved/conv_net_4x108x84_512");
}

/// Training signature exported by graphs built with the RMSProp-Graves
/// optimizer variant.
pub const TRAIN_SIGNATURE_GRAVES: &str = "train_model_graves";
/// Training signature exported by every graph.
pub const TRAIN_SIGNATURE_DEFAULT: &str = "train_model";

/// Configuration of the [ConvNet] wrapper.
#[derive(Clone, Debug)]
pub struct ConvNetConfig {
    /// Input pixel shape `(channels, rows, cols)`.
    pub input_shape: [usize; 3],
    /// Output width; 1 when regressing the scalar reward, the input volume
    /// for the autoencoder variant.
    pub target_size: usize,
    /// Width of the dense feature layer.
    pub encoding_dim: usize,
    /// Dropout probability of the readout layer.
    pub dropout_prob: f32,
    /// Convert inputs to 1-bit color space after normalization.
    pub binarize: bool,
}

impl Default for ConvNetConfig {
    fn default() -> Self {
        Self {
            input_shape: [4, 108, 84],
            target_size: 1,
            encoding_dim: 512,
            dropout_prob: 0.5,
            binarize: false,
        }
    }
}

/// Convolutional feature extractor over a saved tensorflow model.
///
/// The graph carries the network described by [NetworkArchitecture] plus its
/// training step; this wrapper only normalizes pixels, moves data in and out
/// of tensors and calls the named graph signatures. Convolution, dropout and
/// the optimizer all live inside the saved graph.
pub struct ConvNet {
    config: ConvNetConfig,
    architecture: NetworkArchitecture,
    graph: Graph,
    bundle: SavedModelBundle,
    fn_train: ModelFunction2<'static>,
    fn_predict: ModelFunction1<'static>,
    fn_encode: ModelFunction1<'static>,
    fn_write_checkpoint: ModelFunction1<'static>,
    fn_read_checkpoint: ModelFunction1<'static>,
}

impl ConvNet {
    /// Loads the saved model from `model_dir`.
    ///
    /// The graph is expected to export `predict`, `encode`, checkpoint I/O
    /// and a training signature. When the RMSProp-Graves training variant is
    /// absent, the plain `train_model` signature is substituted.
    pub fn load_model(model_dir: &Path, config: ConvNetConfig) -> Result<Self> {
        let mut graph = Graph::new();
        let bundle = SavedModelBundle::load(
            &SessionOptions::new(),
            ["serve"],
            &mut graph,
            model_dir
                .to_str()
                .context("model dir should have a UTF-8 compatible path")?,
        )?;

        let mut architecture = NetworkArchitecture::standard(
            config.input_shape,
            config.encoding_dim,
            config.target_size,
            config.dropout_prob,
        );
        let train_signature = if bundle
            .meta_graph_def()
            .get_signature(TRAIN_SIGNATURE_GRAVES)
            .is_ok()
        {
            TRAIN_SIGNATURE_GRAVES
        } else {
            log::warn!(
                "saved model lacks the '{TRAIN_SIGNATURE_GRAVES}' signature, \
                 falling back to '{TRAIN_SIGNATURE_DEFAULT}'"
            );
            architecture.optimizer = Optimizer::Rmsprop;
            TRAIN_SIGNATURE_DEFAULT
        };

        let fn_train = ModelFunction2::new(train_signature, "x_batch", "y_batch", "loss")?;
        let fn_predict = ModelFunction1::new("predict", "x_batch", "y_batch")?;
        let fn_encode = ModelFunction1::new("encode", "x", "features")?;
        let fn_write_checkpoint = ModelFunction1::new("write_checkpoint", "file", "file")?;
        let fn_read_checkpoint = ModelFunction1::new("read_checkpoint", "file", "status")?;

        Ok(Self {
            config,
            architecture,
            graph,
            bundle,
            fn_train,
            fn_predict,
            fn_encode,
            fn_write_checkpoint,
            fn_read_checkpoint,
        })
    }

    pub fn config(&self) -> &ConvNetConfig {
        &self.config
    }

    pub fn architecture(&self) -> &NetworkArchitecture {
        &self.architecture
    }

    /// Layer table for the run log.
    pub fn summary(&self) -> String {
        self.architecture.summary()
    }

    /// Normalized (and optionally binarized) batch tensor
    /// `[len, channels, rows, cols]`.
    fn input_tensor(&self, batch: &[Observation]) -> Result<Tensor<f32>> {
        ensure!(!batch.is_empty(), "input batch is empty");
        let [c, h, w] = self.config.input_shape;
        let mut tensor = Tensor::new(&[batch.len() as u64, c as u64, h as u64, w as u64]);
        for (i, observation) in batch.iter().enumerate() {
            ensure!(
                observation.dims() == &self.config.input_shape,
                "observation shape {:?} does not match model input {:?}",
                observation.dims(),
                self.config.input_shape
            );
            let values = observation.normalized(self.config.binarize);
            let offset = i * values.len();
            tensor[offset..offset + values.len()].copy_from_slice(&values);
        }
        Ok(tensor)
    }

    /// Trains on one batch and returns the library-reported loss.
    pub fn fit(&self, x: &[Observation], y: &[Vec<f32>]) -> Result<f32> {
        ensure!(
            x.len() == y.len(),
            "sample/target count mismatch: {} vs {}",
            x.len(),
            y.len()
        );
        let x_tensor = self.input_tensor(x)?;
        let mut y_tensor: Tensor<f32> =
            Tensor::new(&[y.len() as u64, self.config.target_size as u64]);
        for (i, targets) in y.iter().enumerate() {
            ensure!(
                targets.len() == self.config.target_size,
                "target width {} does not match target_size {}",
                targets.len(),
                self.config.target_size
            );
            let offset = i * self.config.target_size;
            y_tensor[offset..offset + targets.len()].copy_from_slice(targets);
        }
        let loss: Tensor<f32> = self.fn_train.apply(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &x_tensor,
            &y_tensor,
        )?;
        Ok(loss[0])
    }

    /// Runs the batch through the model and returns the predictions,
    /// rescaled back to the original pixel range.
    pub fn predict(&self, x: &[Observation]) -> Result<Vec<Vec<f32>>> {
        let x_tensor = self.input_tensor(x)?;
        let out: Tensor<f32> = self.fn_predict.apply(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &x_tensor,
        )?;
        ensure!(
            out.len() % x.len() == 0,
            "prediction tensor length {} is not a multiple of the batch size {}",
            out.len(),
            x.len()
        );
        let width = out.len() / x.len();
        let mut predictions = Vec::with_capacity(x.len());
        for i in 0..x.len() {
            let mut row = out[i * width..(i + 1) * width].to_vec();
            pixel::rescale_in_place(&mut row);
            predictions.push(row);
        }
        Ok(predictions)
    }

    /// Persists the weights plus the architecture description and returns
    /// the weight file location.
    ///
    /// Files follow the `model<suffix>.h5` / `architecture_model<suffix>.json`
    /// convention unless an explicit file name is given.
    pub fn save(&self, dir: &Path, filename: Option<&str>, suffix: &str) -> Result<PathBuf> {
        let (weights_name, architecture_name) = weight_file_names(filename, suffix);
        let weights_path = dir.join(&weights_name);

        let written = self.fn_write_checkpoint.apply::<String, String>(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &Tensor::from(
                weights_path
                    .to_str()
                    .context("weight path should be valid UTF-8")?
                    .to_string(),
            ),
        )?;
        self.architecture.save(&dir.join(&architecture_name))?;
        log::info!("saved model weights as {}", written[0]);
        Ok(weights_path)
    }

    /// Restores weights from a checkpoint written by [Self::save].
    pub fn load_weights(&self, path: &Path) -> Result<()> {
        log::info!("loading weights from {}", path.display());
        let _ = self.fn_read_checkpoint.apply::<String, i32>(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &Tensor::from(
                path.to_str()
                    .context("weight path should be valid UTF-8")?
                    .to_string(),
            ),
        )?;
        Ok(())
    }
}

impl FeatureExtractor for ConvNet {
    fn feature_count(&self) -> usize {
        self.config.encoding_dim
    }

    /// Flattened activations of the dense feature layer for one observation.
    fn features(&self, state: &Observation) -> Result<Vec<f32>> {
        let x_tensor = self.input_tensor(std::slice::from_ref(state))?;
        let out: Tensor<f32> = self.fn_encode.apply(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &x_tensor,
        )?;
        ensure!(
            out.len() == self.config.encoding_dim,
            "encoder returned {} features, expected {}",
            out.len(),
            self.config.encoding_dim
        );
        Ok(out.to_vec())
    }
}

/// Weight and architecture file names per convention.
fn weight_file_names(filename: Option<&str>, suffix: &str) -> (String, String) {
    let weights_name = match filename {
        Some(name) if name.ends_with(".h5") => name.to_string(),
        Some(name) => format!("{name}.h5"),
        None => format!("model{suffix}.h5"),
    };
    let stem = weights_name.trim_end_matches(".h5");
    let architecture_name = format!("architecture_{stem}.json");
    (weights_name, architecture_name)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(None, "", "model.h5", "architecture_model.json")]
    #[case(None, "_run7", "model_run7.h5", "architecture_model_run7.json")]
    #[case(Some("encoder"), "", "encoder.h5", "architecture_encoder.json")]
    #[case(Some("encoder.h5"), "_ignored", "encoder.h5", "architecture_encoder.json")]
    fn test_weight_file_names(
        #[case] filename: Option<&str>,
        #[case] suffix: &str,
        #[case] expected_weights: &str,
        #[case] expected_architecture: &str,
    ) {
        let (weights, architecture) = weight_file_names(filename, suffix);
        assert_eq!(weights, expected_weights);
        assert_eq!(architecture, expected_architecture);
    }

    #[test]
    fn test_default_config_matches_the_pipeline_model() {
        let config = ConvNetConfig::default();
        assert_eq!(config.input_shape, [4, 108, 84]);
        assert_eq!(config.target_size, 1);
        assert_eq!(config.encoding_dim, 512);
        assert!(!config.binarize);
    }
}
