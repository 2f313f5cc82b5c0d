//! Serializable description of the convolutional network.
//!
//! The description is written next to the weights as
//! `architecture_model<suffix>.json` so that a run folder documents the
//! exact network its weight file belongs to.

use std::fmt::Write;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkArchitecture {
    /// Input pixel shape `(channels, rows, cols)`.
    pub input_shape: [usize; 3],
    pub conv_layers: Vec<ConvLayer>,
    /// Width of the dense feature layer.
    pub encoding_dim: usize,
    /// Width of the linear readout.
    pub target_size: usize,
    /// Dropout probability applied after the readout.
    pub dropout_prob: f32,
    pub optimizer: Optimizer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvLayer {
    pub filters: usize,
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub activation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimizer {
    /// RMSProp with the Graves momentum variant.
    RmspropGraves {
        lr: f64,
        momentum: f64,
        squared_momentum: f64,
        epsilon: f64,
    },
    /// Library-default RMSProp, substituted when the Graves variant is
    /// unavailable in the saved graph.
    Rmsprop,
}

impl NetworkArchitecture {
    /// The fixed feature-extraction stack: three strided convolutions, a
    /// dense feature layer and a linear readout with dropout.
    pub fn standard(
        input_shape: [usize; 3],
        encoding_dim: usize,
        target_size: usize,
        dropout_prob: f32,
    ) -> Self {
        Self {
            input_shape,
            conv_layers: vec![
                ConvLayer {
                    filters: 32,
                    kernel: (8, 8),
                    stride: (4, 4),
                    activation: "relu".to_string(),
                },
                ConvLayer {
                    filters: 64,
                    kernel: (4, 4),
                    stride: (2, 2),
                    activation: "relu".to_string(),
                },
                ConvLayer {
                    filters: 64,
                    kernel: (3, 3),
                    stride: (1, 1),
                    activation: "relu".to_string(),
                },
            ],
            encoding_dim,
            target_size,
            dropout_prob,
            optimizer: Optimizer::RmspropGraves {
                lr: 0.00025,
                momentum: 0.95,
                squared_momentum: 0.95,
                epsilon: 0.01,
            },
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(
            File::create(path)
                .with_context(|| format!("cannot write architecture to {}", path.display()))?,
        );
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(
            File::open(path)
                .with_context(|| format!("cannot read architecture from {}", path.display()))?,
        );
        Ok(serde_json::from_reader(reader)?)
    }

    /// Layer table for the run log.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "input            {:?}", self.input_shape);
        for layer in &self.conv_layers {
            let _ = writeln!(
                out,
                "conv2d           {} x {:?} stride {:?} ({})",
                layer.filters, layer.kernel, layer.stride, layer.activation
            );
        }
        let _ = writeln!(out, "flatten");
        let _ = writeln!(out, "dense (features) {} (relu)", self.encoding_dim);
        let _ = writeln!(
            out,
            "dense (output)   {} (linear), dropout {}",
            self.target_size, self.dropout_prob
        );
        let _ = write!(out, "optimizer        {:?}", self.optimizer);
        out
    }
}
