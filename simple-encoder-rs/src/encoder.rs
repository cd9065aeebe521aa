//! Stack of encoder blocks over the latent sequence.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::SimpleEncoderConfig;
use crate::layer::EncoderLayer;

/// Order-preserving, non-causal encoder stack.
///
/// With `use_transformer = false` the stack is empty and the latent sequence
/// passes through unchanged.
pub struct SequenceEncoder {
    layers: Vec<EncoderLayer>,
}

impl SequenceEncoder {
    /// Create the stack; blocks live under `layers.{i}`.
    pub fn new(config: &SimpleEncoderConfig, vb: VarBuilder) -> Result<Self> {
        if !config.use_transformer {
            return Ok(Self { layers: Vec::new() });
        }

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(EncoderLayer::new(config, vb.pp(format!("layers.{i}")))?);
        }
        Ok(Self { layers })
    }

    /// Parameter names relative to the stack prefix, in block order.
    pub fn parameter_names(&self) -> Vec<String> {
        (0..self.layers.len())
            .flat_map(|i| {
                EncoderLayer::parameter_names()
                    .into_iter()
                    .map(move |p| format!("layers.{i}.{p}"))
            })
            .collect()
    }

    /// Number of blocks
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Whether any block runs.
    pub fn is_identity(&self) -> bool {
        self.layers.is_empty()
    }

    /// Forward pass
    /// Input: (batch, seq_len, d_model)
    /// Output: (batch, seq_len, d_model)
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden = x.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, train)?;
        }
        Ok(hidden)
    }

    /// Output of every block in order, starting from the block input.
    pub fn forward_layers(&self, x: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        let mut outputs = Vec::with_capacity(self.layers.len() + 1);
        outputs.push(x.clone());
        let mut hidden = x.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, train)?;
            outputs.push(hidden.clone());
        }
        Ok(outputs)
    }
}
