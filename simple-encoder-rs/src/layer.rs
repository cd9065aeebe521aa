//! Encoder block combining self-attention and a feed-forward network.
//!
//! Implements both normalization placements:
//! - Pre-norm: `x + sa(norm1(x))`, then `x + ff(norm2(x))`
//! - Post-norm: `norm1(x + sa(x))`, then `norm2(x + ff(x))`

use candle_core::{Result, Tensor};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

use crate::attention::MultiHeadSelfAttention;
use crate::config::{Activation, NormPlacement, SimpleEncoderConfig};
use crate::norm::{manual_layer_norm, ManualLayerNorm};

/// Apply the configured activation.
pub fn activate(activation: Activation, x: &Tensor) -> Result<Tensor> {
    match activation {
        Activation::Relu => x.relu(),
        Activation::Gelu => x.gelu_erf(),
    }
}

/// Single encoder block
pub struct EncoderLayer {
    self_attn: MultiHeadSelfAttention,
    linear1: Linear,
    linear2: Linear,
    norm1: ManualLayerNorm,
    norm2: ManualLayerNorm,
    dropout: Dropout,
    activation: Activation,
    norm_placement: NormPlacement,
}

impl EncoderLayer {
    /// Parameter names registered under this block's prefix, in module order.
    pub fn parameter_names() -> Vec<String> {
        let mut names: Vec<String> = MultiHeadSelfAttention::PARAMETERS
            .iter()
            .map(|p| format!("self_attn.{p}"))
            .collect();
        for sub in ["linear1", "linear2"] {
            names.push(format!("{sub}.weight"));
            names.push(format!("{sub}.bias"));
        }
        for sub in ["norm1", "norm2"] {
            names.extend(ManualLayerNorm::PARAMETERS.iter().map(|p| format!("{sub}.{p}")));
        }
        names
    }

    /// Create encoder block
    pub fn new(config: &SimpleEncoderConfig, vb: VarBuilder) -> Result<Self> {
        let d_model = config.d_model;
        let eps = config.layer_norm_eps;

        let self_attn = MultiHeadSelfAttention::new(config, vb.pp("self_attn"))?;
        let linear1 = linear(d_model, config.dim_feedforward, vb.pp("linear1"))?;
        let linear2 = linear(config.dim_feedforward, d_model, vb.pp("linear2"))?;
        let norm1 = manual_layer_norm(d_model, eps, vb.pp("norm1"))?;
        let norm2 = manual_layer_norm(d_model, eps, vb.pp("norm2"))?;

        Ok(Self {
            self_attn,
            linear1,
            linear2,
            norm1,
            norm2,
            dropout: Dropout::new(config.dropout),
            activation: config.activation,
            norm_placement: config.norm_placement,
        })
    }

    fn self_attention_block(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.self_attn.forward(x, train)?;
        self.dropout.forward(&out, train)
    }

    fn feed_forward_block(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = activate(self.activation, &self.linear1.forward(x)?)?;
        let hidden = self.dropout.forward(&hidden, train)?;
        let out = self.linear2.forward(&hidden)?;
        self.dropout.forward(&out, train)
    }

    /// Forward pass
    /// Input: (batch, seq_len, d_model)
    /// Output: (batch, seq_len, d_model)
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        match self.norm_placement {
            NormPlacement::Pre => {
                let x = (x + self.self_attention_block(&self.norm1.forward(x)?, train)?)?;
                &x + self.feed_forward_block(&self.norm2.forward(&x)?, train)?
            }
            NormPlacement::Post => {
                let x = self
                    .norm1
                    .forward(&(x + self.self_attention_block(x, train)?)?)?;
                self.norm2
                    .forward(&(&x + self.feed_forward_block(&x, train)?)?)
            }
        }
    }
}
