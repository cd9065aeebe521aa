//! Bidirectional multi-head self-attention.
//!
//! Every position attends to every other position; no mask is applied.
//! Q, K and V come from a single packed input projection.

use candle_core::{Result, Tensor};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

use crate::config::SimpleEncoderConfig;

/// Multi-head self-attention with a packed QKV projection.
pub struct MultiHeadSelfAttention {
    in_proj: Linear,
    out_proj: Linear,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
    d_model: usize,
}

impl MultiHeadSelfAttention {
    /// Parameter names registered under this module's prefix.
    pub const PARAMETERS: &'static [&'static str] = &[
        "in_proj.weight",
        "in_proj.bias",
        "out_proj.weight",
        "out_proj.bias",
    ];

    /// Create attention module
    pub fn new(config: &SimpleEncoderConfig, vb: VarBuilder) -> Result<Self> {
        let d_model = config.d_model;
        let in_proj = linear(d_model, 3 * d_model, vb.pp("in_proj"))?;
        let out_proj = linear(d_model, d_model, vb.pp("out_proj"))?;

        Ok(Self {
            in_proj,
            out_proj,
            dropout: Dropout::new(config.dropout),
            num_heads: config.num_heads,
            head_dim: config.head_dim(),
            d_model,
        })
    }

    /// Forward pass
    /// Input: (batch, seq_len, d_model)
    /// Output: (batch, seq_len, d_model)
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        let qkv = self.in_proj.forward(x)?;

        let split = |i: usize| -> Result<Tensor> {
            qkv.narrow(2, i * self.d_model, self.d_model)?
                .contiguous()?
                .reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        // (batch, num_heads, seq, head_dim)
        let q = split(0)?;
        let k = split(1)?;
        let v = split(2)?;

        let scale = (self.head_dim as f64).sqrt();
        let k_t = k.t()?.contiguous()?;
        let attn = (q.matmul(&k_t)? / scale)?;
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;
        let attn = self.dropout.forward(&attn, train)?;

        let out = attn.matmul(&v)?;
        let out = out
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;

        self.out_proj.forward(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    #[test]
    fn test_attention_shape() {
        let config = SimpleEncoderConfig::test();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let attn = MultiHeadSelfAttention::new(&config, vb).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (2, 7, config.d_model), &device).unwrap();
        let out = attn.forward(&x, false).unwrap();

        assert_eq!(out.dims(), &[2, 7, config.d_model]);
        assert_eq!(varmap.all_vars().len(), MultiHeadSelfAttention::PARAMETERS.len());
    }

    #[test]
    fn test_attention_is_not_causal() {
        // Changing the last position must affect the first output row.
        let config = SimpleEncoderConfig::test();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = MultiHeadSelfAttention::new(&config, vb).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (1, 4, config.d_model), &device).unwrap();
        let bump = Tensor::ones((1, 1, config.d_model), DType::F32, &device).unwrap();
        let head = x.narrow(1, 0, 3).unwrap();
        let tail = (x.narrow(1, 3, 1).unwrap() + bump).unwrap();
        let x2 = Tensor::cat(&[&head, &tail], 1).unwrap();

        let a = attn.forward(&x, false).unwrap();
        let b = attn.forward(&x2, false).unwrap();
        let diff: f32 = (a.i((0, 0)).unwrap() - b.i((0, 0)).unwrap())
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff > 0.0);
    }
}
