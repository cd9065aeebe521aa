//! Layer normalization built from basic tensor operations.
//!
//! Uses only mean, variance, add, mul and div so it runs on every backend,
//! including CUDA devices without a fused layer-norm kernel.

use candle_core::{Result, Tensor, D};
use candle_nn::{Module, VarBuilder};

/// LayerNorm over the last dimension with learnable scale and shift.
#[derive(Debug, Clone)]
pub struct ManualLayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl ManualLayerNorm {
    /// Parameter names registered under this module's prefix.
    pub const PARAMETERS: &'static [&'static str] = &["weight", "bias"];

    /// Create a new ManualLayerNorm.
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Self {
        Self { weight, bias, eps }
    }

    /// Get the normalized width.
    pub fn normalized_shape(&self) -> usize {
        self.weight.dims()[0]
    }

    /// y = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias
    fn forward_impl(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let x_centered = x.broadcast_sub(&mean)?;
        let var = x_centered.sqr()?.mean_keepdim(D::Minus1)?;

        let std = (var + self.eps)?.sqrt()?;
        let normalized = x_centered.broadcast_div(&std)?;

        normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

impl Module for ManualLayerNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.forward_impl(x)
    }
}

/// Create a manual layer norm layer.
pub fn manual_layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<ManualLayerNorm> {
    let weight = vb.get_with_hints(size, "weight", candle_nn::Init::Const(1.0))?;
    let bias = vb.get_with_hints(size, "bias", candle_nn::Init::Const(0.0))?;
    Ok(ManualLayerNorm::new(weight, bias, eps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_manual_layer_norm_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let norm = manual_layer_norm(16, 1e-5, vb).unwrap();
        assert_eq!(norm.normalized_shape(), 16);

        let x = Tensor::randn(0.0f32, 1.0, (2, 8, 16), &device).unwrap();
        let out = norm.forward(&x).unwrap();
        assert_eq!(out.dims(), &[2, 8, 16]);
    }

    #[test]
    fn test_manual_layer_norm_normalized() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let norm = manual_layer_norm(4, 1e-5, vb).unwrap();
        let x = Tensor::new(&[[1.0f32, 2.0, 3.0, 4.0]], &device).unwrap();
        let out: Vec<Vec<f32>> = norm.forward(&x).unwrap().to_vec2().unwrap();

        // mean 2.5, variance 1.25
        let std = (1.25f32 + 1e-5).sqrt();
        for (i, v) in out[0].iter().enumerate() {
            let expected = (i as f32 + 1.0 - 2.5) / std;
            assert!((v - expected).abs() < 1e-5);
        }
    }
}
