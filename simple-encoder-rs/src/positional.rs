//! Positional encodings for discrete positions and continuous coordinates.
//!
//! Discrete mode is the fixed sinusoidal table
//! `pe[p, 2k] = sin(p / 10000^(2k/d))`, `pe[p, 2k+1] = cos(p / 10000^(2k/d))`.
//!
//! Continuous mode evaluates, for a coordinate `c = (c_1, ..., c_n)`,
//!
//! ```text
//! pe[2k]   = prod_i sin(10^coeff * c_i * 10^(-4 * 2k / d))
//! pe[2k+1] = prod_i cos(10^coeff * c_i * 10^(-4 * (2k+1) / d))
//! ```
//!
//! so the embedding width does not grow with the domain dimension. Axes are
//! no longer separable in the product; the scheme targets small domains.

use candle_core::{DType, Device, Tensor};

use crate::config::{PositionalEncodingMode, SimpleEncoderConfig};
use crate::error::{SimpleEncoderError, SimpleEncoderResult};

/// Frequencies for the continuous encoding, one row per channel parity.
#[derive(Debug, Clone)]
struct ContinuousFrequencies {
    /// (1, d_model / 2), scales channel 2k
    even: Tensor,
    /// (1, d_model / 2), scales channel 2k + 1
    odd: Tensor,
}

/// Produces position-dependent embeddings of width `d_model`.
///
/// Tables are computed once at construction and never written afterwards.
#[derive(Debug, Clone)]
pub struct PositionalEncoder {
    mode: PositionalEncodingMode,
    d_model: usize,
    domain_dim: usize,
    max_sequence_length: usize,
    discrete_table: Option<Tensor>,
    frequencies: Option<ContinuousFrequencies>,
    device: Device,
}

impl PositionalEncoder {
    /// Build the encoder tables for `config`.
    pub fn new(config: &SimpleEncoderConfig, device: &Device) -> SimpleEncoderResult<Self> {
        let d_model = config.d_model;
        if config.positional_encoding.is_sinusoidal() && d_model % 2 != 0 {
            return Err(SimpleEncoderError::invalid_config(format!(
                "sinusoidal positional encoding needs an even d_model, got {d_model}"
            )));
        }

        let discrete_table = match config.positional_encoding {
            PositionalEncodingMode::Discrete => Some(discrete_table(
                config.max_sequence_length,
                d_model,
                device,
            )?),
            _ => None,
        };

        let frequencies = match config.positional_encoding {
            PositionalEncodingMode::Continuous => Some(continuous_frequencies(
                d_model,
                config.pos_enc_coeff,
                device,
            )?),
            _ => None,
        };

        Ok(Self {
            mode: config.positional_encoding,
            d_model,
            domain_dim: config.domain_dim,
            max_sequence_length: config.max_sequence_length,
            discrete_table,
            frequencies,
            device: device.clone(),
        })
    }

    /// Encoding mode
    pub fn mode(&self) -> PositionalEncodingMode {
        self.mode
    }

    /// Full discrete table `(max_sequence_length, d_model)`, if in discrete mode.
    pub fn discrete_table(&self) -> Option<&Tensor> {
        self.discrete_table.as_ref()
    }

    /// Encode a sequence of `seq_len` positions with coordinates `coords`
    /// of shape `(seq_len, domain_dim)`.
    ///
    /// Returns `(seq_len, d_model)`, shared across the batch.
    pub fn encode(&self, seq_len: usize, coords: &Tensor) -> SimpleEncoderResult<Tensor> {
        match self.mode {
            PositionalEncodingMode::Discrete => self.encode_discrete(seq_len),
            PositionalEncodingMode::Continuous => self.encode_continuous(seq_len, coords),
            PositionalEncodingMode::None => {
                Ok(Tensor::zeros((seq_len, self.d_model), DType::F32, &self.device)?)
            }
        }
    }

    fn encode_discrete(&self, seq_len: usize) -> SimpleEncoderResult<Tensor> {
        if seq_len > self.max_sequence_length {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("sequence length <= {}", self.max_sequence_length),
                seq_len.to_string(),
            ));
        }
        let table = self
            .discrete_table
            .as_ref()
            .ok_or_else(|| SimpleEncoderError::invalid_config("discrete table not built"))?;
        Ok(table.narrow(0, 0, seq_len)?)
    }

    fn encode_continuous(&self, seq_len: usize, coords: &Tensor) -> SimpleEncoderResult<Tensor> {
        let freqs = self
            .frequencies
            .as_ref()
            .ok_or_else(|| SimpleEncoderError::invalid_config("continuous frequencies not built"))?;

        let (rows, dims) = coords.dims2()?;
        if dims != self.domain_dim {
            return Err(SimpleEncoderError::invalid_config(format!(
                "coordinates have {dims} axes but domain_dim is {}",
                self.domain_dim
            )));
        }
        if rows != seq_len {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("({seq_len}, {})", self.domain_dim),
                format!("{:?}", coords.dims()),
            ));
        }

        let coords = coords.to_dtype(DType::F32)?;
        let mut even: Option<Tensor> = None;
        let mut odd: Option<Tensor> = None;
        for axis in 0..self.domain_dim {
            // (seq_len, 1) * (1, d/2)
            let c = coords.narrow(1, axis, 1)?;
            let s = c.broadcast_mul(&freqs.even)?.sin()?;
            let k = c.broadcast_mul(&freqs.odd)?.cos()?;
            even = Some(match even {
                Some(acc) => (acc * s)?,
                None => s,
            });
            odd = Some(match odd {
                Some(acc) => (acc * k)?,
                None => k,
            });
        }

        match (even, odd) {
            (Some(even), Some(odd)) => Ok(interleave(&even, &odd)?),
            _ => Err(SimpleEncoderError::invalid_config("domain_dim must be > 0")),
        }
    }
}

/// Interleave two `(n, d/2)` tensors into `(n, d)` as `[e0, o0, e1, o1, ...]`.
fn interleave(even: &Tensor, odd: &Tensor) -> candle_core::Result<Tensor> {
    let (rows, half) = even.dims2()?;
    Tensor::stack(&[even, odd], 2)?.reshape((rows, 2 * half))
}

/// Fixed sinusoidal table `(max_len, d_model)`.
fn discrete_table(max_len: usize, d_model: usize, device: &Device) -> candle_core::Result<Tensor> {
    let half = d_model / 2;
    let scale = -(10000f32.ln()) / d_model as f32;
    let mut values = vec![0f32; max_len * d_model];
    for p in 0..max_len {
        for k in 0..half {
            let angle = p as f32 * ((2 * k) as f32 * scale).exp();
            values[p * d_model + 2 * k] = angle.sin();
            values[p * d_model + 2 * k + 1] = angle.cos();
        }
    }
    Tensor::from_vec(values, (max_len, d_model), device)
}

fn continuous_frequencies(
    d_model: usize,
    coeff: f64,
    device: &Device,
) -> candle_core::Result<ContinuousFrequencies> {
    let half = d_model / 2;
    let base = 10f64.powf(coeff);
    let freq = |channel: usize| (base * 10f64.powf(-4.0 * channel as f64 / d_model as f64)) as f32;

    let even: Vec<f32> = (0..half).map(|k| freq(2 * k)).collect();
    let odd: Vec<f32> = (0..half).map(|k| freq(2 * k + 1)).collect();

    Ok(ContinuousFrequencies {
        even: Tensor::from_vec(even, (1, half), device)?,
        odd: Tensor::from_vec(odd, (1, half), device)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        mode: PositionalEncodingMode,
        d_model: usize,
        domain_dim: usize,
    ) -> SimpleEncoderConfig {
        SimpleEncoderConfig {
            d_model,
            domain_dim,
            positional_encoding: mode,
            ..SimpleEncoderConfig::test()
        }
    }

    fn linspace(n: usize, device: &Device) -> Tensor {
        let values: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();
        Tensor::from_vec(values, (n, 1), device).unwrap()
    }

    #[test]
    fn test_discrete_first_rows() {
        let device = Device::Cpu;
        let enc = PositionalEncoder::new(&config(PositionalEncodingMode::Discrete, 8, 1), &device)
            .unwrap();
        let coords = linspace(3, &device);
        let pe: Vec<Vec<f32>> = enc.encode(3, &coords).unwrap().to_vec2().unwrap();

        // Position 0: sin(0) = 0, cos(0) = 1
        assert_eq!(pe[0], vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        // Position 1, channel pair 0: frequency 1
        assert!((pe[1][0] - 1f32.sin()).abs() < 1e-6);
        assert!((pe[1][1] - 1f32.cos()).abs() < 1e-6);
        // Position 2, channel pair 1: frequency 10000^(-2/8)
        let angle = 2.0 * 10000f32.powf(-2.0 / 8.0);
        assert!((pe[2][2] - angle.sin()).abs() < 1e-5);
        assert!((pe[2][3] - angle.cos()).abs() < 1e-5);
    }

    #[test]
    fn test_discrete_independent_of_content() {
        let device = Device::Cpu;
        let enc = PositionalEncoder::new(&config(PositionalEncodingMode::Discrete, 8, 1), &device)
            .unwrap();
        let a = Tensor::from_vec(vec![0.1f32, 0.2, 0.3, 0.4], (4, 1), &device).unwrap();
        let b = Tensor::from_vec(vec![9.0f32, -3.0, 7.5, 0.0], (4, 1), &device).unwrap();

        let pe_a: Vec<Vec<f32>> = enc.encode(4, &a).unwrap().to_vec2().unwrap();
        let pe_b: Vec<Vec<f32>> = enc.encode(4, &b).unwrap().to_vec2().unwrap();
        assert_eq!(pe_a, pe_b);
    }

    #[test]
    fn test_discrete_rejects_long_sequence() {
        let device = Device::Cpu;
        let mut cfg = config(PositionalEncodingMode::Discrete, 8, 1);
        cfg.max_sequence_length = 4;
        let enc = PositionalEncoder::new(&cfg, &device).unwrap();
        let coords = linspace(5, &device);

        let err = enc.encode(5, &coords).unwrap_err();
        assert!(matches!(err, SimpleEncoderError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_continuous_single_axis_formula() {
        let device = Device::Cpu;
        let d_model = 8;
        let coeff = 2.0;
        let enc = PositionalEncoder::new(
            &config(PositionalEncodingMode::Continuous, d_model, 1),
            &device,
        )
        .unwrap();

        let coords = linspace(5, &device);
        let c: Vec<f32> = coords.flatten_all().unwrap().to_vec1().unwrap();
        let pe: Vec<Vec<f32>> = enc.encode(5, &coords).unwrap().to_vec2().unwrap();

        for (row, &ci) in c.iter().enumerate() {
            for ch in 0..d_model {
                let freq = 10f64.powf(coeff) * 10f64.powf(-4.0 * ch as f64 / d_model as f64);
                let angle = freq * ci as f64;
                let expected = if ch % 2 == 0 { angle.sin() } else { angle.cos() };
                assert!(
                    (pe[row][ch] as f64 - expected).abs() < 1e-4,
                    "row {row} channel {ch}: {} vs {expected}",
                    pe[row][ch]
                );
            }
        }
    }

    #[test]
    fn test_continuous_two_axes_is_product() {
        let device = Device::Cpu;
        let d_model = 6;
        let enc = PositionalEncoder::new(
            &config(PositionalEncodingMode::Continuous, d_model, 2),
            &device,
        )
        .unwrap();
        let single = PositionalEncoder::new(
            &config(PositionalEncodingMode::Continuous, d_model, 1),
            &device,
        )
        .unwrap();

        let xs = vec![0.0f32, 0.25, 0.5];
        let ys = vec![0.75f32, 0.1, 0.3];
        let coords_2d: Vec<f32> = xs.iter().zip(&ys).flat_map(|(&x, &y)| [x, y]).collect();
        let coords_2d = Tensor::from_vec(coords_2d, (3, 2), &device).unwrap();
        let coords_x = Tensor::from_vec(xs, (3, 1), &device).unwrap();
        let coords_y = Tensor::from_vec(ys, (3, 1), &device).unwrap();

        let joint: Vec<Vec<f32>> = enc.encode(3, &coords_2d).unwrap().to_vec2().unwrap();
        let px: Vec<Vec<f32>> = single.encode(3, &coords_x).unwrap().to_vec2().unwrap();
        let py: Vec<Vec<f32>> = single.encode(3, &coords_y).unwrap().to_vec2().unwrap();

        for row in 0..3 {
            for ch in 0..d_model {
                let expected = px[row][ch] * py[row][ch];
                assert!((joint[row][ch] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_continuous_rejects_wrong_domain() {
        let device = Device::Cpu;
        let enc = PositionalEncoder::new(
            &config(PositionalEncodingMode::Continuous, 8, 2),
            &device,
        )
        .unwrap();
        let coords = linspace(4, &device);
        let err = enc.encode(4, &coords).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_none_is_zero() {
        let device = Device::Cpu;
        let enc =
            PositionalEncoder::new(&config(PositionalEncodingMode::None, 8, 1), &device).unwrap();
        let coords = linspace(4, &device);
        let pe = enc.encode(4, &coords).unwrap();
        assert_eq!(pe.dims(), &[4, 8]);
        let total: f32 = pe.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(total, 0.0);
    }
}
