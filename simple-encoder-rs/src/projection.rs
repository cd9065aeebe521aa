//! Input and output projections between feature space and the latent width.
//!
//! The input side optionally prepends an initial condition taken from the
//! target, optionally appends raw coordinates to the feature axis, projects
//! to `d_model` and adds the positional encoding. The output side projects
//! back and drops the prepended rows.

use candle_core::{Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::config::{InitialConditionMode, SimpleEncoderConfig};
use crate::error::{SimpleEncoderError, SimpleEncoderResult};
use crate::positional::PositionalEncoder;

/// Marker added to every channel of a uniform initial-condition row.
pub const UNIFORM_MARKER: f32 = 2.0;

/// Additive latent marker for each prepended initial-condition row.
pub fn initial_condition_markers(mode: InitialConditionMode, rows: usize) -> Vec<f32> {
    match mode {
        InitialConditionMode::Off => Vec::new(),
        InitialConditionMode::Uniform => vec![UNIFORM_MARKER; rows],
        InitialConditionMode::Staggered => (0..rows).map(|r| (r + 2) as f32).collect(),
    }
}

/// Prepends the first target sample to the input as `output_dim` rows.
///
/// Component `j` of `y[:, 0, :]` becomes row `output_dim - 1 - j`, so the
/// reversed block ends right before the genuine input. Prepended coordinate
/// rows are zero.
#[derive(Debug, Clone)]
pub struct InitialConditionInjector {
    mode: InitialConditionMode,
    output_dim: usize,
    domain_dim: usize,
}

impl InitialConditionInjector {
    /// Create an injector for `config`.
    pub fn new(config: &SimpleEncoderConfig) -> Self {
        Self {
            mode: config.include_y0_input,
            output_dim: config.output_dim,
            domain_dim: config.domain_dim,
        }
    }

    /// Injection mode
    pub fn mode(&self) -> InitialConditionMode {
        self.mode
    }

    /// Rows added in front of the input sequence.
    pub fn rows(&self) -> usize {
        if self.mode.is_active() {
            self.output_dim
        } else {
            0
        }
    }

    /// Returns `(x, coords)` with the initial-condition block prepended.
    ///
    /// `x`: (batch, input_len, 1), `y`: (batch, output_len, output_dim),
    /// `coords`: (input_len, domain_dim).
    pub fn prepend(
        &self,
        x: &Tensor,
        y: &Tensor,
        coords: &Tensor,
    ) -> SimpleEncoderResult<(Tensor, Tensor)> {
        if !self.mode.is_active() {
            return Ok((x.clone(), coords.clone()));
        }

        let device = x.device();
        // (batch, 1, output_dim) -> (batch, output_dim, 1)
        let y0 = y.narrow(1, 0, 1)?.transpose(1, 2)?.contiguous()?;
        let reversed: Vec<u32> = (0..self.output_dim as u32).rev().collect();
        let reversed = Tensor::new(reversed, device)?;
        let y0 = y0.index_select(&reversed, 1)?.to_dtype(x.dtype())?;
        let x = Tensor::cat(&[&y0, x], 1)?;

        let zero_coords =
            Tensor::zeros((self.output_dim, self.domain_dim), coords.dtype(), device)?;
        let coords = Tensor::cat(&[&zero_coords, coords], 0)?;

        Ok((x, coords))
    }

    /// Latent-space markers for the prepended rows: (rows, d_model).
    pub fn marker_rows(&self, d_model: usize, device: &Device) -> SimpleEncoderResult<Tensor> {
        let rows = self.rows();
        let values: Vec<f32> = initial_condition_markers(self.mode, rows)
            .into_iter()
            .flat_map(|m| std::iter::repeat(m).take(d_model))
            .collect();
        Ok(Tensor::from_vec(values, (rows, d_model), device)?)
    }
}

/// Maps per-position features (optionally augmented) to `d_model`.
pub struct InputProjector {
    linear: Linear,
    injector: InitialConditionInjector,
    append_position: bool,
    in_features: usize,
    d_model: usize,
}

impl InputProjector {
    /// Prefix of the projection weights; depends on whether coordinates
    /// are appended to the features.
    pub fn prefix(config: &SimpleEncoderConfig) -> &'static str {
        if config.append_position_to_x {
            "linear_in_position"
        } else {
            "linear_in"
        }
    }

    /// Parameter names relative to [`InputProjector::prefix`].
    pub const PARAMETERS: &'static [&'static str] = &["weight", "bias"];

    /// Create the projector. Only the projection the configured mode needs
    /// is allocated.
    pub fn new(config: &SimpleEncoderConfig, vb: VarBuilder) -> SimpleEncoderResult<Self> {
        let in_features = config.input_projection_width();
        let linear = linear(in_features, config.d_model, vb)?;

        Ok(Self {
            linear,
            injector: InitialConditionInjector::new(config),
            append_position: config.append_position_to_x,
            in_features,
            d_model: config.d_model,
        })
    }

    /// Column count of the projection weight.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Rows prepended by initial-condition injection.
    pub fn prepended_rows(&self) -> usize {
        self.injector.rows()
    }

    /// Steps 1 and 2: inject, augment and project.
    ///
    /// Returns the latent `(batch, input_len + prepended, d_model)`.
    pub fn project(
        &self,
        x: &Tensor,
        y: Option<&Tensor>,
        coords: &Tensor,
    ) -> SimpleEncoderResult<Tensor> {
        let (x, coords) = if self.injector.mode().is_active() {
            let y = y.ok_or(SimpleEncoderError::MissingTarget)?;
            self.injector.prepend(x, y, coords)?
        } else {
            (x.clone(), coords.clone())
        };

        let features = if self.append_position {
            let (batch, seq_len, _) = x.dims3()?;
            let domain_dim = coords.dim(1)?;
            let coords = coords
                .to_dtype(x.dtype())?
                .unsqueeze(0)?
                .broadcast_as((batch, seq_len, domain_dim))?;
            Tensor::cat(&[&x, &coords], 2)?
        } else {
            x
        };

        Ok(self.linear.forward(&features)?)
    }

    /// Full input path: project, then add positional encoding to the genuine
    /// rows and markers to the prepended rows.
    pub fn forward(
        &self,
        x: &Tensor,
        y: Option<&Tensor>,
        coords: &Tensor,
        positional: &PositionalEncoder,
    ) -> SimpleEncoderResult<Tensor> {
        let input_len = x.dim(1)?;
        let latent = self.project(x, y, coords)?;
        let pe = positional.encode(input_len, coords)?;

        let additive = if self.injector.rows() > 0 {
            let markers = self.injector.marker_rows(self.d_model, latent.device())?;
            Tensor::cat(&[&markers, &pe], 0)?
        } else {
            pe
        };

        Ok(latent.broadcast_add(&additive)?)
    }
}

/// Maps latent vectors back to `output_dim` and strips prepended rows.
pub struct OutputProjector {
    linear: Linear,
    strip: usize,
}

impl OutputProjector {
    /// Prefix of the projection weights.
    pub const PREFIX: &'static str = "linear_out";

    /// Parameter names relative to [`OutputProjector::PREFIX`].
    pub const PARAMETERS: &'static [&'static str] = &["weight", "bias"];

    /// Create the projector
    pub fn new(config: &SimpleEncoderConfig, vb: VarBuilder) -> SimpleEncoderResult<Self> {
        let linear = linear(config.d_model, config.output_dim, vb)?;
        Ok(Self {
            linear,
            strip: config.initial_condition_rows(),
        })
    }

    /// Per-position projection without stripping: (batch, seq, output_dim).
    pub fn project(&self, latent: &Tensor) -> SimpleEncoderResult<Tensor> {
        Ok(self.linear.forward(latent)?)
    }

    /// Projection with the initial-condition rows removed.
    pub fn forward(&self, latent: &Tensor) -> SimpleEncoderResult<Tensor> {
        let out = self.project(latent)?;
        if self.strip == 0 {
            return Ok(out);
        }
        let seq_len = out.dim(1)?;
        if seq_len < self.strip {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("at least {} latent rows", self.strip),
                seq_len.to_string(),
            ));
        }
        Ok(out.narrow(1, self.strip, seq_len - self.strip)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PositionalEncodingMode;
    use candle_core::DType;
    use candle_nn::VarMap;

    fn coords(n: usize, device: &Device) -> Tensor {
        let values: Vec<f32> = (0..n).map(|i| i as f32 * 0.1).collect();
        Tensor::from_vec(values, (n, 1), device).unwrap()
    }

    #[test]
    fn test_markers() {
        assert!(initial_condition_markers(InitialConditionMode::Off, 3).is_empty());
        assert_eq!(
            initial_condition_markers(InitialConditionMode::Uniform, 3),
            vec![2.0, 2.0, 2.0]
        );
        assert_eq!(
            initial_condition_markers(InitialConditionMode::Staggered, 3),
            vec![2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_prepend_reverses_first_target_sample() {
        let device = Device::Cpu;
        let mut config = SimpleEncoderConfig::test();
        config.output_dim = 3;
        config.include_y0_input = InitialConditionMode::Uniform;
        let injector = InitialConditionInjector::new(&config);

        let x = Tensor::from_vec(vec![10f32, 11.0], (1, 2, 1), &device).unwrap();
        // y[0, 0, :] = [1, 2, 3]; later samples are ignored
        let y = Tensor::from_vec(vec![1f32, 2.0, 3.0, 7.0, 8.0, 9.0], (1, 2, 3), &device).unwrap();
        let (x_aug, c_aug) = injector.prepend(&x, &y, &coords(2, &device)).unwrap();

        let x_aug: Vec<f32> = x_aug.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(x_aug, vec![3.0, 2.0, 1.0, 10.0, 11.0]);

        let c_aug: Vec<f32> = c_aug.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(c_aug.len(), 5);
        assert_eq!(&c_aug[..3], &[0.0, 0.0, 0.0]);
        assert!((c_aug[4] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_append_position_widens_projection() {
        let device = Device::Cpu;
        let mut config = SimpleEncoderConfig::test();
        config.input_dim = 1;
        config.domain_dim = 2;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let plain = InputProjector::new(&config, vb.pp(InputProjector::prefix(&config))).unwrap();

        config.append_position_to_x = true;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let appended =
            InputProjector::new(&config, vb.pp(InputProjector::prefix(&config))).unwrap();

        assert_eq!(appended.in_features(), plain.in_features() + config.domain_dim);
        // Only the position-aware projection exists in this mode
        let data = varmap.data().lock().unwrap();
        assert!(data.contains_key("linear_in_position.weight"));
        assert!(!data.contains_key("linear_in.weight"));
        assert_eq!(data["linear_in_position.weight"].dims(), &[config.d_model, 3]);
    }

    #[test]
    fn test_missing_target_is_reported() {
        let device = Device::Cpu;
        let mut config = SimpleEncoderConfig::test();
        config.include_y0_input = InitialConditionMode::Staggered;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let projector = InputProjector::new(&config, vb).unwrap();

        let x = Tensor::zeros((2, 4, 1), DType::F32, &device).unwrap();
        let err = projector.project(&x, None, &coords(4, &device)).unwrap_err();
        assert!(matches!(err, SimpleEncoderError::MissingTarget));
    }

    #[test]
    fn test_markers_and_encoding_split() {
        // With zero weights the latent is bias-only (zero), so the result is
        // exactly markers on prepended rows and encoding on the rest.
        let device = Device::Cpu;
        let mut config = SimpleEncoderConfig::test();
        config.output_dim = 2;
        config.include_y0_input = InitialConditionMode::Staggered;
        config.positional_encoding = PositionalEncodingMode::Discrete;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let projector = InputProjector::new(&config, vb).unwrap();
        for var in varmap.all_vars() {
            var.set(&var.zeros_like().unwrap()).unwrap();
        }
        let positional = PositionalEncoder::new(&config, &device).unwrap();

        let x = Tensor::ones((1, 3, 1), DType::F32, &device).unwrap();
        let y = Tensor::ones((1, 3, 2), DType::F32, &device).unwrap();
        let c = coords(3, &device);
        let latent = projector.forward(&x, Some(&y), &c, &positional).unwrap();
        assert_eq!(latent.dims(), &[1, 5, config.d_model]);

        let rows: Vec<Vec<f32>> = latent.squeeze(0).unwrap().to_vec2().unwrap();
        assert!(rows[0].iter().all(|&v| v == 2.0));
        assert!(rows[1].iter().all(|&v| v == 3.0));

        let pe: Vec<Vec<f32>> = positional.encode(3, &c).unwrap().to_vec2().unwrap();
        assert_eq!(rows[2], pe[0]);
        assert_eq!(rows[4], pe[2]);
    }

    #[test]
    fn test_output_strips_prepended_rows() {
        let device = Device::Cpu;
        let mut config = SimpleEncoderConfig::test();
        config.output_dim = 2;
        config.include_y0_input = InitialConditionMode::Uniform;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let projector = OutputProjector::new(&config, vb).unwrap();

        let latent = Tensor::randn(0f32, 1.0, (3, 7, config.d_model), &device).unwrap();
        let raw = projector.project(&latent).unwrap();
        let out = projector.forward(&latent).unwrap();
        assert_eq!(raw.dims(), &[3, 7, 2]);
        assert_eq!(out.dims(), &[3, 5, 2]);
    }
}
