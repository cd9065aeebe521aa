//! Model and training configuration.
//!
//! Every mode flag that changes tensor shapes downstream is a closed enum and
//! is cross-checked by [`SimpleEncoderConfig::validate`] before any tensor is
//! allocated.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SimpleEncoderError, SimpleEncoderResult};

/// How positional information is injected into the latent sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionalEncodingMode {
    /// Fixed sinusoidal table indexed by integer position.
    Discrete,
    /// Sinusoids evaluated directly at real-valued coordinates.
    #[default]
    Continuous,
    /// No positional information.
    None,
}

impl PositionalEncodingMode {
    /// Whether this mode produces sin/cos channel pairs.
    pub fn is_sinusoidal(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Initial-condition injection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialConditionMode {
    /// The input sequence is used as-is.
    #[default]
    Off,
    /// Prepended rows get the same additive marker.
    Uniform,
    /// Prepended row `r` gets the additive marker `2 + r`.
    Staggered,
}

impl InitialConditionMode {
    /// Whether initial-condition rows are prepended.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Feed-forward activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Gelu,
}

/// Placement of layer normalization relative to the residual branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormPlacement {
    /// Normalize the input of each sub-block.
    Pre,
    /// Normalize after each residual addition.
    #[default]
    Post,
}

/// Configuration for the simple encoder model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleEncoderConfig {
    /// Feature width of each input sample
    pub input_dim: usize,
    /// Feature width of each output sample
    pub output_dim: usize,
    /// Coordinate dimensionality (1 for time series, 2 for planar fields)
    pub domain_dim: usize,
    /// Latent width shared by every encoder block
    pub d_model: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Number of encoder blocks
    pub num_layers: usize,
    /// Rows of the discrete positional table
    pub max_sequence_length: usize,
    /// Feed-forward hidden width
    pub dim_feedforward: usize,
    /// Dropout probability inside attention and feed-forward paths
    pub dropout: f32,
    /// Feed-forward activation
    pub activation: Activation,
    /// Normalization placement
    pub norm_placement: NormPlacement,
    /// Layer norm epsilon
    pub layer_norm_eps: f64,
    /// Run the attention stack; `false` leaves only projections and encoding
    pub use_transformer: bool,
    /// Positional encoding mode
    pub positional_encoding: PositionalEncodingMode,
    /// Concatenate raw coordinates onto the feature axis before projection
    pub append_position_to_x: bool,
    /// Initial-condition injection mode
    pub include_y0_input: InitialConditionMode,
    /// Base-10 exponent scaling the continuous encoding frequencies
    pub pos_enc_coeff: f64,
}

impl Default for SimpleEncoderConfig {
    fn default() -> Self {
        Self {
            input_dim: 1,
            output_dim: 1,
            domain_dim: 1,
            d_model: 32,
            num_heads: 8,
            num_layers: 6,
            max_sequence_length: 100,
            dim_feedforward: 2048,
            dropout: 0.1,
            activation: Activation::Relu,
            norm_placement: NormPlacement::Post,
            layer_norm_eps: 1e-5,
            use_transformer: true,
            positional_encoding: PositionalEncodingMode::Continuous,
            append_position_to_x: false,
            include_y0_input: InitialConditionMode::Off,
            pos_enc_coeff: 2.0,
        }
    }
}

impl SimpleEncoderConfig {
    /// Test configuration (minimal for unit tests)
    pub fn test() -> Self {
        Self {
            d_model: 8,
            num_heads: 2,
            num_layers: 1,
            max_sequence_length: 32,
            dim_feedforward: 16,
            dropout: 0.0,
            ..Self::default()
        }
    }

    /// Controlled-ODE time-series setup: coordinates appended to the input,
    /// no additive positional encoding.
    pub fn cde_1d() -> Self {
        Self {
            d_model: 128,
            num_heads: 8,
            num_layers: 6,
            max_sequence_length: 500,
            dim_feedforward: 128,
            dropout: 1e-4,
            activation: Activation::Gelu,
            positional_encoding: PositionalEncodingMode::None,
            append_position_to_x: true,
            ..Self::default()
        }
    }

    /// Planar field regression with continuous encoding over 2D coordinates.
    pub fn spatial_2d() -> Self {
        Self {
            domain_dim: 2,
            d_model: 64,
            num_heads: 8,
            num_layers: 4,
            dim_feedforward: 128,
            dropout: 1e-4,
            activation: Activation::Gelu,
            positional_encoding: PositionalEncodingMode::Continuous,
            append_position_to_x: true,
            ..Self::default()
        }
    }

    /// Column count of the input projection.
    pub fn input_projection_width(&self) -> usize {
        if self.append_position_to_x {
            self.input_dim + self.domain_dim
        } else {
            self.input_dim
        }
    }

    /// Number of rows prepended by initial-condition injection.
    pub fn initial_condition_rows(&self) -> usize {
        if self.include_y0_input.is_active() {
            self.output_dim
        } else {
            0
        }
    }

    /// Length of the latent sequence for an input of `input_len` samples.
    pub fn latent_sequence_len(&self, input_len: usize) -> usize {
        input_len + self.initial_condition_rows()
    }

    /// Head dimension
    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> SimpleEncoderResult<()> {
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(SimpleEncoderError::invalid_config(
                "input_dim and output_dim must be > 0",
            ));
        }
        if self.domain_dim == 0 {
            return Err(SimpleEncoderError::invalid_config("domain_dim must be > 0"));
        }
        if self.d_model == 0 {
            return Err(SimpleEncoderError::invalid_config("d_model must be > 0"));
        }
        if self.positional_encoding.is_sinusoidal() && self.d_model % 2 != 0 {
            return Err(SimpleEncoderError::invalid_config(format!(
                "d_model must be even for {:?} positional encoding, got {}",
                self.positional_encoding, self.d_model
            )));
        }
        if self.positional_encoding == PositionalEncodingMode::Discrete
            && self.max_sequence_length == 0
        {
            return Err(SimpleEncoderError::invalid_config(
                "max_sequence_length must be > 0 for discrete positional encoding",
            ));
        }
        if !self.pos_enc_coeff.is_finite() {
            return Err(SimpleEncoderError::invalid_config(
                "pos_enc_coeff must be finite",
            ));
        }
        if self.use_transformer {
            if self.num_heads == 0 || self.d_model % self.num_heads != 0 {
                return Err(SimpleEncoderError::invalid_config(format!(
                    "d_model ({}) must be divisible by num_heads ({})",
                    self.d_model, self.num_heads
                )));
            }
            if self.dim_feedforward == 0 {
                return Err(SimpleEncoderError::invalid_config(
                    "dim_feedforward must be > 0",
                ));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(SimpleEncoderError::invalid_config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.layer_norm_eps <= 0.0 {
            return Err(SimpleEncoderError::invalid_config(
                "layer_norm_eps must be > 0",
            ));
        }
        // Each initial-condition component becomes one row of width input_dim.
        if self.include_y0_input.is_active() && self.input_dim != 1 {
            return Err(SimpleEncoderError::invalid_config(format!(
                "include_y0_input={:?} requires input_dim == 1, got {}",
                self.include_y0_input, self.input_dim
            )));
        }
        Ok(())
    }
}

/// Reduce-on-plateau schedule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    /// Epochs without improvement tolerated before reducing
    pub patience: usize,
    /// Multiplier applied to the learning rate on reduction
    pub factor: f64,
    /// Relative improvement required to count as better
    pub threshold: f64,
    /// Epochs to wait after a reduction before counting again
    pub cooldown: usize,
    /// Lower bound on the learning rate
    pub min_lr: f64,
    /// Reductions smaller than this are ignored
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            patience: 3,
            factor: 0.5,
            threshold: 1e-4,
            cooldown: 0,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

/// Optimizer, schedule and epoch-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Initial learning rate
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta1: f64,
    /// Adam second-moment decay
    pub beta2: f64,
    /// Adam epsilon
    pub adam_eps: f64,
    /// Number of epochs run by `fit`
    pub max_epochs: usize,
    /// Metric channel the plateau schedule watches
    pub monitor_metric: String,
    /// Plateau schedule parameters
    pub lr_scheduler: PlateauConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            beta1: 0.9,
            beta2: 0.999,
            adam_eps: 1e-8,
            max_epochs: 100,
            monitor_metric: "loss/train/mse".to_string(),
            lr_scheduler: PlateauConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Check value ranges.
    pub fn validate(&self) -> SimpleEncoderResult<()> {
        if !(self.learning_rate > 0.0) {
            return Err(SimpleEncoderError::invalid_config(
                "learning_rate must be > 0",
            ));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(SimpleEncoderError::invalid_config(
                "Adam betas must be in [0, 1)",
            ));
        }
        if self.monitor_metric.is_empty() {
            return Err(SimpleEncoderError::invalid_config(
                "monitor_metric is required",
            ));
        }
        let factor = self.lr_scheduler.factor;
        if !(factor > 0.0 && factor < 1.0) {
            return Err(SimpleEncoderError::invalid_config(format!(
                "lr_scheduler.factor must be in (0, 1), got {factor}"
            )));
        }
        if self.lr_scheduler.min_lr < 0.0 {
            return Err(SimpleEncoderError::invalid_config(
                "lr_scheduler.min_lr must be >= 0",
            ));
        }
        Ok(())
    }
}

/// A full experiment: model plus training settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Model configuration
    pub model: SimpleEncoderConfig,
    /// Training configuration
    pub training: TrainingConfig,
}

impl ExperimentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SimpleEncoderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> SimpleEncoderResult<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate both halves.
    pub fn validate(&self) -> SimpleEncoderResult<()> {
        self.model.validate()?;
        self.training.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(SimpleEncoderConfig::default().validate().is_ok());
        assert!(SimpleEncoderConfig::test().validate().is_ok());
        assert!(SimpleEncoderConfig::cde_1d().validate().is_ok());
        assert!(SimpleEncoderConfig::spatial_2d().validate().is_ok());
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_input_projection_width() {
        let mut config = SimpleEncoderConfig::test();
        config.input_dim = 3;
        config.domain_dim = 2;
        assert_eq!(config.input_projection_width(), 3);

        config.append_position_to_x = true;
        assert_eq!(config.input_projection_width(), 5);
    }

    #[test]
    fn test_latent_sequence_len() {
        let mut config = SimpleEncoderConfig::test();
        config.output_dim = 3;
        assert_eq!(config.latent_sequence_len(10), 10);

        config.include_y0_input = InitialConditionMode::Staggered;
        assert_eq!(config.latent_sequence_len(10), 13);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let mut config = SimpleEncoderConfig::test();
        config.num_heads = 3;
        assert!(config.validate().is_err());

        // Heads are irrelevant once the attention stack is ablated
        config.use_transformer = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_odd_width_with_sinusoids() {
        let mut config = SimpleEncoderConfig::test();
        config.d_model = 7;
        config.num_heads = 1;
        assert!(config.validate().is_err());

        config.positional_encoding = PositionalEncodingMode::None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_initial_condition_requires_scalar_input() {
        let mut config = SimpleEncoderConfig::test();
        config.include_y0_input = InitialConditionMode::Uniform;
        assert!(config.validate().is_ok());

        config.input_dim = 2;
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_unknown_mode_string_is_rejected() {
        let yaml = "positional_encoding: learned\n";
        assert!(serde_yaml::from_str::<SimpleEncoderConfig>(yaml).is_err());

        let yaml = "include_y0_input: diagonal\n";
        assert!(serde_yaml::from_str::<SimpleEncoderConfig>(yaml).is_err());

        let yaml = "include_y0_input: staggered\npositional_encoding: discrete\n";
        let config: SimpleEncoderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.include_y0_input, InitialConditionMode::Staggered);
        assert_eq!(config.positional_encoding, PositionalEncodingMode::Discrete);
        assert_eq!(config.d_model, 32);
    }

    #[test]
    fn test_training_config_validation() {
        let mut config = TrainingConfig::default();
        config.lr_scheduler.factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.monitor_metric.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_experiment_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.yaml");

        let mut experiment = ExperimentConfig::default();
        experiment.model = SimpleEncoderConfig::cde_1d();
        experiment.training.monitor_metric = "loss/val/mse".into();
        experiment.training.lr_scheduler.patience = 2;
        experiment.to_file(&path).unwrap();

        let restored = ExperimentConfig::from_file(&path).unwrap();
        assert_eq!(restored, experiment);
    }
}
