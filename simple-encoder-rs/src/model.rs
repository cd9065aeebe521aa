//! The full encoder: input projection, positional encoding, encoder stack and
//! output projection.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::config::SimpleEncoderConfig;
use crate::data::Batch;
use crate::encoder::SequenceEncoder;
use crate::error::{SimpleEncoderError, SimpleEncoderResult};
use crate::params::ParameterRegistry;
use crate::positional::PositionalEncoder;
use crate::projection::{InputProjector, OutputProjector};

/// Prefix of the encoder stack's weights.
const ENCODER_PREFIX: &str = "encoder";

/// Sequence-to-sequence encoder over sampled functions.
pub struct SimpleEncoderModel {
    input: InputProjector,
    positional: PositionalEncoder,
    encoder: SequenceEncoder,
    output: OutputProjector,
    config: SimpleEncoderConfig,
    device: Device,
    /// VarMap for accessing parameters
    var_map: VarMap,
    parameters: ParameterRegistry,
}

impl SimpleEncoderModel {
    /// Create a new model with random initialization.
    ///
    /// The configuration is validated before anything is allocated.
    pub fn new(config: &SimpleEncoderConfig, device: &Device) -> SimpleEncoderResult<Self> {
        config.validate()?;

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let input_prefix = InputProjector::prefix(config);
        let input = InputProjector::new(config, vb.pp(input_prefix))?;
        let positional = PositionalEncoder::new(config, device)?;
        let encoder = SequenceEncoder::new(config, vb.pp(ENCODER_PREFIX))?;
        let output = OutputProjector::new(config, vb.pp(OutputProjector::PREFIX))?;

        let mut parameters = ParameterRegistry::new();
        parameters.register_all(&var_map, input_prefix, InputProjector::PARAMETERS)?;
        parameters.register_all(&var_map, ENCODER_PREFIX, encoder.parameter_names().as_slice())?;
        parameters.register_all(&var_map, OutputProjector::PREFIX, OutputProjector::PARAMETERS)?;

        tracing::debug!(
            "Built encoder: {} tensors, {} parameters, {} layers",
            parameters.len(),
            parameters.parameter_count(),
            encoder.num_layers()
        );

        Ok(Self {
            input,
            positional,
            encoder,
            output,
            config: config.clone(),
            device: device.clone(),
            var_map,
            parameters,
        })
    }

    /// Check the input tensors against the configuration.
    fn check_inputs(
        &self,
        x: &Tensor,
        y: Option<&Tensor>,
        coords: &Tensor,
    ) -> SimpleEncoderResult<()> {
        let (batch, input_len, input_dim) = x.dims3()?;
        if input_dim != self.config.input_dim {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("input_dim {}", self.config.input_dim),
                input_dim.to_string(),
            ));
        }

        let (coord_len, domain_dim) = coords.dims2()?;
        if domain_dim != self.config.domain_dim {
            return Err(SimpleEncoderError::invalid_config(format!(
                "coordinates have domain_dim {domain_dim}, model expects {}",
                self.config.domain_dim
            )));
        }
        if coord_len != input_len {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("{input_len} coordinate rows"),
                coord_len.to_string(),
            ));
        }

        if self.config.include_y0_input.is_active() {
            let y = y.ok_or(SimpleEncoderError::MissingTarget)?;
            let (y_batch, y_len, output_dim) = y.dims3()?;
            if y_batch != batch || output_dim != self.config.output_dim || y_len == 0 {
                return Err(SimpleEncoderError::shape_mismatch(
                    format!("target ({batch}, >=1, {})", self.config.output_dim),
                    format!("{:?}", y.dims()),
                ));
            }
        }
        Ok(())
    }

    /// Forward pass
    /// Input: x (batch, input_len, input_dim), coords (input_len, domain_dim);
    /// `y` is only read when initial-condition injection is enabled.
    /// Output: (batch, input_len, output_dim)
    pub fn forward(
        &self,
        x: &Tensor,
        y: Option<&Tensor>,
        coords: &Tensor,
        train: bool,
    ) -> SimpleEncoderResult<Tensor> {
        self.check_inputs(x, y, coords)?;
        let latent = self.input.forward(x, y, coords, &self.positional)?;
        let hidden = self.encoder.forward(&latent, train)?;
        self.output.forward(&hidden)
    }

    /// Forward pass over a [`Batch`].
    pub fn forward_batch(&self, batch: &Batch, train: bool) -> SimpleEncoderResult<Tensor> {
        let y = self
            .config
            .include_y0_input
            .is_active()
            .then_some(&batch.y);
        self.forward(&batch.x, y, &batch.coords_x, train)
    }

    /// Positional encoding the model would add for `coords`: (seq_len, d_model).
    pub fn positional_encoding(
        &self,
        seq_len: usize,
        coords: &Tensor,
    ) -> SimpleEncoderResult<Tensor> {
        self.positional.encode(seq_len, coords)
    }

    /// Latent after input projection, then the output of every encoder block,
    /// computed without dropout.
    pub fn layer_outputs(
        &self,
        x: &Tensor,
        y: Option<&Tensor>,
        coords: &Tensor,
    ) -> SimpleEncoderResult<Vec<Tensor>> {
        self.check_inputs(x, y, coords)?;
        let latent = self.input.forward(x, y, coords, &self.positional)?;
        Ok(self.encoder.forward_layers(&latent, false)?)
    }

    /// Get the VarMap for parameter access
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Named parameters in registration order.
    pub fn parameters(&self) -> &ParameterRegistry {
        &self.parameters
    }

    /// Get the configuration
    pub fn config(&self) -> &SimpleEncoderConfig {
        &self.config
    }

    /// Get the device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Total trainable scalar count
    pub fn parameter_count(&self) -> usize {
        self.parameters.parameter_count()
    }
}
