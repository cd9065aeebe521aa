//! Transformer encoder operator for sampled functions, in pure Rust on candle
//!
//! This crate maps a function sampled on a coordinate grid to another function
//! on the same grid, providing:
//! - Discrete and continuous (coordinate-driven) sinusoidal positional encodings
//! - Optional initial-condition injection with latent markers
//! - Optional appending of raw coordinates to the input features
//! - A non-causal self-attention encoder stack with pre- or post-norm blocks
//! - A training orchestrator with MSE/sup-norm losses, Adam, a reduce-on-plateau
//!   schedule and multi-resolution test evaluation
//!
//! # Example
//!
//! ```no_run
//! use simple_encoder_rs::{SimpleEncoderConfig, SimpleEncoderModel};
//! use candle_core::{Device, Tensor};
//!
//! let config = SimpleEncoderConfig::test();
//! let device = Device::Cpu;
//! let model = SimpleEncoderModel::new(&config, &device).unwrap();
//!
//! let x = Tensor::randn(0f32, 1.0, (2, 5, 1), &device).unwrap();
//! let coords = Tensor::arange(0f32, 5.0, &device).unwrap().reshape((5, 1)).unwrap();
//! let y = model.forward(&x, None, &coords, false).unwrap();
//! assert_eq!(y.dims(), &[2, 5, 1]);
//! ```
//!
//! # Training
//!
//! ```no_run
//! use simple_encoder_rs::prelude::*;
//! use candle_core::Device;
//!
//! # fn main() -> SimpleEncoderResult<()> {
//! let model = SimpleEncoderModel::new(&SimpleEncoderConfig::cde_1d(), &Device::Cpu)?;
//! let mut trainer = TrainingOrchestrator::new(model, TrainingConfig::default())?
//!     .with_sink(Box::new(TracingSink));
//! # let (train, val, streams): (Vec<Batch>, Vec<Batch>, Vec<TestStream>) = Default::default();
//! trainer.fit(&train, &val)?;
//! trainer.test(&streams)?;
//! # Ok(())
//! # }
//! ```

pub mod attention;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod layer;
pub mod metrics;
pub mod model;
pub mod norm;
pub mod optimizer;
pub mod params;
pub mod positional;
pub mod projection;
pub mod scheduler;
pub mod trainer;

pub use config::{
    Activation, ExperimentConfig, InitialConditionMode, NormPlacement, PlateauConfig,
    PositionalEncodingMode, SimpleEncoderConfig, TrainingConfig,
};
pub use data::{Batch, TestStream};
pub use error::{SimpleEncoderError, SimpleEncoderResult};
pub use metrics::{
    EpochAccumulator, EpochMetrics, InMemorySink, JsonLinesSink, MetricRecord, MetricSink,
    MetricSinkError, Stage, TracingSink,
};
pub use model::SimpleEncoderModel;
pub use optimizer::{AdamOptimizer, LearningRate};
pub use params::{NamedParameter, ParameterRegistry};
pub use positional::PositionalEncoder;
pub use scheduler::{MetricProvider, ReduceLrOnPlateau};
pub use trainer::{mse_loss, sup_norm, StepMetrics, TrainingOrchestrator};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{
        ExperimentConfig, InitialConditionMode, PositionalEncodingMode, SimpleEncoderConfig,
        TrainingConfig,
    };
    pub use crate::data::{Batch, TestStream};
    pub use crate::error::{SimpleEncoderError, SimpleEncoderResult};
    pub use crate::metrics::{InMemorySink, JsonLinesSink, MetricSink, TracingSink};
    pub use crate::model::SimpleEncoderModel;
    pub use crate::trainer::{StepMetrics, TrainingOrchestrator};
}
