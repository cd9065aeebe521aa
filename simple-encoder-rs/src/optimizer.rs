//! Adam optimizer over the model's registered parameters.

use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{Optimizer, ParamsAdamW};

use crate::config::TrainingConfig;
use crate::error::{SimpleEncoderError, SimpleEncoderResult};

/// Anything whose learning rate a schedule may adjust.
pub trait LearningRate {
    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Replace the learning rate
    fn set_learning_rate(&mut self, lr: f64);
}

/// Adam (AdamW without weight decay). Owns the first/second moment state.
pub struct AdamOptimizer {
    inner: candle_nn::AdamW,
}

impl AdamOptimizer {
    /// Create the optimizer for `vars`.
    pub fn new(vars: Vec<Var>, config: &TrainingConfig) -> SimpleEncoderResult<Self> {
        let params = ParamsAdamW {
            lr: config.learning_rate,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.adam_eps,
            weight_decay: 0.0,
        };
        let inner = candle_nn::AdamW::new(vars, params)
            .map_err(|e| SimpleEncoderError::training(format!("Failed to create Adam: {e}")))?;
        Ok(Self { inner })
    }

    /// Apply one update from already-computed gradients.
    pub fn step(&mut self, grads: &GradStore) -> SimpleEncoderResult<()> {
        self.inner
            .step(grads)
            .map_err(|e| SimpleEncoderError::training(format!("Optimizer step failed: {e}")))
    }
}

impl LearningRate for AdamOptimizer {
    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }
}
