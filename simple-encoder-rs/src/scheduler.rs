//! Reduce-on-plateau learning-rate schedule.
//!
//! The schedule reads its monitored metric through [`MetricProvider`] rather
//! than from whatever the logger last saw, so a missing metric surfaces as a
//! configuration error at the epoch boundary.

use crate::config::PlateauConfig;
use crate::error::{SimpleEncoderError, SimpleEncoderResult};
use crate::optimizer::LearningRate;

/// Source of reduced epoch metrics.
pub trait MetricProvider {
    /// Value of `name` for the current epoch.
    fn metric(&self, name: &str) -> Option<f64>;

    /// Names available this epoch (for error reporting).
    fn metric_names(&self) -> Vec<String>;
}

/// Shrinks the learning rate when the monitored metric stops improving.
///
/// Mode is "min" with a relative threshold: a value counts as an improvement
/// when it is below `best * (1 - threshold)`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    monitor: String,
    best: f64,
    num_bad_epochs: usize,
    cooldown_counter: usize,
    last_epoch: usize,
}

impl ReduceLrOnPlateau {
    /// Create a schedule watching `monitor`.
    pub fn new(monitor: impl Into<String>, config: PlateauConfig) -> Self {
        Self {
            config,
            monitor: monitor.into(),
            best: f64::INFINITY,
            num_bad_epochs: 0,
            cooldown_counter: 0,
            last_epoch: 0,
        }
    }

    /// Monitored metric name
    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    /// Best value seen so far
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Consecutive epochs without improvement
    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }

    fn is_better(&self, current: f64) -> bool {
        current < self.best * (1.0 - self.config.threshold)
    }

    /// Advance one epoch. Returns the new learning rate if it was reduced.
    pub fn step<O: LearningRate + ?Sized>(
        &mut self,
        metrics: &dyn MetricProvider,
        optimizer: &mut O,
    ) -> SimpleEncoderResult<Option<f64>> {
        let current = metrics.metric(&self.monitor).ok_or_else(|| {
            SimpleEncoderError::MissingMetric {
                name: self.monitor.clone(),
                available: metrics.metric_names(),
            }
        })?;
        self.last_epoch += 1;

        if self.is_better(current) {
            self.best = current;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            self.num_bad_epochs = 0;
        }

        if self.num_bad_epochs > self.config.patience {
            self.num_bad_epochs = 0;
            self.cooldown_counter = self.config.cooldown;
            return Ok(self.reduce(optimizer));
        }
        Ok(None)
    }

    fn reduce<O: LearningRate + ?Sized>(&self, optimizer: &mut O) -> Option<f64> {
        let old_lr = optimizer.learning_rate();
        let new_lr = (old_lr * self.config.factor).max(self.config.min_lr);
        if old_lr - new_lr > self.config.eps {
            optimizer.set_learning_rate(new_lr);
            tracing::info!(
                "Epoch {}: reducing learning rate from {:.4e} to {:.4e} ({} stalled)",
                self.last_epoch,
                old_lr,
                new_lr,
                self.monitor
            );
            Some(new_lr)
        } else {
            None
        }
    }
}
