//! Training, validation and multi-resolution test loops.

use candle_core::{DType, Tensor};

use crate::config::TrainingConfig;
use crate::data::{Batch, TestStream};
use crate::error::{SimpleEncoderError, SimpleEncoderResult};
use crate::metrics::{EpochAccumulator, EpochMetrics, MetricSink, Stage, LR_CHANNEL};
use crate::model::SimpleEncoderModel;
use crate::optimizer::{AdamOptimizer, LearningRate};
use crate::scheduler::ReduceLrOnPlateau;

/// Mean squared error over every element.
pub fn mse_loss(prediction: &Tensor, target: &Tensor) -> SimpleEncoderResult<Tensor> {
    check_same_shape(prediction, target)?;
    Ok(candle_nn::loss::mse(prediction, target)?)
}

/// Largest absolute elementwise error. NaN if any element of the error is NaN.
pub fn sup_norm(prediction: &Tensor, target: &Tensor) -> SimpleEncoderResult<Tensor> {
    check_same_shape(prediction, target)?;
    let diff = (prediction - target)?.abs()?.flatten_all()?;

    // The max reduction skips NaN past the first element.
    let nan_count: f32 = diff
        .ne(&diff)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar()?;
    if nan_count > 0.0 {
        return Ok(Tensor::new(f32::NAN, diff.device())?.to_dtype(diff.dtype())?);
    }
    Ok(diff.max(0)?)
}

fn check_same_shape(prediction: &Tensor, target: &Tensor) -> SimpleEncoderResult<()> {
    if prediction.dims() != target.dims() {
        return Err(SimpleEncoderError::shape_mismatch(
            format!("target {:?}", prediction.dims()),
            format!("{:?}", target.dims()),
        ));
    }
    Ok(())
}

fn scalar(t: &Tensor) -> SimpleEncoderResult<f64> {
    Ok(t.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64)
}

/// Losses of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    /// Mean squared error (optimized)
    pub mse: f64,
    /// Sup-norm error (reported only)
    pub sup: f64,
    /// Samples in the batch
    pub batch_size: usize,
}

/// Owns the model, the optimizer state and the plateau schedule.
pub struct TrainingOrchestrator {
    model: SimpleEncoderModel,
    optimizer: AdamOptimizer,
    scheduler: ReduceLrOnPlateau,
    config: TrainingConfig,
    sinks: Vec<Box<dyn MetricSink>>,
    epoch: usize,
}

impl TrainingOrchestrator {
    /// Create the orchestrator. Adam is built over the model's registered
    /// parameters.
    pub fn new(model: SimpleEncoderModel, config: TrainingConfig) -> SimpleEncoderResult<Self> {
        config.validate()?;
        let optimizer = AdamOptimizer::new(model.parameters().vars(), &config)?;
        let scheduler =
            ReduceLrOnPlateau::new(config.monitor_metric.clone(), config.lr_scheduler.clone());

        tracing::info!(
            "Initialized Adam optimizer with lr={}, {} trainable params",
            optimizer.learning_rate(),
            model.parameter_count()
        );

        Ok(Self {
            model,
            optimizer,
            scheduler,
            config,
            sinks: Vec::new(),
            epoch: 0,
        })
    }

    /// Attach a metric sink.
    pub fn add_sink(&mut self, sink: Box<dyn MetricSink>) {
        self.sinks.push(sink);
    }

    /// Builder form of [`Self::add_sink`].
    pub fn with_sink(mut self, sink: Box<dyn MetricSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn model(&self) -> &SimpleEncoderModel {
        &self.model
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Epochs completed
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// One optimization step. Gradient and weight norms are accumulated into
    /// `acc` per parameter tensor.
    pub fn train_step(
        &mut self,
        batch: &Batch,
        acc: &mut EpochAccumulator,
    ) -> SimpleEncoderResult<StepMetrics> {
        let batch_size = batch.batch_size();
        let prediction = self.model.forward_batch(batch, true)?;
        let loss = mse_loss(&prediction, &batch.y)?;
        let sup = sup_norm(&prediction, &batch.y)?;

        let grads = loss.backward()?;

        for param in self.model.parameters().iter() {
            if let Some(norm) = param.grad_norm(&grads)? {
                let channel = format!("grad_norm/afterBackward/{}", param.channel_name());
                acc.add(&channel, norm, batch_size);
            }
        }

        // Right before the update; no clipping runs in between.
        for param in self.model.parameters().iter() {
            let name = param.channel_name();
            if let Some(norm) = param.grad_norm(&grads)? {
                acc.add(&format!("grad_norm/beforeOptimizer/{name}"), norm, batch_size);
            }
            acc.add(
                &format!("param_norm/beforeOptimizer/{name}"),
                param.weight_norm()?,
                batch_size,
            );
        }

        self.optimizer.step(&grads)?;

        let metrics = StepMetrics {
            mse: scalar(&loss)?,
            sup: scalar(&sup)?,
            batch_size,
        };
        acc.add(&Stage::Train.loss_channel("mse"), metrics.mse, batch_size);
        acc.add(&Stage::Train.loss_channel("sup"), metrics.sup, batch_size);
        Ok(metrics)
    }

    /// Loss of one batch without updating anything.
    pub fn eval_step(&self, batch: &Batch) -> SimpleEncoderResult<StepMetrics> {
        let prediction = self.model.forward_batch(batch, false)?;
        Ok(StepMetrics {
            mse: scalar(&mse_loss(&prediction, &batch.y)?)?,
            sup: scalar(&sup_norm(&prediction, &batch.y)?)?,
            batch_size: batch.batch_size(),
        })
    }

    /// Run every training batch once and reduce.
    pub fn train_epoch(&mut self, batches: &[Batch]) -> SimpleEncoderResult<EpochMetrics> {
        if batches.is_empty() {
            return Err(SimpleEncoderError::training("no training batches"));
        }
        let mut acc = EpochAccumulator::new();
        for (i, batch) in batches.iter().enumerate() {
            let step = self.train_step(batch, &mut acc)?;
            tracing::debug!(
                "Epoch {}, batch {}/{}, mse: {:.6}, sup: {:.6}",
                self.epoch,
                i + 1,
                batches.len(),
                step.mse,
                step.sup
            );
        }
        Ok(acc.reduce())
    }

    fn evaluate(&self, batches: &[Batch], stage: &Stage) -> SimpleEncoderResult<EpochMetrics> {
        let mut acc = EpochAccumulator::new();
        for batch in batches {
            let step = self.eval_step(batch)?;
            acc.add(&stage.loss_channel("mse"), step.mse, step.batch_size);
            acc.add(&stage.loss_channel("sup"), step.sup, step.batch_size);
        }
        Ok(acc.reduce())
    }

    /// Held-out losses on `loss/val/*`.
    pub fn validate_epoch(&self, batches: &[Batch]) -> SimpleEncoderResult<EpochMetrics> {
        self.evaluate(batches, &Stage::Validate)
    }

    /// Evaluate the current parameters on every stream, one channel set per
    /// tag, and emit the result.
    pub fn test(&mut self, streams: &[TestStream]) -> SimpleEncoderResult<EpochMetrics> {
        let mut metrics = EpochMetrics::new();
        for stream in streams {
            let stage = Stage::Test(stream.tag().to_string());
            let stream_metrics = self.evaluate(stream.batches(), &stage)?;
            if let Some(mse) = stream_metrics.get(&stage.loss_channel("mse")) {
                tracing::info!("Test {}: mse {:.6}", stream.tag(), mse);
            }
            metrics.merge(stream_metrics);
        }
        self.emit(&metrics);
        Ok(metrics)
    }

    /// One epoch: train, validate, report, then step the schedule.
    pub fn run_epoch(
        &mut self,
        train: &[Batch],
        val: &[Batch],
    ) -> SimpleEncoderResult<EpochMetrics> {
        let lr = self.optimizer.learning_rate();
        let mut metrics = self.train_epoch(train)?;
        if !val.is_empty() {
            metrics.merge(self.validate_epoch(val)?);
        }
        metrics.insert(LR_CHANNEL, lr);

        self.emit(&metrics);
        tracing::info!(
            "Epoch {}: train mse {:.6}, val mse {}, lr {:.2e}",
            self.epoch,
            metrics.get(&Stage::Train.loss_channel("mse")).unwrap_or(f64::NAN),
            metrics
                .get(&Stage::Validate.loss_channel("mse"))
                .map(|v| format!("{v:.6}"))
                .unwrap_or_else(|| "-".to_string()),
            lr
        );

        self.scheduler.step(&metrics, &mut self.optimizer)?;
        self.epoch += 1;
        Ok(metrics)
    }

    /// Run `max_epochs` epochs. Returns the reduced metrics of each.
    pub fn fit(
        &mut self,
        train: &[Batch],
        val: &[Batch],
    ) -> SimpleEncoderResult<Vec<EpochMetrics>> {
        tracing::info!("Starting training");
        tracing::info!("  Epochs: {}", self.config.max_epochs);
        tracing::info!("  Monitor: {}", self.scheduler.monitor());

        let mut history = Vec::with_capacity(self.config.max_epochs);
        for _ in 0..self.config.max_epochs {
            history.push(self.run_epoch(train, val)?);
        }
        Ok(history)
    }

    /// Send every channel to every sink. Failures are logged and dropped.
    fn emit(&mut self, metrics: &EpochMetrics) {
        let epoch = self.epoch;
        for sink in &mut self.sinks {
            for (name, value) in metrics.iter() {
                if let Err(err) = sink.record(name, epoch, value) {
                    tracing::warn!("Dropping metric {name} at epoch {epoch}: {err}");
                }
            }
            if let Err(err) = sink.flush() {
                tracing::warn!("Metric sink flush failed: {err}");
            }
        }
    }
}
