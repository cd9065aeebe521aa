//! Train the encoder on a synthetic oscillator and test it at several
//! sample rates.
//!
//! Each sample is a phase- and frequency-shifted sine on [0, 1]; the target
//! is the matching cosine. The model is trained on one grid and evaluated on
//! coarser and finer grids without retraining.
//!
//! Usage:
//!   cargo run --example train --release [-- config.yaml]
//!
//! With CUDA:
//!   cargo run --example train --release --features cuda

use std::f32::consts::PI;
use std::time::Instant;

use candle_core::{Device, Tensor};
use rand::Rng;
use tracing_subscriber::EnvFilter;

use simple_encoder_rs::prelude::*;

const TRAIN_DT: f64 = 0.05;
const TEST_DTS: [f64; 3] = [0.1, 0.05, 0.025];

/// `num_batches` batches of oscillator trajectories sampled every `dt`.
fn oscillator_batches(
    rng: &mut impl Rng,
    dt: f64,
    num_batches: usize,
    batch_size: usize,
    device: &Device,
) -> anyhow::Result<Vec<Batch>> {
    let len = (1.0 / dt).round() as usize;
    let times: Vec<f32> = (0..len).map(|i| (i as f64 * dt) as f32).collect();
    let coords = Tensor::from_vec(times.clone(), (len, 1), device)?;

    let mut batches = Vec::with_capacity(num_batches);
    for _ in 0..num_batches {
        let mut xs = Vec::with_capacity(batch_size * len);
        let mut ys = Vec::with_capacity(batch_size * len);
        for _ in 0..batch_size {
            let omega = 2.0 * PI * rng.gen_range(0.5f32..1.5);
            let phase = rng.gen_range(0.0f32..2.0 * PI);
            for &t in &times {
                xs.push((omega * t + phase).sin());
                ys.push((omega * t + phase).cos());
            }
        }
        let x = Tensor::from_vec(xs, (batch_size, len, 1), device)?;
        let y = Tensor::from_vec(ys, (batch_size, len, 1), device)?;
        batches.push(Batch::new(x, y, coords.clone(), coords.clone())?);
    }
    Ok(batches)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    #[cfg(feature = "cuda")]
    let device = Device::new_cuda(0)?;
    #[cfg(not(feature = "cuda"))]
    let device = Device::Cpu;

    let experiment = match std::env::args().nth(1) {
        Some(path) => ExperimentConfig::from_file(path)?,
        None => ExperimentConfig {
            model: SimpleEncoderConfig {
                d_model: 32,
                num_heads: 4,
                num_layers: 2,
                dim_feedforward: 64,
                ..SimpleEncoderConfig::default()
            },
            training: TrainingConfig {
                max_epochs: 20,
                learning_rate: 1e-3,
                monitor_metric: "loss/val/mse".to_string(),
                ..TrainingConfig::default()
            },
        },
    };

    tracing::info!("Device: {:?}", device);
    tracing::info!("Model: {:?}", experiment.model);

    let mut rng = rand::thread_rng();
    let train = oscillator_batches(&mut rng, TRAIN_DT, 16, 8, &device)?;
    let val = oscillator_batches(&mut rng, TRAIN_DT, 4, 8, &device)?;
    let streams = TEST_DTS
        .iter()
        .map(|&dt| {
            let batches = oscillator_batches(&mut rng, dt, 4, 8, &device)?;
            Ok(TestStream::from_sample_rate(dt, batches))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let model = SimpleEncoderModel::new(&experiment.model, &device)?;
    let mut trainer = TrainingOrchestrator::new(model, experiment.training.clone())?
        .with_sink(Box::new(TracingSink));

    let start = Instant::now();
    let epochs = trainer.fit(&train, &val)?;
    tracing::info!("Trained {} epochs in {:.1?}", epochs.len(), start.elapsed());

    let results = trainer.test(&streams)?;
    for dt in TEST_DTS {
        let tag = format!("dt{dt}");
        let mse = results.get(&format!("loss/test/mse/{tag}")).unwrap_or(f64::NAN);
        let sup = results.get(&format!("loss/test/sup/{tag}")).unwrap_or(f64::NAN);
        println!("{tag:>8}: mse {mse:.6}  sup {sup:.6}");
    }

    Ok(())
}
