//! Epoch-level metric reduction and sinks.
//!
//! Per-batch scalars are accumulated into an [`EpochAccumulator`] and reduced
//! once per epoch with a batch-size-weighted mean. The reduced
//! [`EpochMetrics`] are what the plateau schedule reads and what gets
//! emitted to every [`MetricSink`].

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::MetricProvider;

/// Learning-rate channel
pub const LR_CHANNEL: &str = "lr";

/// Failure inside a sink. Never fatal to training.
#[derive(Debug, Error)]
pub enum MetricSinkError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Sink refused the record
    #[error("Metric rejected: {0}")]
    Rejected(String),
}

/// Operating mode a loss value was produced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Optimizing on training batches
    Train,
    /// Held-out evaluation during fit
    Validate,
    /// Evaluation on one named test stream
    Test(String),
}

impl Stage {
    /// Channel for loss `kind` (`mse`, `sup`) in this stage.
    pub fn loss_channel(&self, kind: &str) -> String {
        match self {
            Self::Train => format!("loss/train/{kind}"),
            Self::Validate => format!("loss/val/{kind}"),
            Self::Test(tag) => format!("loss/test/{kind}/{tag}"),
        }
    }
}

/// One emitted scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub epoch: usize,
    pub value: f64,
}

/// Append-only destination for epoch scalars.
pub trait MetricSink {
    /// Append one value.
    fn record(&mut self, name: &str, epoch: usize, value: f64) -> Result<(), MetricSinkError>;

    /// Push buffered records out.
    fn flush(&mut self) -> Result<(), MetricSinkError> {
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    records: Vec<MetricRecord>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in emission order
    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Values of one channel in emission order.
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.value)
            .collect()
    }

    /// Most recent value of a channel.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.records
            .iter()
            .rev()
            .find(|r| r.name == name)
            .map(|r| r.value)
    }

    /// Distinct channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }
}

impl MetricSink for InMemorySink {
    fn record(&mut self, name: &str, epoch: usize, value: f64) -> Result<(), MetricSinkError> {
        self.records.push(MetricRecord {
            name: name.to_string(),
            epoch,
            value,
        });
        Ok(())
    }
}

/// Forwards every record to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&mut self, name: &str, epoch: usize, value: f64) -> Result<(), MetricSinkError> {
        tracing::info!(target: "simple_encoder::metrics", epoch, metric = name, value);
        Ok(())
    }
}

/// Writes one JSON object per line, appending to an existing file.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MetricSinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricSink for JsonLinesSink {
    fn record(&mut self, name: &str, epoch: usize, value: f64) -> Result<(), MetricSinkError> {
        let record = MetricRecord {
            name: name.to_string(),
            epoch,
            value,
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.writer, "{line}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MetricSinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Reduced metrics for one epoch, keyed by channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochMetrics {
    values: BTreeMap<String, f64>,
}

impl EpochMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a channel, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Absorb every channel of `other`.
    pub fn merge(&mut self, other: EpochMetrics) {
        self.values.extend(other.values);
    }

    /// Channels in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetricProvider for EpochMetrics {
    fn metric(&self, name: &str) -> Option<f64> {
        self.get(name)
    }

    fn metric_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

/// Batch-size-weighted running sums.
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    sums: BTreeMap<String, (f64, usize)>,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch's value, weighted by its batch size.
    pub fn add(&mut self, name: &str, value: f64, batch_size: usize) {
        let entry = self.sums.entry(name.to_string()).or_insert((0.0, 0));
        entry.0 += value * batch_size as f64;
        entry.1 += batch_size;
    }

    /// Whether nothing was accumulated.
    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Weighted mean per channel. Channels with zero total weight are dropped.
    pub fn reduce(&self) -> EpochMetrics {
        let mut metrics = EpochMetrics::new();
        for (name, (sum, count)) in &self.sums {
            if *count > 0 {
                metrics.insert(name.clone(), sum / *count as f64);
            }
        }
        metrics
    }
}
