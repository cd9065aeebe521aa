//! Error types for the simple encoder.

use thiserror::Error;

/// Result type for simple encoder operations.
pub type SimpleEncoderResult<T> = Result<T, SimpleEncoderError>;

/// Errors that can occur while building, running or training the encoder.
#[derive(Debug, Error)]
pub enum SimpleEncoderError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Batch tensors disagree with the model configuration
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The plateau schedule's monitored metric was not reported this epoch
    #[error("Monitored metric '{name}' not found among logged metrics {available:?}")]
    MissingMetric { name: String, available: Vec<String> },

    /// Initial-condition injection needs the target sequence
    #[error("Initial-condition injection is enabled but no target sequence was supplied")]
    MissingTarget,

    /// Training error
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration file
    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SimpleEncoderError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Whether this error belongs to the construction-time configuration class.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::MissingMetric { .. } | Self::ConfigParse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimpleEncoderError::shape_mismatch("(2, 5, 1)", "(2, 5, 3)");
        assert_eq!(
            err.to_string(),
            "Shape mismatch: expected (2, 5, 1), got (2, 5, 3)"
        );

        let err = SimpleEncoderError::MissingMetric {
            name: "loss/val/mse".into(),
            available: vec!["loss/train/mse".into()],
        };
        assert!(err.to_string().contains("loss/val/mse"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_error_classes() {
        assert!(SimpleEncoderError::invalid_config("bad").is_configuration_error());
        assert!(!SimpleEncoderError::shape_mismatch("a", "b").is_configuration_error());
        assert!(!SimpleEncoderError::MissingTarget.is_configuration_error());
    }
}
