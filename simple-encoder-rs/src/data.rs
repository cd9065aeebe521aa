//! Batches and named test streams.

use candle_core::Tensor;

use crate::error::{SimpleEncoderError, SimpleEncoderResult};

/// One batch from the data source.
///
/// The coordinate grids are shared by every sample in the batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input sequence: (batch, input_len, input_dim)
    pub x: Tensor,
    /// Target sequence: (batch, output_len, output_dim)
    pub y: Tensor,
    /// Input coordinates: (input_len, domain_dim)
    pub coords_x: Tensor,
    /// Target coordinates: (output_len, domain_dim)
    pub coords_y: Tensor,
}

impl Batch {
    /// Create a batch, checking that the four tensors agree with each other.
    pub fn new(
        x: Tensor,
        y: Tensor,
        coords_x: Tensor,
        coords_y: Tensor,
    ) -> SimpleEncoderResult<Self> {
        let (batch, input_len, _) = x.dims3()?;
        let (y_batch, output_len, _) = y.dims3()?;
        let (cx_len, cx_domain) = coords_x.dims2()?;
        let (cy_len, cy_domain) = coords_y.dims2()?;

        if y_batch != batch {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("target batch {batch}"),
                y_batch.to_string(),
            ));
        }
        if cx_len != input_len {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("{input_len} input coordinates"),
                cx_len.to_string(),
            ));
        }
        if cy_len != output_len {
            return Err(SimpleEncoderError::shape_mismatch(
                format!("{output_len} target coordinates"),
                cy_len.to_string(),
            ));
        }
        if cx_domain != cy_domain {
            return Err(SimpleEncoderError::invalid_config(format!(
                "input coordinates have domain_dim {cx_domain}, target coordinates {cy_domain}"
            )));
        }

        Ok(Self {
            x,
            y,
            coords_x,
            coords_y,
        })
    }

    /// Number of samples
    pub fn batch_size(&self) -> usize {
        self.x.dims().first().copied().unwrap_or(0)
    }
}

/// Batches sampled at one resolution, reported under their own tag.
#[derive(Debug, Clone)]
pub struct TestStream {
    tag: String,
    batches: Vec<Batch>,
}

impl TestStream {
    pub fn new(tag: impl Into<String>, batches: Vec<Batch>) -> Self {
        Self {
            tag: tag.into(),
            batches,
        }
    }

    /// Stream tagged `dt{rate}`.
    pub fn from_sample_rate(rate: f64, batches: Vec<Batch>) -> Self {
        Self::new(format!("dt{rate}"), batches)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn zeros(shape: &[usize]) -> Tensor {
        Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
    }

    fn batch(x: &[usize], y: &[usize], cx: &[usize], cy: &[usize]) -> SimpleEncoderResult<Batch> {
        Batch::new(zeros(x), zeros(y), zeros(cx), zeros(cy))
    }

    #[test]
    fn test_valid_batch() {
        let batch = batch(&[2, 5, 1], &[2, 5, 1], &[5, 1], &[5, 1]).unwrap();
        assert_eq!(batch.batch_size(), 2);
    }

    #[test]
    fn test_inconsistent_batches_rejected() {
        let err = batch(&[2, 5, 1], &[3, 5, 1], &[5, 1], &[5, 1]).unwrap_err();
        assert!(matches!(err, SimpleEncoderError::ShapeMismatch { .. }));

        let err = batch(&[2, 5, 1], &[2, 5, 1], &[4, 1], &[5, 1]).unwrap_err();
        assert!(matches!(err, SimpleEncoderError::ShapeMismatch { .. }));

        let err = batch(&[2, 5, 1], &[2, 5, 1], &[5, 2], &[5, 1]).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_stream_tag() {
        assert_eq!(TestStream::from_sample_rate(0.01, Vec::new()).tag(), "dt0.01");
        assert_eq!(TestStream::from_sample_rate(0.5, Vec::new()).tag(), "dt0.5");
        assert_eq!(TestStream::new("coarse", Vec::new()).tag(), "coarse");
    }
}
