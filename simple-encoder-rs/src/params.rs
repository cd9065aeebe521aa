//! Ordered registry of named parameter tensors.
//!
//! Assembled once at model construction from the names each component
//! declares, so gradient and weight diagnostics iterate a fixed list instead
//! of enumerating the variable store.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::VarMap;

use crate::error::{SimpleEncoderError, SimpleEncoderResult};

/// L2 norm of a tensor as `f64`.
pub fn l2_norm(t: &Tensor) -> candle_core::Result<f64> {
    let sq: f32 = t.sqr()?.sum_all()?.to_dtype(candle_core::DType::F32)?.to_scalar()?;
    Ok((sq as f64).sqrt())
}

/// Read-only handle on one trainable tensor.
#[derive(Debug, Clone)]
pub struct NamedParameter {
    name: String,
    var: Var,
}

impl NamedParameter {
    /// Full dotted name, e.g. `encoder.layers.0.linear1.weight`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name with dots replaced by underscores, for metric channels.
    pub fn channel_name(&self) -> String {
        self.name.replace('.', "_")
    }

    /// Current value
    pub fn tensor(&self) -> &Tensor {
        self.var.as_tensor()
    }

    /// Number of scalar elements
    pub fn elem_count(&self) -> usize {
        self.var.elem_count()
    }

    /// L2 norm of the current value.
    pub fn weight_norm(&self) -> SimpleEncoderResult<f64> {
        Ok(l2_norm(self.var.as_tensor())?)
    }

    /// L2 norm of this parameter's gradient, if it received one.
    pub fn grad_norm(&self, grads: &GradStore) -> SimpleEncoderResult<Option<f64>> {
        match grads.get(self.var.as_tensor()) {
            Some(grad) => Ok(Some(l2_norm(grad)?)),
            None => Ok(None),
        }
    }
}

/// Parameters in registration order.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    params: Vec<NamedParameter>,
}

impl ParameterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `prefix.name` for every name, resolving each against `var_map`.
    pub fn register_all<S: AsRef<str>>(
        &mut self,
        var_map: &VarMap,
        prefix: &str,
        names: &[S],
    ) -> SimpleEncoderResult<()> {
        let data = var_map
            .data()
            .lock()
            .map_err(|_| SimpleEncoderError::training("parameter store lock poisoned"))?;

        for name in names {
            let full = if prefix.is_empty() {
                name.as_ref().to_string()
            } else {
                format!("{prefix}.{}", name.as_ref())
            };
            let var = data.get(&full).ok_or_else(|| {
                SimpleEncoderError::invalid_config(format!("parameter '{full}' was never created"))
            })?;
            if self.params.iter().any(|p| p.name == full) {
                return Err(SimpleEncoderError::invalid_config(format!(
                    "parameter '{full}' registered twice"
                )));
            }
            self.params.push(NamedParameter {
                name: full,
                var: var.clone(),
            });
        }
        Ok(())
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &NamedParameter> {
        self.params.iter()
    }

    /// Look up by full name.
    pub fn get(&self, name: &str) -> Option<&NamedParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Number of registered tensors
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total scalar parameter count
    pub fn parameter_count(&self) -> usize {
        self.params.iter().map(NamedParameter::elem_count).sum()
    }

    /// Variables for the optimizer, in registration order.
    pub fn vars(&self) -> Vec<Var> {
        self.params.iter().map(|p| p.var.clone()).collect()
    }
}
