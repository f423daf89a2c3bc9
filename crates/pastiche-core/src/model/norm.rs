//! Layer Normalization for the transformer backbone.
//!
//! # Formula
//!
//! `LayerNorm(x) = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
//!
//! Statistics are taken over the last (hidden) dimension.
//!
//! # Reference
//!
//! [Layer Normalization](https://arxiv.org/abs/1607.06450)

use crate::error::{PasticheError, Result};
use candle_core::{DType, Device, Tensor, D};

/// Layer normalization with affine parameters.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Scale parameter.
    weight: Tensor,
    /// Shift parameter.
    bias: Tensor,
    /// Small constant for numerical stability.
    eps: f64,
    /// Hidden dimension.
    hidden_size: usize,
}

impl LayerNorm {
    /// Create a LayerNorm from loaded parameters.
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Result<Self> {
        let hidden_size = weight.dims1()?;
        if bias.dims() != weight.dims() {
            return Err(PasticheError::ShapeMismatch(format!(
                "layer norm bias: expected {:?}, got {:?}",
                weight.dims(),
                bias.dims()
            )));
        }
        Ok(Self {
            weight,
            bias,
            eps,
            hidden_size,
        })
    }

    /// Identity-initialized LayerNorm (weight = 1, bias = 0).
    pub fn identity(hidden_size: usize, eps: f64, device: &Device) -> Result<Self> {
        Ok(Self {
            weight: Tensor::ones(hidden_size, DType::F32, device)?,
            bias: Tensor::zeros(hidden_size, DType::F32, device)?,
            eps,
            hidden_size,
        })
    }

    /// Forward pass over `[..., hidden_size]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let rstd = (var + self.eps)?.sqrt()?.recip()?;
        let normalized = centered.broadcast_mul(&rstd)?;
        Ok(normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }

    /// Get the hidden size.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Get epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }
}
