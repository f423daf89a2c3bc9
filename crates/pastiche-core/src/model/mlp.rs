//! GELU MLP of a transformer encoder block.
//!
//! # Formula
//!
//! `MLP(x) = gelu(x @ fc1^T + b1) @ fc2^T + b2`
//!
//! GELU uses the exact erf form, as in the original ViT.

use super::linear;
use crate::error::{PasticheError, Result};
use candle_core::{DType, Device, Tensor};

/// Two-layer MLP with GELU activation.
#[derive(Debug, Clone)]
pub struct GeluMlp {
    /// fc1 weight: [intermediate_size, hidden_size]
    fc1_weight: Tensor,
    fc1_bias: Tensor,
    /// fc2 weight: [hidden_size, intermediate_size]
    fc2_weight: Tensor,
    fc2_bias: Tensor,
    /// Hidden dimension.
    hidden_size: usize,
    /// Intermediate dimension.
    intermediate_size: usize,
}

impl GeluMlp {
    /// Create an MLP from loaded weights.
    pub fn new(
        fc1_weight: Tensor,
        fc1_bias: Tensor,
        fc2_weight: Tensor,
        fc2_bias: Tensor,
    ) -> Result<Self> {
        let (intermediate_size, hidden_size) = fc1_weight.dims2()?;
        if fc2_weight.dims() != [hidden_size, intermediate_size] {
            return Err(PasticheError::ShapeMismatch(format!(
                "fc2: expected {:?}, got {:?}",
                [hidden_size, intermediate_size],
                fc2_weight.dims()
            )));
        }

        Ok(Self {
            fc1_weight,
            fc1_bias,
            fc2_weight,
            fc2_bias,
            hidden_size,
            intermediate_size,
        })
    }

    /// Create an MLP with random weights (for testing).
    pub fn random(hidden_size: usize, intermediate_size: usize, device: &Device) -> Result<Self> {
        // Weight shapes: [out_features, in_features] for matmul with x @ W^T
        let fc1_weight =
            Tensor::randn(0.0f32, 0.02, &[intermediate_size, hidden_size], device)?;
        let fc2_weight =
            Tensor::randn(0.0f32, 0.02, &[hidden_size, intermediate_size], device)?;

        Ok(Self {
            fc1_weight,
            fc1_bias: Tensor::zeros(intermediate_size, DType::F32, device)?,
            fc2_weight,
            fc2_bias: Tensor::zeros(hidden_size, DType::F32, device)?,
            hidden_size,
            intermediate_size,
        })
    }

    /// Forward pass over `[..., hidden_size]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = linear(x, &self.fc1_weight, Some(&self.fc1_bias))?;
        let hidden = hidden.gelu_erf()?;
        linear(&hidden, &self.fc2_weight, Some(&self.fc2_bias))
    }

    /// Get the hidden size.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Get the intermediate size.
    pub fn intermediate_size(&self) -> usize {
        self.intermediate_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mlp_forward_3d() {
        let mlp = GeluMlp::random(32, 64, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, &[1, 10, 32], &Device::Cpu).unwrap();
        let y = mlp.forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 10, 32]);
        assert_eq!(mlp.hidden_size(), 32);
        assert_eq!(mlp.intermediate_size(), 64);
    }

    #[test]
    fn mlp_rejects_mismatched_fc2() {
        let fc1 = Tensor::zeros((64, 32), DType::F32, &Device::Cpu).unwrap();
        let b1 = Tensor::zeros(64, DType::F32, &Device::Cpu).unwrap();
        let fc2 = Tensor::zeros((32, 48), DType::F32, &Device::Cpu).unwrap();
        let b2 = Tensor::zeros(32, DType::F32, &Device::Cpu).unwrap();
        assert!(GeluMlp::new(fc1, b1, fc2, b2).is_err());
    }

    #[test]
    fn mlp_zero_weights_return_bias() {
        let fc1 = Tensor::zeros((8, 4), DType::F32, &Device::Cpu).unwrap();
        let b1 = Tensor::zeros(8, DType::F32, &Device::Cpu).unwrap();
        let fc2 = Tensor::zeros((4, 8), DType::F32, &Device::Cpu).unwrap();
        let b2 = Tensor::new(&[1.0f32, 2.0, 3.0, 4.0], &Device::Cpu).unwrap();
        let mlp = GeluMlp::new(fc1, b1, fc2, b2).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, &[2, 4], &Device::Cpu).unwrap();
        let y: Vec<Vec<f32>> = mlp.forward(&x).unwrap().to_vec2().unwrap();
        assert_eq!(y[1], vec![1.0, 2.0, 3.0, 4.0]);
    }
}
