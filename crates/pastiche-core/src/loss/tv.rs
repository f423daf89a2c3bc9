//! Total variation smoothness loss.
//!
//! Penalizes differences between vertically and horizontally adjacent pixels
//! of the candidate image, suppressing the high-frequency noise that
//! unconstrained per-pixel optimization introduces.

use crate::error::Result;
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

/// Penalty applied to each neighbor difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvNorm {
    /// Sum of absolute differences (anisotropic TV).
    #[default]
    L1,
    /// Sum of squared differences.
    L2,
}

/// Total variation loss over a `[B, C, H, W]` image.
#[derive(Debug, Clone, Copy)]
pub struct TotalVariationLoss {
    weight: f64,
    norm: TvNorm,
}

impl TotalVariationLoss {
    /// L1 total variation scaled by `weight`.
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            norm: TvNorm::L1,
        }
    }

    /// Select the difference penalty.
    pub fn with_norm(mut self, norm: TvNorm) -> Self {
        self.norm = norm;
        self
    }

    /// Weighted total variation as a scalar tensor.
    pub fn compute(&self, image: &Tensor) -> Result<Tensor> {
        let (_, _, h, w) = image.dims4()?;

        let mut total = Tensor::zeros((), DType::F32, image.device())?;
        if h > 1 {
            let dy = image.narrow(2, 1, h - 1)?.sub(&image.narrow(2, 0, h - 1)?)?;
            total = (total + self.penalty(&dy)?)?;
        }
        if w > 1 {
            let dx = image.narrow(3, 1, w - 1)?.sub(&image.narrow(3, 0, w - 1)?)?;
            total = (total + self.penalty(&dx)?)?;
        }

        Ok((total * self.weight)?)
    }

    fn penalty(&self, diff: &Tensor) -> Result<Tensor> {
        let p = match self.norm {
            TvNorm::L1 => diff.abs()?.sum_all()?,
            TvNorm::L2 => diff.sqr()?.sum_all()?,
        };
        Ok(p)
    }

    /// Weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Difference penalty.
    pub fn norm(&self) -> TvNorm {
        self.norm
    }
}

impl Default for TotalVariationLoss {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar().unwrap()
    }

    #[test]
    fn constant_image_is_zero() {
        let image = (Tensor::ones((1, 3, 8, 8), DType::F32, &Device::Cpu).unwrap() * 0.3).unwrap();
        let loss = TotalVariationLoss::new(1.0);
        assert_eq!(scalar(&loss.compute(&image).unwrap()), 0.0);
    }

    #[test]
    fn single_step_edge() {
        // Left column 0, right column 1 on a 1x1x2x2 image: two horizontal pairs differ by 1.
        let image = Tensor::new(&[[[[0.0f32, 1.0], [0.0, 1.0]]]], &Device::Cpu).unwrap();
        let l1 = TotalVariationLoss::new(1.0);
        assert!((scalar(&l1.compute(&image).unwrap()) - 2.0).abs() < 1e-6);

        let l2 = TotalVariationLoss::new(0.5).with_norm(TvNorm::L2);
        assert!((scalar(&l2.compute(&image).unwrap()) - 1.0).abs() < 1e-6);
        assert_eq!(l2.norm(), TvNorm::L2);
    }

    #[test]
    fn l1_vs_l2_on_large_jumps() {
        let image = Tensor::new(&[[[[0.0f32, 3.0]]]], &Device::Cpu).unwrap();
        let l1 = scalar(&TotalVariationLoss::new(1.0).compute(&image).unwrap());
        let l2 = scalar(
            &TotalVariationLoss::new(1.0)
                .with_norm(TvNorm::L2)
                .compute(&image)
                .unwrap(),
        );
        assert!((l1 - 3.0).abs() < 1e-6);
        assert!((l2 - 9.0).abs() < 1e-6);
    }

    #[test]
    fn single_pixel_image_is_zero() {
        let image = Tensor::randn(0.0f32, 1.0, (1, 3, 1, 1), &Device::Cpu).unwrap();
        assert_eq!(scalar(&TotalVariationLoss::default().compute(&image).unwrap()), 0.0);
    }

    #[test]
    fn weight_scales_result() {
        let image = Tensor::randn(0.0f32, 1.0, (1, 3, 6, 6), &Device::Cpu).unwrap();
        let one = scalar(&TotalVariationLoss::new(1.0).compute(&image).unwrap());
        let ten = scalar(&TotalVariationLoss::new(10.0).compute(&image).unwrap());
        assert!((ten - 10.0 * one).abs() < 1e-4 * ten.max(1.0));
    }
}
