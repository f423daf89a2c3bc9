//! Image tensor conventions.
//!
//! Images are `[1, 3, H, W]` F32 tensors normalized with ImageNet statistics,
//! the layout both backbones were trained on. This module owns the
//! normalization constants, the shape checks shared by the extractor and the
//! driver, and the per-channel pixel range used to clamp the candidate.

use crate::error::{PasticheError, Result};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

/// Per-channel ImageNet mean (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Validate an image tensor and return its spatial size `(height, width)`.
pub fn image_dims(image: &Tensor) -> Result<(usize, usize)> {
    match image.dims() {
        &[1, 3, h, w] => Ok((h, w)),
        other => Err(PasticheError::ShapeMismatch(format!(
            "expected image tensor [1, 3, H, W], got {:?}",
            other
        ))),
    }
}

/// Valid range of every channel of a normalized image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBounds {
    /// Lower bound per channel.
    pub lo: [f32; 3],
    /// Upper bound per channel.
    pub hi: [f32; 3],
}

impl PixelBounds {
    /// Bounds of `[0, 1]` RGB pixels after normalization with `mean` and `std`.
    pub fn normalized(mean: [f32; 3], std: [f32; 3]) -> Self {
        let mut lo = [0.0; 3];
        let mut hi = [0.0; 3];
        for c in 0..3 {
            lo[c] = (0.0 - mean[c]) / std[c];
            hi[c] = (1.0 - mean[c]) / std[c];
        }
        Self { lo, hi }
    }

    /// No clamping at all.
    pub fn unbounded() -> Self {
        Self {
            lo: [f32::NEG_INFINITY; 3],
            hi: [f32::INFINITY; 3],
        }
    }

    /// Whether clamping is a no-op.
    pub fn is_unbounded(&self) -> bool {
        self.lo.iter().all(|v| *v == f32::NEG_INFINITY) && self.hi.iter().all(|v| *v == f32::INFINITY)
    }

    /// Clamp `image` channel-wise into the bounds.
    pub fn clamp(&self, image: &Tensor) -> Result<Tensor> {
        if self.is_unbounded() {
            return Ok(image.clone());
        }
        let device = image.device();
        let lo = Self::channel_tensor(&self.lo, device)?;
        let hi = Self::channel_tensor(&self.hi, device)?;
        Ok(image.broadcast_maximum(&lo)?.broadcast_minimum(&hi)?)
    }

    fn channel_tensor(values: &[f32; 3], device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(values, (1, 3, 1, 1), device)?)
    }
}

impl Default for PixelBounds {
    fn default() -> Self {
        Self::normalized(IMAGENET_MEAN, IMAGENET_STD)
    }
}
