//! Style correlation loss.
//!
//! Texture statistics are captured by the Gram matrix of a feature map: the
//! channel-by-channel inner products of the flattened spatial activations,
//! normalized by the element count. The loss compares the live Gram matrix
//! with the cached target one and is scaled by the layer weight and the
//! style threshold.
//!
//! # Formula
//!
//! `L = layer_weight * style_threshold * mean((G(live) - G(target))^2)`
//!
//! with `G(F) = F F^T / (B * C * H * W)` for `F` reshaped to `[B*C, H*W]`.
//!
//! # Reference
//!
//! [A Neural Algorithm of Artistic Style](https://arxiv.org/abs/1508.06576)

use crate::error::{PasticheError, Result};
use candle_core::Tensor;

/// Gram matrix of a `[B, C, H, W]` feature map, shaped `[B*C, B*C]`.
pub fn gram_matrix(features: &Tensor) -> Result<Tensor> {
    let (b, c, h, w) = features.dims4()?;
    let flat = features.reshape((b * c, h * w))?;
    let gram = flat.matmul(&flat.t()?)?;
    Ok((gram / (b * c * h * w) as f64)?)
}

/// Weight of the style layer at position `index`: `(index + 1)^2`.
pub fn layer_weight(index: usize) -> f64 {
    let n = (index + 1) as f64;
    n * n
}

/// Gram-matrix loss against a fixed style feature map.
#[derive(Debug, Clone)]
pub struct StyleLoss {
    /// Cached Gram matrix of the detached target.
    target_gram: Tensor,
    /// Channel count of the target, used to validate live maps.
    channels: usize,
    layer_weight: f64,
    style_threshold: f64,
}

impl StyleLoss {
    /// Build from a target feature map captured on the style image.
    pub fn new(target: &Tensor, layer_weight: f64, style_threshold: f64) -> Result<Self> {
        let target = target.detach();
        let (_, channels, _, _) = target.dims4()?;
        let target_gram = gram_matrix(&target)?;

        Ok(Self {
            target_gram,
            channels,
            layer_weight,
            style_threshold,
        })
    }

    /// Build for the style layer at position `index` (weight `(index + 1)^2`).
    pub fn for_layer(target: &Tensor, index: usize, style_threshold: f64) -> Result<Self> {
        Self::new(target, layer_weight(index), style_threshold)
    }

    /// Same loss with another style threshold.
    pub fn with_threshold(mut self, style_threshold: f64) -> Self {
        self.style_threshold = style_threshold;
        self
    }

    /// Scaled Gram-matrix MSE as a scalar tensor.
    pub fn compute(&self, live: &Tensor) -> Result<Tensor> {
        let (_, channels, _, _) = live.dims4()?;
        if channels != self.channels {
            return Err(PasticheError::ShapeMismatch(format!(
                "style feature map: expected {} channels, got {}",
                self.channels, channels
            )));
        }

        let gram = gram_matrix(live)?;
        if gram.dims() != self.target_gram.dims() {
            return Err(PasticheError::ShapeMismatch(format!(
                "style gram matrix: expected {:?}, got {:?}",
                self.target_gram.dims(),
                gram.dims()
            )));
        }

        let mse = gram.sub(&self.target_gram)?.sqr()?.mean_all()?;
        Ok((mse * (self.layer_weight * self.style_threshold))?)
    }

    /// Cached target Gram matrix.
    pub fn target_gram(&self) -> &Tensor {
        &self.target_gram
    }

    /// Layer weight.
    pub fn layer_weight(&self) -> f64 {
        self.layer_weight
    }

    /// Style threshold.
    pub fn style_threshold(&self) -> f64 {
        self.style_threshold
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use candle_core::Device;
    use proptest::prelude::*;

    fn map(seed: &[f32], channels: usize, side: usize) -> Tensor {
        let n = channels * side * side;
        let data: Vec<f32> = (0..n).map(|i| seed[i % seed.len()] * (1.0 + i as f32 * 0.01)).collect();
        Tensor::from_vec(data, (1, channels, side, side), &Device::Cpu).unwrap()
    }

    proptest! {
        /// Invariant: a target compared with itself has zero style loss.
        #[test]
        fn invariant_self_comparison_zero(
            seed in prop::collection::vec(-3.0f32..3.0, 1..16),
            channels in 1usize..6,
            side in 1usize..6,
            weight in 0.0f64..100.0,
            threshold in -2.0f64..2.0,
        ) {
            let target = map(&seed, channels, side);
            let loss = StyleLoss::new(&target, weight, threshold).unwrap();
            let value: f32 = loss.compute(&target).unwrap().to_scalar().unwrap();
            prop_assert_eq!(value, 0.0);
        }

        /// Invariant: loss is monotone in the threshold on [0, inf).
        #[test]
        fn invariant_threshold_monotone(
            a in prop::collection::vec(-3.0f32..3.0, 1..16),
            b in prop::collection::vec(-3.0f32..3.0, 1..16),
            t1 in 0.0f64..1.0,
            dt in 0.0f64..1.0,
            index in 0usize..5,
        ) {
            let target = map(&a, 3, 4);
            let live = map(&b, 3, 4);
            let low = StyleLoss::for_layer(&target, index, t1).unwrap();
            let high = low.clone().with_threshold(t1 + dt);

            let lo: f32 = low.compute(&live).unwrap().to_scalar().unwrap();
            let hi: f32 = high.compute(&live).unwrap().to_scalar().unwrap();
            prop_assert!(lo <= hi, "lo={} hi={}", lo, hi);
        }
    }
}
