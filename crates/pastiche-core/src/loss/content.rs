//! Content fidelity loss.

use crate::error::{PasticheError, Result};
use candle_core::Tensor;

/// Mean squared error against a fixed content feature map.
#[derive(Debug, Clone)]
pub struct ContentLoss {
    /// Detached target feature map.
    target: Tensor,
    /// Per-layer weight.
    weight: f64,
}

impl ContentLoss {
    /// Build from a target feature map captured on the content image.
    pub fn new(target: &Tensor) -> Self {
        Self {
            target: target.detach(),
            weight: 1.0,
        }
    }

    /// Set the per-layer weight (1 by default).
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// `weight * mean((live - target)^2)` as a scalar tensor.
    pub fn compute(&self, live: &Tensor) -> Result<Tensor> {
        if live.dims() != self.target.dims() {
            return Err(PasticheError::ShapeMismatch(format!(
                "content feature map: expected {:?}, got {:?}",
                self.target.dims(),
                live.dims()
            )));
        }
        let mse = live.sub(&self.target)?.sqr()?.mean_all()?;
        if self.weight == 1.0 {
            Ok(mse)
        } else {
            Ok((mse * self.weight)?)
        }
    }

    /// Target feature map.
    pub fn target(&self) -> &Tensor {
        &self.target
    }

    /// Per-layer weight.
    pub fn weight(&self) -> f64 {
        self.weight
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
        /// Invariant: a target compared with itself has zero content loss.
        #[test]
        fn invariant_self_comparison_zero(
            seed in prop::collection::vec(-3.0f32..3.0, 1..16),
            channels in 1usize..6,
            side in 1usize..6,
            weight in 0.0f64..100.0,
        ) {
            let target = map(&seed, channels, side);
            let loss = ContentLoss::new(&target).with_weight(weight);
            let value: f32 = loss.compute(&target).unwrap().to_scalar().unwrap();
            prop_assert_eq!(value, 0.0);
        }

        /// Invariant: content loss is never negative.
        #[test]
        fn invariant_non_negative(
            a in prop::collection::vec(-3.0f32..3.0, 1..16),
            b in prop::collection::vec(-3.0f32..3.0, 1..16),
            side in 1usize..6,
        ) {
            let loss = ContentLoss::new(&map(&a, 2, side));
            let value: f32 = loss.compute(&map(&b, 2, side)).unwrap().to_scalar().unwrap();
            prop_assert!(value >= 0.0);
        }
    }
}
