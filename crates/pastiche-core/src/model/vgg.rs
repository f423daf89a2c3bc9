//! VGG feature stack.
//!
//! The network is flattened into named stages exactly as torchvision lays
//! out `vgg19().features`: every 3x3 convolution is followed by a ReLU and
//! every block ends with a 2x2 pooling stage. Stage `n` of this list reads
//! its parameters from `features.{n}.weight` / `features.{n}.bias`.
//!
//! | stage      | name        |
//! |------------|-------------|
//! | conv       | `conv{b}_{i}` |
//! | activation | `relu{b}_{i}` |
//! | pooling    | `pool{b}`     |

use super::{Pooling, VggConfig, WeightLoader};
use crate::error::{PasticheError, Result};
use candle_core::{Device, Tensor};

/// One step of the VGG feature stack.
#[derive(Debug, Clone)]
enum Stage {
    Conv {
        /// [out, in, 3, 3]
        weight: Tensor,
        /// [1, out, 1, 1]
        bias: Tensor,
    },
    Relu,
    Pool(Pooling),
}

impl Stage {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = match self {
            Stage::Conv { weight, bias } => x.conv2d(weight, 1, 1, 1, 1)?.broadcast_add(bias)?,
            Stage::Relu => x.relu()?,
            Stage::Pool(Pooling::Max) => x.max_pool2d(2)?,
            Stage::Pool(Pooling::Avg) => x.avg_pool2d(2)?,
        };
        Ok(y)
    }
}

/// VGG convolutional feature extractor.
#[derive(Debug, Clone)]
pub struct Vgg19 {
    stages: Vec<Stage>,
    names: Vec<String>,
    config: VggConfig,
}

impl Vgg19 {
    /// Create a VGG stack with He-initialized random weights (for testing).
    pub fn random(config: &VggConfig, device: &Device) -> Result<Self> {
        Self::build(config, |_, in_ch, out_ch| {
            let std = (2.0 / (in_ch * 9) as f64).sqrt() as f32;
            let weight = Tensor::randn(0.0f32, std, &[out_ch, in_ch, 3, 3], device)?;
            let bias = Tensor::zeros(out_ch, candle_core::DType::F32, device)?;
            Ok((weight, bias))
        })
    }

    /// Load torchvision weights (`features.{n}.weight|bias`).
    pub fn from_loader(config: &VggConfig, loader: &WeightLoader) -> Result<Self> {
        Self::build(config, |index, in_ch, out_ch| {
            let weight = loader.get_shaped(&format!("features.{index}.weight"), &[out_ch, in_ch, 3, 3])?;
            let bias = loader.get_shaped(&format!("features.{index}.bias"), &[out_ch])?;
            Ok((weight, bias))
        })
    }

    fn build(
        config: &VggConfig,
        mut conv_params: impl FnMut(usize, usize, usize) -> Result<(Tensor, Tensor)>,
    ) -> Result<Self> {
        if config.blocks.is_empty() || config.blocks.iter().any(|b| b.convs == 0 || b.channels == 0) {
            return Err(PasticheError::InvalidConfig(
                "VGG config needs at least one non-empty block".to_string(),
            ));
        }

        let mut stages = Vec::new();
        let mut names = Vec::new();
        let mut in_ch = 3;

        for (b, block) in config.blocks.iter().enumerate() {
            for i in 0..block.convs {
                let (weight, bias) = conv_params(stages.len(), in_ch, block.channels)?;
                let bias = bias.reshape((1, block.channels, 1, 1))?;
                stages.push(Stage::Conv { weight, bias });
                names.push(format!("conv{}_{}", b + 1, i + 1));

                stages.push(Stage::Relu);
                names.push(format!("relu{}_{}", b + 1, i + 1));

                in_ch = block.channels;
            }
            stages.push(Stage::Pool(config.pooling));
            names.push(format!("pool{}", b + 1));
        }

        Ok(Self {
            stages,
            names,
            config: config.clone(),
        })
    }

    /// Stage names in forward order.
    pub fn layer_names(&self) -> Vec<String> {
        self.names.clone()
    }

    /// Run the stack up to stage `last`, handing each stage's output to `visit`.
    pub fn forward_layers(
        &self,
        image: &Tensor,
        last: usize,
        visit: &mut dyn FnMut(usize, &Tensor) -> Result<()>,
    ) -> Result<()> {
        if last >= self.stages.len() {
            return Err(PasticheError::InvalidConfig(format!(
                "stage {} out of range for {} stages",
                last,
                self.stages.len()
            )));
        }

        let mut x = image.clone();
        for (i, stage) in self.stages.iter().take(last + 1).enumerate() {
            x = stage.forward(&x)?;
            visit(i, &x)?;
        }
        Ok(())
    }

    /// Get the configuration.
    pub fn config(&self) -> &VggConfig {
        &self.config
    }
}
