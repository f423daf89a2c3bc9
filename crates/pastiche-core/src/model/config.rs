//! Backbone configuration.

use crate::error::{PasticheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backbone family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Convolutional backbone (VGG).
    Vgg,
    /// Attention-based backbone (Vision Transformer).
    Vit,
}

impl ModelKind {
    /// Identifier used on the command line and in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Vgg => "vgg",
            ModelKind::Vit => "vit",
        }
    }
}

impl FromStr for ModelKind {
    type Err = PasticheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vgg" => Ok(ModelKind::Vgg),
            "vit" => Ok(ModelKind::Vit),
            _ => Err(PasticheError::UnsupportedModel(s.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downsampling between VGG blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// 2x2 max pooling (torchvision default).
    #[default]
    Max,
    /// 2x2 average pooling, smoother gradients.
    Avg,
}

/// One VGG block: `convs` 3x3 convolutions with `channels` outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VggBlock {
    /// Number of conv+relu pairs.
    pub convs: usize,
    /// Output channels of every conv in the block.
    pub channels: usize,
}

/// Configuration for a VGG feature stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VggConfig {
    /// Blocks in order; each is followed by a pooling stage.
    pub blocks: Vec<VggBlock>,
    /// Pooling between blocks.
    #[serde(default)]
    pub pooling: Pooling,
}

impl VggConfig {
    /// VGG-19 feature layers.
    pub fn vgg19() -> Self {
        Self::from_blocks(&[(2, 64), (2, 128), (4, 256), (4, 512), (4, 512)])
    }

    /// VGG-16 feature layers.
    pub fn vgg16() -> Self {
        Self::from_blocks(&[(2, 64), (2, 128), (3, 256), (3, 512), (3, 512)])
    }

    /// Build from `(convs, channels)` pairs.
    pub fn from_blocks(blocks: &[(usize, usize)]) -> Self {
        Self {
            blocks: blocks
                .iter()
                .map(|&(convs, channels)| VggBlock { convs, channels })
                .collect(),
            pooling: Pooling::Max,
        }
    }

    /// Set the pooling kind.
    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    /// Total number of conv layers.
    pub fn num_convs(&self) -> usize {
        self.blocks.iter().map(|b| b.convs).sum()
    }
}

impl Default for VggConfig {
    fn default() -> Self {
        Self::vgg19()
    }
}

/// Configuration for a Vision Transformer encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitConfig {
    /// Side of the square training resolution.
    pub image_size: usize,
    /// Side of a square patch.
    pub patch_size: usize,
    /// Token width.
    pub hidden_size: usize,
    /// Number of transformer blocks.
    pub num_layers: usize,
    /// Number of attention heads.
    pub num_heads: usize,
    /// MLP hidden width.
    pub intermediate_size: usize,
    /// LayerNorm epsilon.
    pub layer_norm_eps: f64,
}

impl VitConfig {
    /// Patch grid side at the training resolution.
    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Per-head width.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            return Err(PasticheError::InvalidConfig(format!(
                "image_size {} is not a multiple of patch_size {}",
                self.image_size, self.patch_size
            )));
        }
        if self.num_heads == 0 || self.hidden_size % self.num_heads != 0 {
            return Err(PasticheError::InvalidConfig(format!(
                "hidden_size {} is not divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        Ok(())
    }
}

impl Default for VitConfig {
    fn default() -> Self {
        // ViT-B/16 at 224
        Self {
            image_size: 224,
            patch_size: 16,
            hidden_size: 768,
            num_layers: 12,
            num_heads: 12,
            intermediate_size: 3072,
            layer_norm_eps: 1e-6,
        }
    }
}
