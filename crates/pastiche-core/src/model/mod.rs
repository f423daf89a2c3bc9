//! Frozen backbones and feature extraction.
//!
//! Provides:
//! - Backbone configuration ([`VggConfig`], [`VitConfig`], [`ModelKind`])
//! - Weight loading from SafeTensors
//! - The VGG and ViT feature stacks
//! - [`FeatureExtractor`], the single entry point used by the losses

mod attention;
mod config;
mod extractor;
mod loader;
mod mlp;
mod norm;
mod vgg;
mod vit;

pub use attention::{Attention, EncoderBlock};
pub use config::{ModelKind, Pooling, VggBlock, VggConfig, VitConfig};
pub use extractor::{Backbone, FeatureExtractor};
pub use loader::{normalize_name, WeightLoader};
pub use mlp::GeluMlp;
pub use norm::LayerNorm;
pub use vgg::Vgg19;
pub use vit::{PatchEmbedding, VisionTransformer};

use crate::error::Result;
use candle_core::Tensor;

/// `x @ weight^T + bias` over the last dimension of a 2D or 3D input.
pub(crate) fn linear(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let dims = x.dims();
    let in_features = dims[dims.len() - 1];
    let out_features = weight.dim(0)?;

    // Handle 3D inputs by reshaping to 2D
    let (x_2d, lead) = if dims.len() == 3 {
        (x.reshape((dims[0] * dims[1], in_features))?, Some((dims[0], dims[1])))
    } else {
        (x.clone(), None)
    };

    let mut out = x_2d.matmul(&weight.t()?)?;
    if let Some(bias) = bias {
        out = out.broadcast_add(bias)?;
    }

    let out = match lead {
        Some((b, s)) => out.reshape((b, s, out_features))?,
        None => out,
    };
    Ok(out)
}
