//! # Pastiche Core
//!
//! Neural style transfer by direct optimization of image pixels.
//!
//! This crate provides:
//! - **Frozen backbones** (VGG and ViT) exposing named intermediate layers
//! - **Feature extraction** of content and style maps in one forward pass
//! - **Losses**: content MSE, Gram-matrix style loss, total variation
//! - **Optimization driver** with L-BFGS or Adam updates and a loss history

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod image;
pub mod loss;
pub mod model;
pub mod optim;

pub use error::{PasticheError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{PasticheError, Result};
    pub use crate::image::{image_dims, PixelBounds, IMAGENET_MEAN, IMAGENET_STD};
    pub use crate::loss::{ContentLoss, StyleLoss, TotalVariationLoss, TvNorm};
    pub use crate::model::{Backbone, FeatureExtractor, ModelKind, VggConfig, VitConfig};
    pub use crate::optim::{
        run_optimization, DriverState, LossHistory, LossRecord, LossStack, LossWeights,
        OptimizationDriver, OptimizerConfig, RunSettings,
    };
}
