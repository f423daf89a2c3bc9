//! Feature extraction over a frozen backbone.
//!
//! [`FeatureExtractor`] resolves the configured content and style layer
//! identifiers against the backbone once, at construction, and afterwards
//! maps an image to the two ordered lists of feature maps. Backbone weights
//! are plain tensors, so gradients only flow back to the input image.

use super::{ModelKind, VggConfig, Vgg19, VisionTransformer, VitConfig, WeightLoader};
use crate::error::{PasticheError, Result};
use crate::image::image_dims;
use candle_core::{Device, Tensor};
use std::path::Path;
use tracing::info;

/// A frozen backbone network.
#[derive(Debug, Clone)]
pub enum Backbone {
    /// Convolutional backbone.
    Vgg(Vgg19),
    /// Attention-based backbone.
    Vit(VisionTransformer),
}

impl Backbone {
    /// Backbone family.
    pub fn kind(&self) -> ModelKind {
        match self {
            Backbone::Vgg(_) => ModelKind::Vgg,
            Backbone::Vit(_) => ModelKind::Vit,
        }
    }

    /// Backbone with random weights and the default architecture of `kind`.
    pub fn random(kind: ModelKind, device: &Device) -> Result<Self> {
        match kind {
            ModelKind::Vgg => Ok(Backbone::Vgg(Vgg19::random(&VggConfig::default(), device)?)),
            ModelKind::Vit => Ok(Backbone::Vit(VisionTransformer::random(
                &VitConfig::default(),
                device,
            )?)),
        }
    }

    /// Load a pretrained backbone with the default architecture of `kind`.
    pub fn load(kind: ModelKind, weights: &Path, device: &Device) -> Result<Self> {
        let loader = WeightLoader::from_path(weights, device)?;
        info!(model = %kind, tensors = loader.len(), path = %weights.display(), "loaded backbone weights");
        match kind {
            ModelKind::Vgg => Ok(Backbone::Vgg(Vgg19::from_loader(&VggConfig::default(), &loader)?)),
            ModelKind::Vit => Ok(Backbone::Vit(VisionTransformer::from_loader(
                &VitConfig::default(),
                &loader,
            )?)),
        }
    }

    /// Stage names in forward order.
    pub fn layer_names(&self) -> Vec<String> {
        match self {
            Backbone::Vgg(m) => m.layer_names(),
            Backbone::Vit(m) => m.layer_names(),
        }
    }

    fn forward_layers(
        &self,
        image: &Tensor,
        last: usize,
        visit: &mut dyn FnMut(usize, &Tensor) -> Result<()>,
    ) -> Result<()> {
        match self {
            Backbone::Vgg(m) => m.forward_layers(image, last, visit),
            Backbone::Vit(m) => m.forward_layers(image, last, visit),
        }
    }
}

/// A requested layer resolved to its stage index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LayerTap {
    name: String,
    stage: usize,
}

/// Maps an image to content and style feature maps.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    backbone: Backbone,
    content: Vec<LayerTap>,
    style: Vec<LayerTap>,
    /// Deepest stage any tap needs.
    last_stage: usize,
    device: Device,
}

impl FeatureExtractor {
    /// Wrap `backbone`, resolving every layer identifier up front.
    pub fn new<S: AsRef<str>>(
        backbone: Backbone,
        content_layers: &[S],
        style_layers: &[S],
        device: &Device,
    ) -> Result<Self> {
        if content_layers.is_empty() {
            return Err(PasticheError::InvalidConfig("no content layers configured".to_string()));
        }
        if style_layers.is_empty() {
            return Err(PasticheError::InvalidConfig("no style layers configured".to_string()));
        }

        let names = backbone.layer_names();
        let resolve = |layers: &[S]| -> Result<Vec<LayerTap>> {
            layers
                .iter()
                .map(|layer| {
                    let layer = layer.as_ref();
                    names
                        .iter()
                        .position(|n| n == layer)
                        .map(|stage| LayerTap {
                            name: layer.to_string(),
                            stage,
                        })
                        .ok_or_else(|| PasticheError::LayerNotFound {
                            layer: layer.to_string(),
                            model: backbone.kind().to_string(),
                        })
                })
                .collect()
        };

        let content = resolve(content_layers)?;
        let style = resolve(style_layers)?;
        let last_stage = content
            .iter()
            .chain(style.iter())
            .map(|t| t.stage)
            .max()
            .unwrap_or(0);

        info!(
            model = %backbone.kind(),
            content = content.len(),
            style = style.len(),
            last_stage,
            "feature extractor ready"
        );

        Ok(Self {
            backbone,
            content,
            style,
            last_stage,
            device: device.clone(),
        })
    }

    /// Parse `model_type`, load pretrained weights and resolve the layers.
    ///
    /// The model type is validated before the weights file is touched.
    pub fn pretrained<S: AsRef<str>>(
        model_type: &str,
        weights: &Path,
        content_layers: &[S],
        style_layers: &[S],
        device: &Device,
    ) -> Result<Self> {
        let kind: ModelKind = model_type.parse()?;
        let backbone = Backbone::load(kind, weights, device)?;
        Self::new(backbone, content_layers, style_layers, device)
    }

    /// Extract `(content_maps, style_maps)`, aligned with the configured layers.
    pub fn extract(&self, image: &Tensor) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        image_dims(image)?;

        let mut content: Vec<Option<Tensor>> = vec![None; self.content.len()];
        let mut style: Vec<Option<Tensor>> = vec![None; self.style.len()];

        self.backbone
            .forward_layers(image, self.last_stage, &mut |stage, map| {
                for (slot, tap) in content.iter_mut().zip(&self.content) {
                    if tap.stage == stage {
                        *slot = Some(map.clone());
                    }
                }
                for (slot, tap) in style.iter_mut().zip(&self.style) {
                    if tap.stage == stage {
                        *slot = Some(map.clone());
                    }
                }
                Ok(())
            })?;

        let collect = |slots: Vec<Option<Tensor>>, taps: &[LayerTap]| -> Result<Vec<Tensor>> {
            slots
                .into_iter()
                .zip(taps)
                .map(|(slot, tap)| {
                    slot.ok_or_else(|| {
                        PasticheError::ModelError(format!("layer {} produced no output", tap.name))
                    })
                })
                .collect()
        };

        Ok((collect(content, &self.content)?, collect(style, &self.style)?))
    }

    /// Backbone family.
    pub fn kind(&self) -> ModelKind {
        self.backbone.kind()
    }

    /// Wrapped backbone.
    pub fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    /// Configured content layer identifiers.
    pub fn content_layers(&self) -> Vec<&str> {
        self.content.iter().map(|t| t.name.as_str()).collect()
    }

    /// Configured style layer identifiers.
    pub fn style_layers(&self) -> Vec<&str> {
        self.style.iter().map(|t| t.name.as_str()).collect()
    }

    /// Compute device.
    pub fn device(&self) -> &Device {
        &self.device
    }
}
