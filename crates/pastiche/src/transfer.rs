//! High-level style transfer entry point.

use crate::config::TransferConfig;
use crate::io::{load_image, save_image};
use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use pastiche_core::loss::TotalVariationLoss;
use pastiche_core::model::{Backbone, FeatureExtractor, ModelKind};
use pastiche_core::optim::{run_optimization, LossHistory, LossStack, OptimizerConfig};
use std::path::{Path, PathBuf};
use tracing::info;

/// Output of a run.
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// Final normalized image `[1, 3, H, W]`.
    pub image: Tensor,
    /// One record per executed step.
    pub history: LossHistory,
}

impl TransferResult {
    /// Write the image; the format follows the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_image(&self.image, path)
    }

    /// Write the loss history as JSON.
    pub fn save_history(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.history
            .save(path)
            .with_context(|| format!("writing loss history {}", path.display()))
    }
}

/// Builder for [`StyleTransfer`].
pub struct StyleTransferBuilder {
    config: TransferConfig,
    weights: Option<PathBuf>,
    backbone: Option<Backbone>,
    device: Device,
}

impl StyleTransferBuilder {
    /// Builder with default configuration on the CPU.
    pub fn new() -> Self {
        Self {
            config: TransferConfig::default(),
            weights: None,
            backbone: None,
            device: Device::Cpu,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the backbone family.
    pub fn model(mut self, model: ModelKind) -> Self {
        self.config.model = model;
        self
    }

    /// Path to the pretrained SafeTensors weights.
    pub fn weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights = Some(path.into());
        self
    }

    /// Use an already constructed backbone instead of loading weights.
    pub fn backbone(mut self, backbone: Backbone) -> Self {
        self.config.model = backbone.kind();
        self.backbone = Some(backbone);
        self
    }

    /// Set the compute device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Set the number of optimization steps.
    pub fn steps(mut self, steps: usize) -> Self {
        self.config.num_steps = steps;
        self
    }

    /// Set the image side length.
    pub fn image_size(mut self, size: usize) -> Self {
        self.config.image_size = size;
        self
    }

    /// Set the style loss weight.
    pub fn style_weight(mut self, weight: f64) -> Self {
        self.config.style_weight = weight;
        self
    }

    /// Set the content loss weight.
    pub fn content_weight(mut self, weight: f64) -> Self {
        self.config.content_weight = weight;
        self
    }

    /// Set the total variation weight.
    pub fn tv_weight(mut self, weight: f64) -> Self {
        self.config.tv_weight = weight;
        self
    }

    /// Set the style threshold.
    pub fn style_threshold(mut self, threshold: f64) -> Self {
        self.config.style_threshold = threshold;
        self
    }

    /// Set the optimizer.
    pub fn optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.config.optimizer = optimizer;
        self
    }

    /// Set the content layers.
    pub fn content_layers<S: Into<String>>(mut self, layers: impl IntoIterator<Item = S>) -> Self {
        self.config.content_layers = Some(layers.into_iter().map(Into::into).collect());
        self
    }

    /// Set the style layers.
    pub fn style_layers<S: Into<String>>(mut self, layers: impl IntoIterator<Item = S>) -> Self {
        self.config.style_layers = Some(layers.into_iter().map(Into::into).collect());
        self
    }

    /// Validate the configuration and construct the feature extractor.
    pub fn build(self) -> Result<StyleTransfer> {
        self.config.validate().context("invalid transfer configuration")?;

        let backbone = match (self.backbone, &self.weights) {
            (Some(backbone), _) => backbone,
            (None, Some(path)) => Backbone::load(self.config.model, path, &self.device)
                .with_context(|| {
                    format!("loading {} weights from {}", self.config.model, path.display())
                })?,
            (None, None) => bail!("no backbone weights given"),
        };

        let extractor = FeatureExtractor::new(
            backbone,
            &self.config.content_layers(),
            &self.config.style_layers(),
            &self.device,
        )
        .context("resolving feature layers")?;

        Ok(StyleTransfer {
            config: self.config,
            extractor,
            device: self.device,
        })
    }
}

impl Default for StyleTransferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured style transfer, reusable across image pairs.
pub struct StyleTransfer {
    config: TransferConfig,
    extractor: FeatureExtractor,
    device: Device,
}

impl StyleTransfer {
    /// Start building a transfer.
    pub fn builder() -> StyleTransferBuilder {
        StyleTransferBuilder::new()
    }

    /// Load both images at the configured size and run the optimization.
    pub fn run(&self, content: impl AsRef<Path>, style: impl AsRef<Path>) -> Result<TransferResult> {
        let size = u32::try_from(self.config.image_size).context("image_size too large")?;
        let content = load_image(content, size, &self.device).context("loading content image")?;
        let style = load_image(style, size, &self.device).context("loading style image")?;
        self.run_tensors(&content, &style)
    }

    /// Run on already normalized `[1, 3, H, W]` tensors.
    ///
    /// The candidate starts as a copy of the content image.
    pub fn run_tensors(&self, content: &Tensor, style: &Tensor) -> Result<TransferResult> {
        let settings = self.config.run_settings();
        info!(
            model = %self.config.model,
            steps = settings.num_steps,
            optimizer = settings.optimizer.name(),
            "starting style transfer"
        );

        let losses = LossStack::capture(
            &self.extractor,
            content,
            style,
            settings.style_threshold,
            TotalVariationLoss::new(1.0),
        )
        .context("capturing content and style targets")?;

        let (image, history) = run_optimization(&self.extractor, content, losses, &settings)
            .context("optimization failed")?;

        if let Some(last) = history.last() {
            info!(steps = history.len(), total = last.total, "style transfer finished");
        }
        Ok(TransferResult { image, history })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Feature extractor.
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Compute device.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastiche_core::model::{Vgg19, VggConfig};
    use pastiche_core::PasticheError;

    fn tiny_backbone() -> Backbone {
        let config = VggConfig::from_blocks(&[(1, 4), (1, 8)]);
        Backbone::Vgg(Vgg19::random(&config, &Device::Cpu).unwrap())
    }

    fn transfer(steps: usize) -> StyleTransfer {
        StyleTransfer::builder()
            .backbone(tiny_backbone())
            .content_layers(["conv2_1"])
            .style_layers(["conv1_1", "conv2_1"])
            .image_size(16)
            .steps(steps)
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_weights_or_backbone() {
        assert!(StyleTransfer::builder().build().is_err());
    }

    #[test]
    fn default_layers_missing_from_small_backbone() {
        // conv4_2 does not exist in a two-block network.
        let err = StyleTransfer::builder()
            .backbone(tiny_backbone())
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<PasticheError>(),
            Some(PasticheError::LayerNotFound { .. })
        ));
    }

    #[test]
    fn run_tensors_produces_history() {
        let transfer = transfer(3);
        let content = Tensor::rand(-1.0f32, 1.0, (1, 3, 16, 16), &Device::Cpu).unwrap();
        let style = Tensor::rand(-1.0f32, 1.0, (1, 3, 16, 16), &Device::Cpu).unwrap();

        let result = transfer.run_tensors(&content, &style).unwrap();
        assert_eq!(result.image.dims(), &[1, 3, 16, 16]);
        assert_eq!(result.history.len(), 3);
    }

    #[test]
    fn mismatched_images_fail() {
        let transfer = transfer(1);
        let content = Tensor::rand(-1.0f32, 1.0, (1, 3, 16, 16), &Device::Cpu).unwrap();
        let style = Tensor::rand(-1.0f32, 1.0, (1, 3, 8, 8), &Device::Cpu).unwrap();
        let err = transfer.run_tensors(&content, &style).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PasticheError>(),
            Some(PasticheError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn run_from_files() {
        let dir = std::env::temp_dir().join(format!("pastiche-transfer-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let content_path = dir.join("content.png");
        let style_path = dir.join("style.png");
        image::RgbImage::from_fn(24, 24, |x, _| image::Rgb([(x * 10) as u8, 80, 120]))
            .save(&content_path)
            .unwrap();
        image::RgbImage::from_fn(24, 24, |_, y| image::Rgb([30, (y * 10) as u8, 200]))
            .save(&style_path)
            .unwrap();

        let result = transfer(2).run(&content_path, &style_path).unwrap();
        assert_eq!(result.image.dims(), &[1, 3, 16, 16]);

        let out = dir.join("out.png");
        let history = dir.join("history.json");
        result.save(&out).unwrap();
        result.save_history(&history).unwrap();
        assert!(out.exists());
        assert_eq!(LossHistory::from_file(&history).unwrap().len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
