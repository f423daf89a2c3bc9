//! Transfer configuration.
//!
//! A [`TransferConfig`] collects everything a run needs that is not an
//! image: backbone choice, layer selection, image size, loss weights and the
//! optimizer. It is read from JSON; missing fields take their defaults, and
//! missing layer lists fall back to the defaults of the selected model.

use anyhow::{bail, Context, Result};
use pastiche_core::image::PixelBounds;
use pastiche_core::model::ModelKind;
use pastiche_core::optim::{LossWeights, OptimizerConfig, RunSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default content layers of the VGG backbone.
pub const VGG_CONTENT_LAYERS: &[&str] = &["conv4_2"];
/// Default style layers of the VGG backbone.
pub const VGG_STYLE_LAYERS: &[&str] = &["conv1_1", "conv2_1", "conv3_1", "conv4_1", "conv5_1"];
/// Default content layers of the ViT backbone.
pub const VIT_CONTENT_LAYERS: &[&str] = &["block_8"];
/// Default style layers of the ViT backbone.
pub const VIT_STYLE_LAYERS: &[&str] = &["block_1", "block_3", "block_5", "block_7", "block_9"];

/// Settings of a style transfer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Backbone family.
    pub model: ModelKind,
    /// Side length images are resized to.
    pub image_size: usize,
    /// Content layers; `None` selects the model defaults.
    pub content_layers: Option<Vec<String>>,
    /// Style layers; `None` selects the model defaults.
    pub style_layers: Option<Vec<String>>,
    /// Optimization steps.
    pub num_steps: usize,
    /// Style loss weight.
    pub style_weight: f64,
    /// Content loss weight.
    pub content_weight: f64,
    /// Total variation weight.
    pub tv_weight: f64,
    /// Multiplier on every style layer loss.
    pub style_threshold: f64,
    /// Update rule.
    pub optimizer: OptimizerConfig,
    /// Directory outputs are written to.
    pub output_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Vgg,
            image_size: 256,
            content_layers: None,
            style_layers: None,
            num_steps: 300,
            style_weight: 1e6,
            content_weight: 1.0,
            tv_weight: 1.0,
            style_threshold: 0.7,
            optimizer: OptimizerConfig::default(),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl TransferConfig {
    /// Defaults for `model`.
    pub fn for_model(model: ModelKind) -> Self {
        Self {
            model,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Content layers in effect.
    pub fn content_layers(&self) -> Vec<String> {
        match &self.content_layers {
            Some(layers) => layers.clone(),
            None => default_layers(self.model).0,
        }
    }

    /// Style layers in effect.
    pub fn style_layers(&self) -> Vec<String> {
        match &self.style_layers {
            Some(layers) => layers.clone(),
            None => default_layers(self.model).1,
        }
    }

    /// Check values the core does not check itself.
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            bail!("image_size must be positive");
        }
        self.run_settings().validate()?;
        Ok(())
    }

    /// Core run settings with ImageNet pixel bounds.
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            num_steps: self.num_steps,
            weights: LossWeights {
                style: self.style_weight,
                content: self.content_weight,
                tv: self.tv_weight,
            },
            style_threshold: self.style_threshold,
            optimizer: self.optimizer,
            bounds: PixelBounds::default(),
        }
    }
}

/// `(content, style)` default layers of `model`.
pub fn default_layers(model: ModelKind) -> (Vec<String>, Vec<String>) {
    let (content, style) = match model {
        ModelKind::Vgg => (VGG_CONTENT_LAYERS, VGG_STYLE_LAYERS),
        ModelKind::Vit => (VIT_CONTENT_LAYERS, VIT_STYLE_LAYERS),
    };
    let owned = |layers: &[&str]| -> Vec<String> {
        layers.iter().map(|s| s.to_string()).collect()
    };
    (owned(content), owned(style))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.model, ModelKind::Vgg);
        assert_eq!(config.image_size, 256);
        assert_eq!(config.num_steps, 300);
        assert_eq!(config.style_weight, 1e6);
        assert_eq!(config.content_weight, 1.0);
        assert_eq!(config.tv_weight, 1.0);
        assert_eq!(config.style_threshold, 0.7);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.content_layers(), vec!["conv4_2"]);
        assert_eq!(config.style_layers().len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn vit_defaults_follow_model() {
        let config = TransferConfig::from_json(r#"{"model": "vit"}"#).unwrap();
        assert_eq!(config.content_layers(), vec!["block_8"]);
        assert_eq!(
            config.style_layers(),
            vec!["block_1", "block_3", "block_5", "block_7", "block_9"]
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = TransferConfig::from_json(
            r#"{
                "num_steps": 50,
                "style_layers": ["conv1_1", "conv3_1"],
                "optimizer": {"type": "adam", "lr": 0.05}
            }"#,
        )
        .unwrap();
        assert_eq!(config.num_steps, 50);
        assert_eq!(config.style_layers(), vec!["conv1_1", "conv3_1"]);
        assert_eq!(config.content_layers(), vec!["conv4_2"]);
        assert_eq!(config.optimizer, OptimizerConfig::adam(0.05));
        assert_eq!(config.image_size, 256);
    }

    #[test]
    fn unknown_model_rejected() {
        assert!(TransferConfig::from_json(r#"{"model": "resnet"}"#).is_err());
    }

    #[test]
    fn invalid_values_rejected() {
        let config = TransferConfig {
            image_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TransferConfig {
            style_weight: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("pastiche-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let config = TransferConfig {
            num_steps: 12,
            style_threshold: 0.3,
            ..TransferConfig::for_model(ModelKind::Vit)
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(TransferConfig::from_file(&path).unwrap(), config);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn run_settings_mirror_config() {
        let config = TransferConfig {
            num_steps: 7,
            tv_weight: 0.5,
            ..Default::default()
        };
        let settings = config.run_settings();
        assert_eq!(settings.num_steps, 7);
        assert_eq!(settings.weights.tv, 0.5);
        assert_eq!(settings.bounds, PixelBounds::default());
    }
}
