//! Command-line front end.
//!
//! ```text
//! pastiche --content photo.jpg --style painting.jpg --weights vgg19.safetensors \
//!     --steps 300 --output output/stylized.png --history output/history.json
//! ```

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use pastiche::config::TransferConfig;
use pastiche::model::ModelKind;
use pastiche::optim::OptimizerConfig;
use pastiche::StyleTransfer;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Repaint a content image in the style of another image.
#[derive(Parser, Debug)]
#[command(name = "pastiche", version, about)]
struct Cli {
    /// Content image
    #[arg(long)]
    content: PathBuf,

    /// Style image
    #[arg(long)]
    style: PathBuf,

    /// Pretrained backbone weights (SafeTensors file or directory)
    #[arg(long)]
    weights: PathBuf,

    /// Backbone: vgg or vit (overrides the config file)
    #[arg(long)]
    model: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optimization steps
    #[arg(long)]
    steps: Option<usize>,

    /// Style loss weight
    #[arg(long)]
    style_weight: Option<f64>,

    /// Content loss weight
    #[arg(long)]
    content_weight: Option<f64>,

    /// Total variation weight
    #[arg(long)]
    tv_weight: Option<f64>,

    /// Multiplier on every style layer loss (0 disables style)
    #[arg(long)]
    style_threshold: Option<f64>,

    /// Image side length in pixels
    #[arg(long)]
    size: Option<usize>,

    /// Optimizer: lbfgs or adam
    #[arg(long)]
    optimizer: Option<String>,

    /// Learning rate (initial line search step for lbfgs)
    #[arg(long)]
    lr: Option<f64>,

    /// Output image (default: <output_dir>/stylized.png)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write the loss history as JSON
    #[arg(long)]
    history: Option<PathBuf>,

    /// Run on the first CUDA device
    #[arg(long)]
    cuda: bool,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied.
    fn transfer_config(&self) -> Result<TransferConfig> {
        let mut config = match &self.config {
            Some(path) => TransferConfig::from_file(path)?,
            None => TransferConfig::default(),
        };

        if let Some(model) = &self.model {
            let model: ModelKind = model.parse()?;
            if model != config.model {
                // Layer names differ between backbones.
                config.content_layers = None;
                config.style_layers = None;
            }
            config.model = model;
        }
        if let Some(steps) = self.steps {
            config.num_steps = steps;
        }
        if let Some(weight) = self.style_weight {
            config.style_weight = weight;
        }
        if let Some(weight) = self.content_weight {
            config.content_weight = weight;
        }
        if let Some(weight) = self.tv_weight {
            config.tv_weight = weight;
        }
        if let Some(threshold) = self.style_threshold {
            config.style_threshold = threshold;
        }
        if let Some(size) = self.size {
            config.image_size = size;
        }
        match (&self.optimizer, self.lr) {
            (Some(name), lr) => config.optimizer = OptimizerConfig::from_name(name, lr)?,
            (None, Some(lr)) => config.optimizer = config.optimizer.with_lr(lr),
            (None, None) => {}
        }
        Ok(config)
    }

    fn device(&self) -> Result<Device> {
        if self.cuda {
            Device::new_cuda(0).context("opening CUDA device 0")
        } else {
            Ok(Device::Cpu)
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.transfer_config()?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| config.output_dir.join("stylized.png"));

    let transfer = StyleTransfer::builder()
        .config(config)
        .weights(&cli.weights)
        .device(cli.device()?)
        .build()?;

    let result = transfer.run(&cli.content, &cli.style)?;
    result.save(&output)?;
    info!(path = %output.display(), "wrote stylized image");

    if let Some(path) = &cli.history {
        result.save_history(path)?;
        info!(path = %path.display(), steps = result.history.len(), "wrote loss history");
    }
    Ok(())
}
