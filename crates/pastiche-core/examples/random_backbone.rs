//! Style transfer with a randomly initialized backbone.
//!
//! Runs the full pipeline without pretrained weights: random VGG features
//! still carry texture statistics, so the loss history shows the optimizer
//! pulling the candidate towards the style image.
//!
//! ```text
//! RUST_LOG=debug cargo run -p pastiche-core --example random_backbone
//! ```

use anyhow::Result;
use candle_core::{Device, Tensor};
use pastiche_core::loss::TotalVariationLoss;
use pastiche_core::model::{Backbone, FeatureExtractor, Vgg19, VggConfig};
use pastiche_core::optim::{run_optimization, LossStack, RunSettings};

fn main() -> Result<()> {
    let device = Device::Cpu;

    // VGG-19 layout with narrow channels to keep the demo fast on CPU
    let config = VggConfig::from_blocks(&[(2, 16), (2, 32), (4, 64), (4, 64)]);
    let backbone = Backbone::Vgg(Vgg19::random(&config, &device)?);
    let extractor = FeatureExtractor::new(
        backbone,
        &["conv4_2"],
        &["conv1_1", "conv2_1", "conv3_1", "conv4_1"],
        &device,
    )?;

    // Content: horizontal gradient. Style: high-frequency stripes.
    let side = 64;
    let ramp: Vec<f32> = (0..3 * side * side)
        .map(|i| ((i % side) as f32 / side as f32) * 3.0 - 1.5)
        .collect();
    let content = Tensor::from_vec(ramp, (1, 3, side, side), &device)?;
    let stripes: Vec<f32> = (0..3 * side * side)
        .map(|i| if (i / side) % 4 < 2 { 1.5 } else { -1.5 })
        .collect();
    let style = Tensor::from_vec(stripes, (1, 3, side, side), &device)?;

    let losses = LossStack::capture(&extractor, &content, &style, 0.7, TotalVariationLoss::new(1.0))?;
    let settings = RunSettings {
        num_steps: 20,
        ..Default::default()
    };

    let (image, history) = run_optimization(&extractor, &content, losses, &settings)?;

    println!("step  content      style        tv           total");
    for r in &history {
        println!(
            "{:>4}  {:<11.4e}  {:<11.4e}  {:<11.4e}  {:<11.4e}",
            r.step, r.content, r.style, r.tv, r.total
        );
    }
    println!("final image shape: {:?}", image.dims());

    Ok(())
}
