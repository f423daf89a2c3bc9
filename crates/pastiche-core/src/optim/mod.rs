//! Optimization of the candidate image.
//!
//! A run is described by three pieces:
//! - a [`FeatureExtractor`](crate::model::FeatureExtractor) shared with the
//!   loss capture,
//! - a [`LossStack`] holding the frozen content and style targets,
//! - [`RunSettings`] with the step count, weights, threshold and optimizer.
//!
//! [`OptimizationDriver`] executes the run one step at a time;
//! [`run_optimization`] is the one-call form.
//!
//! # Example
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use pastiche_core::loss::TotalVariationLoss;
//! use pastiche_core::model::{Backbone, FeatureExtractor, ModelKind};
//! use pastiche_core::optim::{run_optimization, LossStack, RunSettings};
//!
//! # fn main() -> pastiche_core::Result<()> {
//! let device = Device::Cpu;
//! let backbone = Backbone::random(ModelKind::Vgg, &device)?;
//! let extractor = FeatureExtractor::new(backbone, &["conv4_2"], &["conv1_1", "conv2_1"], &device)?;
//!
//! let content = Tensor::randn(0.0f32, 1.0, (1, 3, 64, 64), &device)?;
//! let style = Tensor::randn(0.0f32, 1.0, (1, 3, 64, 64), &device)?;
//! let losses = LossStack::capture(&extractor, &content, &style, 0.7, TotalVariationLoss::new(1.0))?;
//!
//! let settings = RunSettings { num_steps: 10, ..Default::default() };
//! let (image, history) = run_optimization(&extractor, &content, losses, &settings)?;
//! assert_eq!(history.len(), 10);
//! # let _ = image;
//! # Ok(())
//! # }
//! ```

mod driver;
mod lbfgs;
mod settings;
mod stack;

pub use driver::{run_optimization, DriverState, OptimizationDriver};
pub use lbfgs::{Lbfgs, LineSearch};
pub use settings::{LossHistory, LossRecord, LossWeights, OptimizerConfig, RunSettings};
pub use stack::LossStack;
