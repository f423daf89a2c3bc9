//! The iterative refinement loop.

use super::lbfgs::{Lbfgs, LineSearch};
use super::settings::{LossHistory, LossRecord, OptimizerConfig, RunSettings};
use super::stack::LossStack;
use crate::error::{PasticheError, Result};
use crate::image::{image_dims, PixelBounds};
use crate::model::FeatureExtractor;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use tracing::{debug, info};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, no step executed.
    Initialized,
    /// At least one step executed, more remaining.
    Stepping,
    /// All requested steps executed.
    Completed,
}

/// Loss terms of one forward pass, still attached to the graph.
struct Terms {
    content: Tensor,
    style: Tensor,
    tv: Tensor,
    total: Tensor,
}

impl Terms {
    fn record(&self, step: usize) -> Result<LossRecord> {
        let scalar = |t: &Tensor| -> Result<f64> { Ok(t.to_scalar::<f32>()? as f64) };
        Ok(LossRecord {
            step,
            content: scalar(&self.content)?,
            style: scalar(&self.style)?,
            tv: scalar(&self.tv)?,
            total: scalar(&self.total)?,
        })
    }
}

/// The weighted objective: extractor, frozen losses and weights.
struct Objective<'a> {
    extractor: &'a FeatureExtractor,
    losses: LossStack,
    style_weight: f64,
    content_weight: f64,
    tv_weight: f64,
}

impl Objective<'_> {
    fn terms(&self, image: &Tensor) -> Result<Terms> {
        let (content, style, tv) = self.losses.terms(self.extractor, image)?;
        let total = (((&content * self.content_weight)? + (&style * self.style_weight)?)?
            + (&tv * self.tv_weight)?)?;
        Ok(Terms {
            content,
            style,
            tv,
            total,
        })
    }

    fn value(&self, image: &Tensor) -> Result<f64> {
        Ok(self.terms(image)?.total.to_scalar::<f32>()? as f64)
    }
}

enum Updater {
    Lbfgs(Lbfgs),
    Adam(AdamW),
}

/// Drives the candidate image towards the content and style targets.
///
/// Each [`step`](Self::step) clamps the candidate, evaluates the weighted
/// loss, backpropagates to the candidate only, applies one optimizer update
/// and records the pre-update loss values.
pub struct OptimizationDriver<'a> {
    objective: Objective<'a>,
    candidate: Var,
    updater: Updater,
    bounds: PixelBounds,
    num_steps: usize,
    history: LossHistory,
    state: DriverState,
}

impl<'a> OptimizationDriver<'a> {
    /// Prepare a run.
    ///
    /// Fails with `DimensionMismatch` if the candidate's spatial size differs
    /// from the images the losses were captured on. The run-level style
    /// threshold replaces the one each style loss was built with.
    pub fn new(
        extractor: &'a FeatureExtractor,
        candidate_image: &Tensor,
        losses: LossStack,
        settings: &RunSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let dims = image_dims(candidate_image)?;
        if dims != losses.image_dims {
            return Err(PasticheError::DimensionMismatch {
                expected: losses.image_dims,
                actual: dims,
                context: "candidate image".to_string(),
            });
        }
        if losses.content.len() != extractor.content_layers().len()
            || losses.style.len() != extractor.style_layers().len()
        {
            return Err(PasticheError::InvalidConfig(format!(
                "loss stack has {} content and {} style losses, extractor has {} and {} layers",
                losses.content.len(),
                losses.style.len(),
                extractor.content_layers().len(),
                extractor.style_layers().len()
            )));
        }

        let losses = losses.with_style_threshold(settings.style_threshold);
        let candidate = Var::from_tensor(&candidate_image.detach())?;

        let updater = match settings.optimizer {
            OptimizerConfig::Lbfgs {
                lr,
                history_size,
                max_line_search,
            } => Updater::Lbfgs(
                Lbfgs::new(lr)
                    .with_history_size(history_size)
                    .with_max_line_search(max_line_search),
            ),
            OptimizerConfig::Adam { lr } => {
                let params = ParamsAdamW {
                    lr,
                    weight_decay: 0.0,
                    ..Default::default()
                };
                Updater::Adam(AdamW::new(vec![candidate.clone()], params)?)
            }
        };

        info!(
            steps = settings.num_steps,
            optimizer = settings.optimizer.name(),
            style_weight = settings.weights.style,
            content_weight = settings.weights.content,
            tv_weight = settings.weights.tv,
            style_threshold = settings.style_threshold,
            height = dims.0,
            width = dims.1,
            "optimization run initialized"
        );

        Ok(Self {
            objective: Objective {
                extractor,
                losses,
                style_weight: settings.weights.style,
                content_weight: settings.weights.content,
                tv_weight: settings.weights.tv,
            },
            candidate,
            updater,
            bounds: settings.bounds,
            num_steps: settings.num_steps,
            history: LossHistory::new(),
            state: DriverState::Initialized,
        })
    }

    /// Execute one step and return its record.
    pub fn step(&mut self) -> Result<LossRecord> {
        if self.state == DriverState::Completed {
            return Err(PasticheError::InvalidConfig(format!(
                "run already completed after {} steps",
                self.num_steps
            )));
        }
        let step = self.history.len() + 1;

        if !self.bounds.is_unbounded() {
            let clamped = self.bounds.clamp(self.candidate.as_tensor())?;
            self.candidate.set(&clamped)?;
        }

        let terms = self.objective.terms(self.candidate.as_tensor())?;
        let record = terms.record(step)?;
        if let Some((term, value)) = record.non_finite_term() {
            let layer = self.objective.losses.non_finite_layer(
                self.objective.extractor,
                self.candidate.as_tensor(),
                term,
            )?;
            return Err(PasticheError::NonFiniteLoss {
                step,
                term,
                layer,
                value,
            });
        }

        let grads = terms.total.backward()?;
        match &mut self.updater {
            Updater::Adam(adam) => adam.step(&grads)?,
            Updater::Lbfgs(lbfgs) => {
                let grad = grads.get(self.candidate.as_tensor()).ok_or_else(|| {
                    PasticheError::ModelError("no gradient reached the candidate image".to_string())
                })?;
                let objective = &self.objective;
                let bounds = self.bounds;
                let outcome =
                    lbfgs.step(self.candidate.as_tensor(), grad, record.total, |trial| {
                        let point = bounds.clamp(trial)?;
                        let value = objective.value(&point)?;
                        Ok((point, value))
                    })?;
                if let LineSearch::Accepted { point, .. } = outcome {
                    self.candidate.set(&point)?;
                }
            }
        }

        debug!(
            step,
            content = record.content,
            style = record.style,
            tv = record.tv,
            total = record.total,
            "step"
        );

        self.history.push(record);
        self.state = if self.history.len() >= self.num_steps {
            DriverState::Completed
        } else {
            DriverState::Stepping
        };
        Ok(record)
    }

    /// Step until completion and return the final image and history.
    pub fn run(mut self) -> Result<(Tensor, LossHistory)> {
        while self.state != DriverState::Completed {
            self.step()?;
        }
        self.into_result()
    }

    /// Stop here and return the clamped candidate and the history so far.
    pub fn into_result(self) -> Result<(Tensor, LossHistory)> {
        let image = self.bounds.clamp(&self.candidate.as_tensor().detach())?;
        if let Some(last) = self.history.last() {
            info!(
                steps = self.history.len(),
                total = last.total,
                "optimization run finished"
            );
        }
        Ok((image, self.history))
    }

    /// Current state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Records of the executed steps.
    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    /// Current candidate (not yet clamped for the next step).
    pub fn candidate(&self) -> &Tensor {
        self.candidate.as_tensor()
    }

    /// Frozen losses, with the run-level style threshold applied.
    pub fn losses(&self) -> &LossStack {
        &self.objective.losses
    }
}

/// Run `settings.num_steps` steps from `candidate_image`.
pub fn run_optimization(
    extractor: &FeatureExtractor,
    candidate_image: &Tensor,
    losses: LossStack,
    settings: &RunSettings,
) -> Result<(Tensor, LossHistory)> {
    OptimizationDriver::new(extractor, candidate_image, losses, settings)?.run()
}
