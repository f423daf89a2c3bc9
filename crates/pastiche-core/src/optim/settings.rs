//! Run settings and the loss history.

use crate::error::{PasticheError, Result};
use crate::image::PixelBounds;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Relative weights of the three loss terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    /// Style loss weight.
    pub style: f64,
    /// Content loss weight.
    pub content: f64,
    /// Total variation weight.
    pub tv: f64,
}

impl LossWeights {
    /// Check every weight is finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("style", self.style), ("content", self.content), ("tv", self.tv)] {
            if !value.is_finite() || value < 0.0 {
                return Err(PasticheError::InvalidConfig(format!(
                    "{} weight must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            style: 1e6,
            content: 1.0,
            tv: 1.0,
        }
    }
}

/// Update rule applied to the candidate image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptimizerConfig {
    /// Limited-memory BFGS with a backtracking line search.
    Lbfgs {
        /// Initial step length tried by the line search.
        lr: f64,
        /// Number of curvature pairs kept.
        history_size: usize,
        /// Step halvings before the step is abandoned.
        max_line_search: usize,
    },
    /// Adam (decoupled weight decay disabled).
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

impl OptimizerConfig {
    /// L-BFGS with default parameters.
    pub fn lbfgs() -> Self {
        Self::Lbfgs {
            lr: 1.0,
            history_size: 10,
            max_line_search: 20,
        }
    }

    /// Adam with learning rate `lr`.
    pub fn adam(lr: f64) -> Self {
        Self::Adam { lr }
    }

    /// Optimizer by name (`lbfgs` or `adam`), optionally overriding the learning rate.
    pub fn from_name(name: &str, lr: Option<f64>) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lbfgs" | "l-bfgs" => {
                let mut config = Self::lbfgs();
                if let (Some(new_lr), Self::Lbfgs { lr, .. }) = (lr, &mut config) {
                    *lr = new_lr;
                }
                Ok(config)
            }
            "adam" => Ok(Self::adam(lr.unwrap_or(0.02))),
            other => Err(PasticheError::InvalidConfig(format!(
                "unknown optimizer {:?} (expected \"lbfgs\" or \"adam\")",
                other
            ))),
        }
    }

    /// Short name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lbfgs { .. } => "lbfgs",
            Self::Adam { .. } => "adam",
        }
    }

    /// Same optimizer with a different learning rate; other fields are kept.
    pub fn with_lr(mut self, new_lr: f64) -> Self {
        match &mut self {
            Self::Lbfgs { lr, .. } | Self::Adam { lr } => *lr = new_lr,
        }
        self
    }

    /// Learning rate.
    pub fn lr(&self) -> f64 {
        match self {
            Self::Lbfgs { lr, .. } | Self::Adam { lr } => *lr,
        }
    }

    fn validate(&self) -> Result<()> {
        let lr = self.lr();
        if !lr.is_finite() || lr <= 0.0 {
            return Err(PasticheError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                lr
            )));
        }
        if let Self::Lbfgs {
            history_size,
            max_line_search,
            ..
        } = self
        {
            if *history_size == 0 || *max_line_search == 0 {
                return Err(PasticheError::InvalidConfig(
                    "lbfgs history_size and max_line_search must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::lbfgs()
    }
}

/// Everything a run needs besides the images and the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Number of optimization steps.
    pub num_steps: usize,
    /// Loss term weights.
    pub weights: LossWeights,
    /// Multiplier applied to every style layer loss.
    pub style_threshold: f64,
    /// Update rule.
    pub optimizer: OptimizerConfig,
    /// Valid pixel range of the candidate.
    pub bounds: PixelBounds,
}

impl RunSettings {
    /// Reject settings a run cannot start with.
    ///
    /// A finite threshold outside `[0, 1]` is accepted with a warning.
    pub fn validate(&self) -> Result<()> {
        if self.num_steps == 0 {
            return Err(PasticheError::InvalidConfig(
                "num_steps must be at least 1".to_string(),
            ));
        }
        self.weights.validate()?;
        self.optimizer.validate()?;

        if !self.style_threshold.is_finite() {
            return Err(PasticheError::InvalidConfig(format!(
                "style threshold must be finite, got {}",
                self.style_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.style_threshold) {
            warn!(
                threshold = self.style_threshold,
                "style threshold outside [0, 1]; applying it unclamped"
            );
        }
        Ok(())
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            num_steps: 300,
            weights: LossWeights::default(),
            style_threshold: 0.7,
            optimizer: OptimizerConfig::default(),
            bounds: PixelBounds::default(),
        }
    }
}

/// Loss values observed at one step, before its update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    /// Step number, starting at 1.
    pub step: usize,
    /// Unweighted content loss.
    pub content: f64,
    /// Unweighted style loss.
    pub style: f64,
    /// Unweighted total variation loss.
    pub tv: f64,
    /// Weighted total.
    pub total: f64,
}

impl LossRecord {
    /// First non-finite term, checked in the order content, style, tv, total.
    pub fn non_finite_term(&self) -> Option<(&'static str, f64)> {
        [
            ("content", self.content),
            ("style", self.style),
            ("tv", self.tv),
            ("total", self.total),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
    }
}

/// Append-only record of a run, one entry per executed step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LossHistory {
    records: Vec<LossRecord>,
}

impl LossHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: LossRecord) {
        self.records.push(record);
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no step was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in step order.
    pub fn records(&self) -> &[LossRecord] {
        &self.records
    }

    /// First record.
    pub fn first(&self) -> Option<&LossRecord> {
        self.records.first()
    }

    /// Most recent record.
    pub fn last(&self) -> Option<&LossRecord> {
        self.records.last()
    }

    /// Iterate over records.
    pub fn iter(&self) -> impl Iterator<Item = &LossRecord> {
        self.records.iter()
    }

    /// Serialize as a JSON array.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write as JSON to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a history previously written by [`LossHistory::save`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl<'a> IntoIterator for &'a LossHistory {
    type Item = &'a LossRecord;
    type IntoIter = std::slice::Iter<'a, LossRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
