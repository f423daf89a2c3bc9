//! Error types for Pastiche Core.

use thiserror::Error;

/// Result type alias for Pastiche operations.
pub type Result<T> = std::result::Result<T, PasticheError>;

/// Errors that can occur while building or running a style transfer.
#[derive(Error, Debug)]
pub enum PasticheError {
    /// Unknown backbone selector.
    #[error("unsupported model type: {0:?} (expected \"vgg\" or \"vit\")")]
    UnsupportedModel(String),

    /// Requested layer is not part of the backbone.
    #[error("layer {layer:?} not found in {model} backbone")]
    LayerNotFound {
        /// Requested layer identifier.
        layer: String,
        /// Backbone the layer was looked up in.
        model: String,
    },

    /// Images that must share spatial dimensions do not.
    #[error("dimension mismatch for {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected (height, width).
        expected: (usize, usize),
        /// Actual (height, width).
        actual: (usize, usize),
        /// Which image was checked.
        context: String,
    },

    /// A loss term became NaN or infinite during optimization.
    #[error(
        "non-finite {term} loss at step {step}{}: {value}",
        .layer.as_ref().map(|l| format!(" in layer {}", l)).unwrap_or_default()
    )]
    NonFiniteLoss {
        /// Step (1-based) at which the value was observed.
        step: usize,
        /// Loss term name: content, style, tv or total.
        term: &'static str,
        /// First feature layer whose own loss is non-finite, if any.
        layer: Option<String>,
        /// Offending value.
        value: f64,
    },

    /// Invalid run or model configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tensor shape mismatch.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Model loading error.
    #[error("model error: {0}")]
    ModelError(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}
