//! Differentiable loss terms.
//!
//! | Loss | Compares | Target |
//! |------|----------|--------|
//! | [`ContentLoss`] | feature maps (MSE) | content image features |
//! | [`StyleLoss`] | Gram matrices (MSE) | style image features |
//! | [`TotalVariationLoss`] | neighboring pixels | none |
//!
//! Content and style losses own a detached snapshot of their target, so
//! gradients only flow into the live (candidate) features.

mod content;
mod style;
mod tv;

pub use content::ContentLoss;
pub use style::{gram_matrix, layer_weight, StyleLoss};
pub use tv::{TotalVariationLoss, TvNorm};
