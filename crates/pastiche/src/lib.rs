//! # Pastiche
//!
//! Neural style transfer: repaint a content image with the textures of a
//! style image by optimizing its pixels against a frozen backbone.
//!
//! This crate wraps [`pastiche_core`] with image decoding and encoding, a
//! JSON configuration file and a builder-style entry point.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pastiche::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let transfer = StyleTransfer::builder()
//!         .model(ModelKind::Vgg)
//!         .weights("vgg19.safetensors")
//!         .steps(300)
//!         .build()?;
//!
//!     let result = transfer.run("content.jpg", "style.jpg")?;
//!     result.save("output/stylized.png")?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core modules
pub use pastiche_core::{error, loss, model, optim, PasticheError};

pub mod config;
pub mod io;
mod transfer;

pub use config::TransferConfig;
pub use transfer::{StyleTransfer, StyleTransferBuilder, TransferResult};

/// Commonly used types.
pub mod prelude {
    pub use crate::config::TransferConfig;
    pub use crate::io::{load_image, save_image};
    pub use crate::transfer::{StyleTransfer, StyleTransferBuilder, TransferResult};
    pub use pastiche_core::prelude::*;

    // Re-export useful external types
    pub use anyhow;
    pub use tracing;
}
