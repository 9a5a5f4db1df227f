//! # gain_core
//!
//! Core types shared by the GAIN crates.
//!
//! This crate provides:
//! - [`Seed`] for deterministic random number generation
//! - [`ImageSize`] and [`ImageShape`] for image tensor metadata
//! - Error types and backend aliases
//!
//! ## Shape Convention
//!
//! Image batches follow burn's channels-first convention `(B, C, H, W)`:
//! - `B`: Batch size
//! - `C`: Channels (3 for RGB/BGR input, one per class for attention maps)
//! - `H`, `W`: Spatial height and width
//!
//! ## Example
//!
//! ```rust
//! use gain_core::{ImageShape, ImageSize, Seed};
//!
//! let seed = Seed::new(42);
//! let size = ImageSize::new(321, 321);
//! let shape = ImageShape::new(1, 3, size);
//! assert_eq!(shape.numel(), 3 * 321 * 321);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod seed;
mod shape;

pub use error::{CoreError, Result};
pub use seed::Seed;
pub use shape::{ImageShape, ImageSize};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::{NdArray, NdArrayDevice};

    #[cfg(feature = "backend-wgpu")]
    pub use burn_wgpu::{Wgpu, WgpuDevice};

    #[cfg(feature = "backend-tch")]
    pub use burn_tch::{LibTorch, LibTorchDevice};

    pub use burn_autodiff::Autodiff;
}
