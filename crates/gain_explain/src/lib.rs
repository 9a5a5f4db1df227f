//! # gain_explain
//!
//! Attention tooling for GAIN:
//! - Grad-CAM maps from feature maps and their class-score gradients
//! - Differentiable bilinear resizing
//! - Complement images with the attended region suppressed
//! - Per-pixel segmentation masks from attention maps

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod complement;
mod grad_cam;
mod resize;
mod segmentation;

pub use complement::{complement_images, ComplementConfig};
pub use grad_cam::{channel_weights, grad_cam, normalize_channel_weights, AttentionMap};
pub use resize::{interpolation_matrix, resize_bilinear, Alignment};
pub use segmentation::{class_probabilities, segmentation_masks};
