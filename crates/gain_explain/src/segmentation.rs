//! Segmentation masks from attention maps.

use burn::prelude::*;
use burn::tensor::activation::softmax;
use gain_core::ImageSize;

use crate::resize::{resize_bilinear, Alignment};

/// Per-pixel class distribution at label resolution.
///
/// Softmax over the class axis, corner-aligned bilinear resize to `size`,
/// then every probability below `min_prob` is raised to `min_prob`.
pub fn class_probabilities<B: Backend>(
    attention: Tensor<B, 4>,
    size: ImageSize,
    min_prob: f32,
) -> Tensor<B, 4> {
    let probs = softmax(attention, 1);
    resize_bilinear(probs, size, Alignment::Corners).clamp_min(min_prob)
}

/// Most probable class per pixel, shape (batch, height, width).
pub fn segmentation_masks<B: Backend>(
    attention: Tensor<B, 4>,
    size: ImageSize,
    min_prob: f32,
) -> Tensor<B, 3, Int> {
    class_probabilities(attention, size, min_prob)
        .argmax(1)
        .squeeze::<3>(1)
}
