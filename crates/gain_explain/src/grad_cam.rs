//! Grad-CAM attention maps.
//!
//! For class `c`, the map is `ReLU(Σ_k α_ck · A^k)` where `A^k` is channel `k`
//! of the last convolutional feature map and `α_ck` is the spatial mean of
//! `∂Y_c / ∂A^k`, normalized so that `Σ_k α_ck = 1` for every image and class.

use burn::prelude::*;

/// Denominators smaller than this in magnitude are replaced by it.
const NORM_EPS: f32 = 1e-12;

/// Per-class attention over the feature-map grid.
#[derive(Debug, Clone)]
pub struct AttentionMap<B: Backend> {
    /// Attention values, shape (batch, classes, height, width).
    pub values: Tensor<B, 4>,
}

impl<B: Backend> AttentionMap<B> {
    /// Wrap attention values.
    pub fn new(values: Tensor<B, 4>) -> Self {
        Self { values }
    }

    /// Shape of the map.
    pub fn shape(&self) -> [usize; 4] {
        self.values.dims()
    }

    /// Number of class channels.
    pub fn n_classes(&self) -> usize {
        self.values.dims()[1]
    }

    /// Attention of a single class, shape (batch, 1, height, width).
    pub fn class_channel(&self, class: usize) -> Tensor<B, 4> {
        let [batch, _, height, width] = self.values.dims();
        self.values
            .clone()
            .slice([0..batch, class..class + 1, 0..height, 0..width])
    }

    /// Rescale all values to [0, 1].
    pub fn normalize(&self) -> Self {
        let min_val: f32 = self.values.clone().min().into_scalar().elem();
        let max_val: f32 = self.values.clone().max().into_scalar().elem();
        let range = max_val - min_val;

        let values = if range > 1e-8 {
            (self.values.clone() - min_val) / range
        } else {
            self.values.clone()
        };

        Self { values }
    }

    /// Consume the map and return the raw tensor.
    pub fn into_inner(self) -> Tensor<B, 4> {
        self.values
    }
}

/// Spatially averaged gradients.
///
/// `gradients` has shape (batch, classes, channels, height, width) and holds
/// `∂Y_c / ∂A` for every class; the result has shape (batch, classes, channels).
pub fn channel_weights<B: Backend>(gradients: Tensor<B, 5>) -> Tensor<B, 3> {
    let [batch, classes, channels, height, width] = gradients.dims();
    gradients
        .reshape([batch, classes, channels, height * width])
        .mean_dim(3)
        .reshape([batch, classes, channels])
}

/// Scale the weights of every (image, class) pair so they sum to one over
/// the channel axis.
pub fn normalize_channel_weights<B: Backend>(weights: Tensor<B, 3>) -> Tensor<B, 3> {
    let total = weights.clone().sum_dim(2);
    let tiny = total.clone().abs().lower_elem(NORM_EPS);
    let total = total.mask_fill(tiny, NORM_EPS);
    weights / total
}

/// Compute Grad-CAM maps for every class at once.
///
/// # Arguments
///
/// * `features` - Feature map A, shape (batch, channels, height, width)
/// * `gradients` - `∂Y_c / ∂A` for every class, shape
///   (batch, classes, channels, height, width)
///
/// # Returns
///
/// Attention of shape (batch, classes, height, width), non-negative.
pub fn grad_cam<B: Backend>(features: Tensor<B, 4>, gradients: Tensor<B, 5>) -> AttentionMap<B> {
    let [batch, channels, height, width] = features.dims();
    let classes = gradients.dims()[1];

    let weights = normalize_channel_weights(channel_weights(gradients));

    // (batch, classes, channels) x (batch, channels, h*w) -> (batch, classes, h*w)
    let cam = weights.matmul(features.reshape([batch, channels, height * width]));
    let cam = cam.clamp_min(0.0);

    AttentionMap::new(cam.reshape([batch, classes, height, width]))
}
