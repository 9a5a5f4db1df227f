//! Complement images: the input with each class's attended region removed.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use gain_core::ImageSize;
use serde::{Deserialize, Serialize};

use crate::resize::{resize_bilinear, Alignment};

/// Parameters of the soft threshold mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplementConfig {
    /// Resolution both the image and the attention are resized to.
    pub size: ImageSize,
    /// Steepness `w` of the sigmoid.
    pub sigma: f32,
    /// Centre `th` of the sigmoid.
    pub threshold: f32,
}

impl Default for ComplementConfig {
    fn default() -> Self {
        Self {
            size: ImageSize::new(321, 321),
            sigma: 10.0,
            threshold: 0.5,
        }
    }
}

/// Build one complement image per (image, class) pair.
///
/// For class `c` the result is `σ(w · ((I − I ⊙ att_c) − th))`, with `att_c`
/// broadcast over the colour channels.
///
/// # Arguments
///
/// * `image` - Input batch, shape (batch, channels, height, width)
/// * `attention` - Attention maps, shape (batch, classes, h', w')
/// * `config` - Output resolution and threshold parameters
///
/// # Returns
///
/// Shape (batch * classes, channels, size.height, size.width), the class
/// index varying fastest.
pub fn complement_images<B: Backend>(
    image: Tensor<B, 4>,
    attention: Tensor<B, 4>,
    config: &ComplementConfig,
) -> Tensor<B, 4> {
    let image = resize_bilinear(image, config.size, Alignment::Legacy);
    let attention = resize_bilinear(attention, config.size, Alignment::Legacy);

    let [batch, channels, height, width] = image.dims();
    let classes = attention.dims()[1];

    let image = image.unsqueeze_dim::<5>(1).repeat_dim(1, classes);
    let attention = attention.unsqueeze_dim::<5>(2).repeat_dim(2, channels);

    let erased = image.clone() - image * attention;
    let masked = sigmoid((erased - config.threshold) * config.sigma);

    masked.reshape([batch * classes, channels, height, width])
}
