//! The GAIN network: one backbone run on the image and on its complements.

use burn::module::Ignored;
use burn::prelude::*;
use gain_explain::{complement_images, grad_cam, AttentionMap, ComplementConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::ParamTag;
use crate::pretrained::PretrainedArchive;
use crate::vgg::{Vgg16, Vgg16Config};

/// Configuration for [`GainNet`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GainNetConfig {
    /// Backbone layers and widths.
    pub backbone: Vgg16Config,
    /// Complement-image synthesis.
    pub complement: ComplementConfig,
}

impl GainNetConfig {
    /// Create a config from its parts.
    pub fn new(backbone: Vgg16Config, complement: ComplementConfig) -> Self {
        Self {
            backbone,
            complement,
        }
    }

    /// Randomly initialized network.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<GainNet<B>> {
        Ok(GainNet::new(self.backbone.init(device)?, self.complement))
    }

    /// Network initialized from a pretrained archive.
    pub fn init_pretrained<B: Backend>(
        &self,
        archive: &PretrainedArchive,
        device: &B::Device,
    ) -> Result<GainNet<B>> {
        Ok(GainNet::new(
            self.backbone.init_pretrained(archive, device)?,
            self.complement,
        ))
    }
}

/// Everything a training step needs from one forward pass.
#[derive(Debug, Clone)]
pub struct GainOutput<B: Backend> {
    /// Class scores of the input images, (batch, classes).
    pub logits: Tensor<B, 2>,
    /// Grad-CAM maps, (batch, classes, h', w').
    pub attention: AttentionMap<B>,
    /// Class scores of the complement images, (batch, classes, classes).
    /// Row `c` scores the image with class `c`'s attention removed.
    pub complement_logits: Tensor<B, 3>,
}

/// Guided attention inference network.
///
/// The complement pass reuses `backbone`, so both passes read the same
/// parameters and their gradients accumulate on the same tensors.
#[derive(Module, Debug)]
pub struct GainNet<B: Backend> {
    backbone: Vgg16<B>,
    complement: Ignored<ComplementConfig>,
}

impl<B: Backend> GainNet<B> {
    /// Wrap a backbone.
    pub fn new(backbone: Vgg16<B>, complement: ComplementConfig) -> Self {
        Self {
            backbone,
            complement: Ignored(complement),
        }
    }

    /// The shared backbone.
    pub fn backbone(&self) -> &Vgg16<B> {
        &self.backbone
    }

    /// Complement-image settings.
    pub fn complement_config(&self) -> &ComplementConfig {
        &self.complement
    }

    /// Grad-CAM maps for every class.
    pub fn attention(&self, images: Tensor<B, 4>) -> AttentionMap<B> {
        let out = self.backbone.forward(images);
        let gradients = self.backbone.head_input_gradients(&out.trace);
        grad_cam(out.features, gradients)
    }

    /// Both passes: scores, attention and complement scores.
    pub fn forward(&self, images: Tensor<B, 4>) -> GainOutput<B> {
        let out = self.backbone.forward(images.clone());
        let gradients = self.backbone.head_input_gradients(&out.trace);
        let attention = grad_cam(out.features, gradients);

        let [batch, classes] = out.logits.dims();
        let complements = complement_images(images, attention.values.clone(), &self.complement);
        let complement_logits = self
            .backbone
            .classify(complements)
            .reshape([batch, classes, classes]);

        GainOutput {
            logits: out.logits,
            attention,
            complement_logits,
        }
    }

    /// Tags of every trainable tensor.
    pub fn param_tags(&self) -> Vec<ParamTag> {
        self.backbone.param_tags()
    }

    /// Weight L2 penalty of the backbone.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        self.backbone.l2_penalty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::ChannelWidths;
    use burn::optim::GradientsParams;
    use burn::tensor::Distribution;
    use gain_core::backend::{Autodiff, NdArray};
    use gain_core::ImageSize;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn tiny_config() -> GainNetConfig {
        GainNetConfig::new(
            Vgg16Config::new(4).with_widths(ChannelWidths {
                input: 3,
                base: 2,
                max: 16,
                fc: 8,
            }),
            ComplementConfig {
                size: ImageSize::new(16, 16),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let images =
            Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);

        let out = model.forward(images);
        assert_eq!(out.logits.dims(), [2, 4]);
        assert_eq!(out.attention.shape(), [2, 4, 2, 2]);
        assert_eq!(out.complement_logits.dims(), [2, 4, 4]);
    }

    #[test]
    fn test_attention_is_non_negative() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        let images = Tensor::<TestBackend, 4>::random(
            [1, 3, 16, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let min: f32 = model.attention(images).values.min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_both_passes_reach_shared_weights() {
        let device = Default::default();
        let model = tiny_config().init::<TestAutodiffBackend>(&device).unwrap();
        let images = Tensor::<TestAutodiffBackend, 4>::random(
            [1, 3, 16, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        // only the complement scores: every gradient flows through the second pass
        let out = model.forward(images);
        let grads = out.complement_logits.sum().backward();

        let grads = GradientsParams::from_grads(grads, &model);

        let tags = model.param_tags();
        let first = &tags[0];
        assert_eq!(first.name, "conv1_1_w");

        let grad = grads.get::<TestBackend, 4>(first.id).unwrap();
        let norm: f32 = grad.abs().sum().into_scalar();
        assert!(norm > 0.0);
    }
}
