//! Dilated VGG16 backbone.
//!
//! The trunk is VGG16 with the last two pooling layers at stride 1 and the
//! stage-5 convolutions dilated by 2, so the feature map stays at 1/8 of the
//! input resolution. `batch_norm*` layers may be placed anywhere in the trunk. The head is fully convolutional (`fc6` dilated by 12,
//! `fc7` 1×1); its output is summed over space and projected by `fc8`.
//!
//! Grad-CAM needs `∂Y_c / ∂A` for every class as a tensor that can itself be
//! differentiated. Reverse-mode autodiff only gives first-order gradients, so
//! the head's vector-Jacobian product is written out explicitly in
//! [`Vgg16::head_input_gradients`]: the `fc8` column is broadcast over space,
//! gated by the ReLU and dropout masks recorded in [`HeadTrace`], and carried
//! back through each head convolution with a transposed convolution sharing the
//! forward weights.

use burn::module::{Ignored, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::module::conv_transpose2d;
use burn::tensor::ops::ConvTransposeOptions;
use burn::tensor::{Distribution, TensorData};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::{
    ChannelWidths, ConvSpec, HeadConv, HeadOp, LayerPlan, TrunkOp, VGG16_HEAD, VGG16_TRUNK,
};
use crate::params::{LrGroup, ParamTag};
use crate::pretrained::PretrainedArchive;

/// Standard deviation of the random weight initializer.
const INIT_STD: f64 = 0.01;

/// Configuration for the dilated VGG16.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vgg16Config {
    /// Number of output classes.
    pub n_classes: usize,
    /// Trunk layer names, in order.
    pub trunk: Vec<String>,
    /// Head layer names between the trunk and the spatial sum.
    pub head: Vec<String>,
    /// Channel widths.
    pub widths: ChannelWidths,
    /// Dropout probability of the `drop*` layers.
    pub dropout: f64,
}

impl Default for Vgg16Config {
    fn default() -> Self {
        Self {
            n_classes: 21,
            trunk: VGG16_TRUNK.iter().map(|s| s.to_string()).collect(),
            head: VGG16_HEAD.iter().map(|s| s.to_string()).collect(),
            widths: ChannelWidths::default(),
            dropout: 0.5,
        }
    }
}

impl Vgg16Config {
    /// Create a config with the standard layers for `n_classes` classes.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            ..Default::default()
        }
    }

    /// Set the channel widths.
    #[must_use]
    pub fn with_widths(mut self, widths: ChannelWidths) -> Self {
        self.widths = widths;
        self
    }

    /// Set the dropout probability.
    #[must_use]
    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    /// Replace the trunk and head layer lists.
    #[must_use]
    pub fn with_layers(mut self, trunk: Vec<String>, head: Vec<String>) -> Self {
        self.trunk = trunk;
        self.head = head;
        self
    }

    /// Parse and plan the layer lists.
    pub fn plan(&self) -> Result<LayerPlan> {
        LayerPlan::new(&self.trunk, &self.head, self.widths)
    }

    /// Initialize with N(0, 0.01) weights and zero biases.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Vgg16<B>> {
        let plan = self.plan()?;
        tracing::debug!("VGG16 plan:\n{}", plan);

        let convs = plan.convs.iter().map(|spec| init_conv(spec, device)).collect();
        let pools = plan
            .pools
            .iter()
            .map(|spec| {
                MaxPool2dConfig::new([3, 3])
                    .with_strides([spec.stride, spec.stride])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init()
            })
            .collect();
        let norms = plan
            .norms
            .iter()
            .map(|spec| BatchNormConfig::new(spec.channels).init(device))
            .collect();
        let fc6 = init_conv(&plan.fc6, device);
        let fc7 = init_conv(&plan.fc7, device);
        let fc8 = init_linear(
            plan.head_channels(),
            self.n_classes,
            Initializer::Normal {
                mean: 0.0,
                std: INIT_STD,
            },
            device,
        );

        Ok(Vgg16 {
            convs,
            pools,
            norms,
            fc6,
            fc7,
            fc8,
            plan: Ignored(plan),
            dropout: Ignored(self.dropout),
        })
    }

    /// Initialize from a pretrained archive.
    ///
    /// Every layer except `fc8` is read from `archive`; `fc8` gets a
    /// Xavier-uniform weight and a zero bias.
    pub fn init_pretrained<B: Backend>(
        &self,
        archive: &PretrainedArchive,
        device: &B::Device,
    ) -> Result<Vgg16<B>> {
        self.init(device)?.load_pretrained(archive, device)
    }
}

fn init_conv<B: Backend>(spec: &ConvSpec, device: &B::Device) -> Conv2d<B> {
    let padding = spec.padding();
    let mut conv = Conv2dConfig::new(
        [spec.in_channels, spec.out_channels],
        [spec.kernel, spec.kernel],
    )
    .with_padding(PaddingConfig2d::Explicit(padding, padding))
    .with_dilation([spec.dilation, spec.dilation])
    .with_initializer(Initializer::Normal {
        mean: 0.0,
        std: INIT_STD,
    })
    .init(device);
    conv.bias = Some(Param::from_tensor(Tensor::zeros([spec.out_channels], device)));
    conv
}

fn init_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    initializer: Initializer,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_initializer(initializer)
        .init(device);
    linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
    linear
}

fn load_conv<B: Backend>(
    conv: &mut Conv2d<B>,
    spec: &ConvSpec,
    archive: &PretrainedArchive,
    device: &B::Device,
) -> Result<()> {
    let shape = [spec.out_channels, spec.in_channels, spec.kernel, spec.kernel];
    let weight = archive.conv_weight(&spec.name, shape)?;
    let bias = archive.bias(&spec.name, spec.out_channels)?;

    conv.weight = Param::from_tensor(Tensor::from_data(TensorData::new(weight, shape), device));
    conv.bias = Some(Param::from_tensor(Tensor::from_data(
        TensorData::new(bias, [spec.out_channels]),
        device,
    )));
    Ok(())
}

/// Per-op masks recorded during a forward pass through the head.
#[derive(Debug, Clone)]
pub struct HeadTrace<B: Backend> {
    /// One entry per head op; `Some` holds the multiplicative gate of a ReLU
    /// or active dropout.
    gates: Vec<Option<Tensor<B, 4>>>,
    /// Shape of the head output.
    dims: [usize; 4],
}

impl<B: Backend> HeadTrace<B> {
    /// Shape of the head output, (batch, channels, height, width).
    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }
}

/// Result of a full backbone pass.
#[derive(Debug, Clone)]
pub struct BackboneOutput<B: Backend> {
    /// Trunk output A, shape (batch, channels, h', w').
    pub features: Tensor<B, 4>,
    /// Class scores Y, shape (batch, classes).
    pub logits: Tensor<B, 2>,
    /// Gates needed by [`Vgg16::head_input_gradients`].
    pub trace: HeadTrace<B>,
}

/// Dilated VGG16 classifier.
#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pools: Vec<MaxPool2d>,
    norms: Vec<BatchNorm<B, 2>>,
    fc6: Conv2d<B>,
    fc7: Conv2d<B>,
    fc8: Linear<B>,
    plan: Ignored<LayerPlan>,
    dropout: Ignored<f64>,
}

impl<B: Backend> Vgg16<B> {
    /// Replace every convolution with the archive's weights and reinitialize
    /// `fc8` with Xavier-uniform. Batch norms keep their initial state.
    pub fn load_pretrained(mut self, archive: &PretrainedArchive, device: &B::Device) -> Result<Self> {
        for (conv, spec) in self.convs.iter_mut().zip(self.plan.convs.iter()) {
            load_conv(conv, spec, archive, device)?;
        }
        load_conv(&mut self.fc6, &self.plan.fc6, archive, device)?;
        load_conv(&mut self.fc7, &self.plan.fc7, archive, device)?;

        let [d_input, d_output] = self.fc8.weight.val().dims();
        self.fc8 = init_linear(
            d_input,
            d_output,
            Initializer::XavierUniform { gain: 1.0 },
            device,
        );

        tracing::info!(
            "Initialized {} layers from pretrained weights",
            self.plan.convs.len() + 2
        );
        Ok(self)
    }

    /// The layer plan this network was built from.
    pub fn plan(&self) -> &LayerPlan {
        &self.plan
    }

    /// The `fc8` projection.
    pub fn classifier(&self) -> &Linear<B> {
        &self.fc8
    }

    /// Number of output classes.
    pub fn n_classes(&self) -> usize {
        self.fc8.weight.val().dims()[1]
    }

    /// Run the trunk: image batch to feature map A.
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for op in self.plan.trunk.iter() {
            x = match *op {
                TrunkOp::Conv(i) => self.convs[i].forward(x),
                TrunkOp::Relu => relu(x),
                TrunkOp::Pool(i) => self.pools[i].forward(x),
                TrunkOp::BatchNorm(i) => self.norms[i].forward(x),
            };
        }
        x
    }

    /// Full pass, keeping the feature map and the head gates.
    pub fn forward(&self, x: Tensor<B, 4>) -> BackboneOutput<B> {
        let features = self.features(x);
        let (logits, trace) = self.head_forward(features.clone());
        BackboneOutput {
            features,
            logits,
            trace,
        }
    }

    /// Class scores only.
    pub fn classify(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let (x, _) = self.run_head(self.features(x), false);
        self.project(x)
    }

    /// Head and classifier applied to a feature map.
    pub fn head_forward(&self, features: Tensor<B, 4>) -> (Tensor<B, 2>, HeadTrace<B>) {
        let (x, gates) = self.run_head(features, true);
        let trace = HeadTrace {
            gates,
            dims: x.dims(),
        };
        (self.project(x), trace)
    }

    fn run_head(&self, x: Tensor<B, 4>, record: bool) -> (Tensor<B, 4>, Vec<Option<Tensor<B, 4>>>) {
        let mut x = x;
        let mut gates = Vec::with_capacity(if record { self.plan.head.len() } else { 0 });

        for op in self.plan.head.iter() {
            let gate = match *op {
                HeadOp::Conv(conv) => {
                    x = self.head_conv(conv).forward(x);
                    None
                }
                HeadOp::Relu => {
                    let gate = record.then(|| x.clone().greater_elem(0.0).float());
                    x = relu(x);
                    gate
                }
                HeadOp::Dropout => match self.dropout_mask(&x) {
                    Some(mask) => {
                        x = x * mask.clone();
                        Some(mask)
                    }
                    None => None,
                },
            };
            if record {
                gates.push(gate);
            }
        }

        (x, gates)
    }

    /// Inverted-dropout mask, or `None` when dropout is inactive.
    ///
    /// Dropout only runs on autodiff backends, as with burn's own `Dropout`.
    fn dropout_mask(&self, x: &Tensor<B, 4>) -> Option<Tensor<B, 4>> {
        let prob = *self.dropout;
        if !B::ad_enabled() || prob <= 0.0 {
            return None;
        }
        let keep = 1.0 - prob;
        if keep <= 0.0 {
            return Some(x.zeros_like());
        }
        let mask = Tensor::random(x.shape(), Distribution::Bernoulli(keep), &x.device());
        Some(mask / keep)
    }

    fn project(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, _, _] = x.dims();
        let pooled = x.sum_dim(3).sum_dim(2).reshape([batch, channels]);
        self.fc8.forward(pooled)
    }

    fn head_conv(&self, conv: HeadConv) -> &Conv2d<B> {
        match conv {
            HeadConv::Fc6 => &self.fc6,
            HeadConv::Fc7 => &self.fc7,
        }
    }

    /// `∂Y_c / ∂A` for every class, shape (batch, classes, channels, h', w').
    ///
    /// The result is built from the head weights and the recorded gates with
    /// ordinary tensor ops, so it stays differentiable with respect to both
    /// the weights and the feature map.
    pub fn head_input_gradients(&self, trace: &HeadTrace<B>) -> Tensor<B, 5> {
        let [batch, channels, height, width] = trace.dims;
        let classes = self.n_classes();
        let n = batch * classes;

        // ∂Y_c / ∂(head output) is column c of fc8, identical at every position.
        let mut grad = self
            .fc8
            .weight
            .val()
            .transpose()
            .reshape([1, classes, channels, 1, 1])
            .repeat_dim(0, batch)
            .repeat_dim(3, height)
            .repeat_dim(4, width)
            .reshape([n, channels, height, width]);

        for (op, gate) in self.plan.head.iter().zip(trace.gates.iter()).rev() {
            grad = match (*op, gate) {
                (HeadOp::Conv(conv), _) => self.conv_input_gradient(conv, grad),
                (_, Some(gate)) => grad * per_class(gate.clone(), classes),
                (_, None) => grad,
            };
        }

        let [_, k, h, w] = grad.dims();
        grad.reshape([batch, classes, k, h, w])
    }

    fn conv_input_gradient(&self, conv: HeadConv, grad: Tensor<B, 4>) -> Tensor<B, 4> {
        let spec = self.plan.head_conv(conv);
        let padding = spec.padding();
        conv_transpose2d(
            grad,
            self.head_conv(conv).weight.val(),
            None,
            ConvTransposeOptions::new(
                [1, 1],
                [padding, padding],
                [0, 0],
                [spec.dilation, spec.dilation],
                1,
            ),
        )
    }

    /// Tags for every trainable tensor, in layer order.
    pub fn param_tags(&self) -> Vec<ParamTag> {
        let mut tags = Vec::with_capacity(2 * (self.convs.len() + self.norms.len() + 3));
        let backbone = self
            .convs
            .iter()
            .zip(self.plan.convs.iter())
            .chain([(&self.fc6, &self.plan.fc6), (&self.fc7, &self.plan.fc7)]);

        for (conv, spec) in backbone {
            tags.push(ParamTag {
                id: conv.weight.id,
                name: format!("{}_w", spec.name),
                group: LrGroup::Weight,
                rank: 4,
            });
            if let Some(bias) = &conv.bias {
                tags.push(ParamTag {
                    id: bias.id,
                    name: format!("{}_b", spec.name),
                    group: LrGroup::Bias,
                    rank: 1,
                });
            }
        }

        for (norm, spec) in self.norms.iter().zip(self.plan.norms.iter()) {
            tags.push(ParamTag {
                id: norm.gamma.id,
                name: format!("{}_gamma", spec.name),
                group: LrGroup::Norm,
                rank: 1,
            });
            tags.push(ParamTag {
                id: norm.beta.id,
                name: format!("{}_beta", spec.name),
                group: LrGroup::Norm,
                rank: 1,
            });
        }

        tags.push(ParamTag {
            id: self.fc8.weight.id,
            name: "fc8_w".to_string(),
            group: LrGroup::ClassifierWeight,
            rank: 2,
        });
        if let Some(bias) = &self.fc8.bias {
            tags.push(ParamTag {
                id: bias.id,
                name: "fc8_b".to_string(),
                group: LrGroup::ClassifierBias,
                rank: 1,
            });
        }
        tags
    }

    /// `Σ_W ½‖W‖²` over every weight tensor, biases excluded.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let device = self.fc8.weight.val().device();
        let mut total = Tensor::<B, 1>::zeros([1], &device);
        for conv in self.convs.iter().chain([&self.fc6, &self.fc7]) {
            total = total + conv.weight.val().powf_scalar(2.0).sum();
        }
        total = total + self.fc8.weight.val().powf_scalar(2.0).sum();
        total * 0.5
    }
}

/// Repeat a (batch, c, h, w) gate for every class: (batch * classes, c, h, w).
fn per_class<B: Backend>(gate: Tensor<B, 4>, classes: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = gate.dims();
    gate.unsqueeze_dim::<5>(1)
        .repeat_dim(1, classes)
        .reshape([batch * classes, channels, height, width])
}
