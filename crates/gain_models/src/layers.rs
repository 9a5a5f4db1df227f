//! Typed layer names and the channel planner for the VGG16 trunk and head.
//!
//! Layers are given by name (`conv3_2`, `relu3_2`, `batch_norm3`, `pool3`,
//! `fc6`, `drop6`, ...)
//! and parsed into [`LayerKind`] before any weight is created. The planner then
//! walks the trunk once, tracking the cumulative stride, and derives every
//! convolution's channel widths from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Trunk layers of VGG16 with pooling after every stage.
pub const VGG16_TRUNK: [&str; 31] = [
    "conv1_1", "relu1_1", "conv1_2", "relu1_2", "pool1", //
    "conv2_1", "relu2_1", "conv2_2", "relu2_2", "pool2", //
    "conv3_1", "relu3_1", "conv3_2", "relu3_2", "conv3_3", "relu3_3", "pool3", //
    "conv4_1", "relu4_1", "conv4_2", "relu4_2", "conv4_3", "relu4_3", "pool4", //
    "conv5_1", "relu5_1", "conv5_2", "relu5_2", "conv5_3", "relu5_3", "pool5",
];

/// Fully-convolutional head placed on top of the trunk.
pub const VGG16_HEAD: [&str; 6] = ["fc6", "relu6", "drop6", "fc7", "relu7", "drop7"];

/// Dilation of the stage-5 convolutions.
const STAGE5_DILATION: usize = 2;

/// Dilation of the `fc6` convolution.
const FC6_DILATION: usize = 12;

/// A parsed layer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// `conv<stage>_<index>`: 3×3 convolution.
    Conv {
        /// Stage number, 1-based.
        stage: usize,
        /// Position within the stage, 1-based.
        index: usize,
    },
    /// `relu*`
    Relu,
    /// `pool<stage>`: 3×3 max pooling.
    Pool {
        /// Stage number, 1-based.
        stage: usize,
    },
    /// `fc<n>`
    Fc(usize),
    /// `drop*`
    Dropout,
    /// `batch_norm*`: per-channel batch normalization.
    BatchNorm,
}

impl FromStr for LayerKind {
    type Err = ModelError;

    fn from_str(name: &str) -> Result<Self> {
        let unknown = || ModelError::UnimplementedLayer(name.to_string());

        if let Some(rest) = name.strip_prefix("conv") {
            let (stage, index) = rest.split_once('_').ok_or_else(unknown)?;
            let stage = stage.parse().map_err(|_| unknown())?;
            let index = index.parse().map_err(|_| unknown())?;
            if stage == 0 || index == 0 {
                return Err(unknown());
            }
            Ok(Self::Conv { stage, index })
        } else if let Some(stage) = name.strip_prefix("pool") {
            let stage = stage.parse().map_err(|_| unknown())?;
            Ok(Self::Pool { stage })
        } else if let Some(n) = name.strip_prefix("fc") {
            n.parse().map(Self::Fc).map_err(|_| unknown())
        } else if name.starts_with("relu") {
            Ok(Self::Relu)
        } else if name.starts_with("drop") {
            Ok(Self::Dropout)
        } else if name.starts_with("batch_norm") {
            Ok(Self::BatchNorm)
        } else {
            Err(unknown())
        }
    }
}

impl LayerKind {
    /// Stride this layer multiplies the running stride by.
    pub fn stride(&self) -> usize {
        match self {
            Self::Pool { stage } if *stage <= 3 => 2,
            _ => 1,
        }
    }

    /// Dilation of a trunk convolution.
    pub fn dilation(&self) -> usize {
        match self {
            Self::Conv { stage: 5, .. } => STAGE5_DILATION,
            _ => 1,
        }
    }
}

/// Channel widths of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelWidths {
    /// Input image channels.
    pub input: usize,
    /// Width of the first stage; later stages scale it by the stride.
    pub base: usize,
    /// Upper bound on trunk widths.
    pub max: usize,
    /// Width of the `fc6`/`fc7` convolutions.
    pub fc: usize,
}

impl Default for ChannelWidths {
    fn default() -> Self {
        Self {
            input: 3,
            base: 64,
            max: 512,
            fc: 1024,
        }
    }
}

impl ChannelWidths {
    /// Output width of a trunk convolution at the given cumulative stride.
    pub fn at_stride(&self, stride: usize) -> usize {
        (self.base * stride).min(self.max)
    }
}

/// Shape of one convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvSpec {
    /// Layer name, also its key in pretrained archives.
    pub name: String,
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Square kernel size.
    pub kernel: usize,
    /// Dilation; padding equals `dilation * (kernel - 1) / 2`.
    pub dilation: usize,
}

impl ConvSpec {
    /// Padding that keeps the spatial size.
    pub fn padding(&self) -> usize {
        self.dilation * (self.kernel - 1) / 2
    }
}

/// Shape of one max pooling layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    /// Layer name.
    pub name: String,
    /// Pooling stride.
    pub stride: usize,
}

/// Shape of one batch normalization layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormSpec {
    /// Layer name.
    pub name: String,
    /// Normalized channels.
    pub channels: usize,
}

/// One trunk operation, indexing into the planned convolutions, pools or norms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkOp {
    /// Convolution `convs[i]`.
    Conv(usize),
    /// Rectified linear unit.
    Relu,
    /// Max pooling `pools[i]`.
    Pool(usize),
    /// Batch normalization `norms[i]`.
    BatchNorm(usize),
}

/// Which head convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadConv {
    /// 3×3 convolution with dilation 12.
    Fc6,
    /// 1×1 convolution.
    Fc7,
}

/// One head operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOp {
    /// Head convolution.
    Conv(HeadConv),
    /// Rectified linear unit.
    Relu,
    /// Inverted dropout.
    Dropout,
}

/// The planned network: op sequences plus the shape of every weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    /// Trunk ops in order.
    pub trunk: Vec<TrunkOp>,
    /// Trunk convolutions, in order of appearance.
    pub convs: Vec<ConvSpec>,
    /// Trunk pools, in order of appearance.
    pub pools: Vec<PoolSpec>,
    /// Trunk batch normalizations, in order of appearance.
    pub norms: Vec<NormSpec>,
    /// Cumulative stride after the last trunk layer.
    pub stride: usize,
    /// Channels of the trunk output, the Grad-CAM feature map.
    pub feature_channels: usize,
    /// Head ops in order.
    pub head: Vec<HeadOp>,
    /// `fc6` shape.
    pub fc6: ConvSpec,
    /// `fc7` shape.
    pub fc7: ConvSpec,
}

impl LayerPlan {
    /// Parse and plan the trunk and head layer lists.
    ///
    /// Fails on the first unknown layer name or on widths that do not chain.
    pub fn new<S: AsRef<str>>(trunk: &[S], head: &[S], widths: ChannelWidths) -> Result<Self> {
        let mut ops = Vec::with_capacity(trunk.len());
        let mut convs = Vec::new();
        let mut pools = Vec::new();
        let mut norms = Vec::new();
        let mut stride = 1;
        let mut channels = widths.input;

        for name in trunk {
            let name = name.as_ref();
            let kind: LayerKind = name.parse()?;
            match kind {
                LayerKind::Conv { stage, index } => {
                    let out_channels = widths.at_stride(stride);
                    let in_channels = if stage == 1 && index == 1 {
                        widths.input
                    } else if (2..=4).contains(&stage) && index == 1 {
                        out_channels / 2
                    } else {
                        out_channels
                    };
                    if in_channels != channels {
                        return Err(ModelError::ChannelMismatch {
                            layer: name.to_string(),
                            expected: channels,
                            got: in_channels,
                        });
                    }
                    ops.push(TrunkOp::Conv(convs.len()));
                    convs.push(ConvSpec {
                        name: name.to_string(),
                        in_channels,
                        out_channels,
                        kernel: 3,
                        dilation: kind.dilation(),
                    });
                    channels = out_channels;
                }
                LayerKind::Relu => ops.push(TrunkOp::Relu),
                LayerKind::Pool { .. } => {
                    stride *= kind.stride();
                    ops.push(TrunkOp::Pool(pools.len()));
                    pools.push(PoolSpec {
                        name: name.to_string(),
                        stride: kind.stride(),
                    });
                }
                LayerKind::BatchNorm => {
                    ops.push(TrunkOp::BatchNorm(norms.len()));
                    norms.push(NormSpec {
                        name: name.to_string(),
                        channels,
                    });
                }
                LayerKind::Fc(_) | LayerKind::Dropout => {
                    return Err(ModelError::UnimplementedLayer(name.to_string()))
                }
            }
        }

        let fc6 = ConvSpec {
            name: "fc6".to_string(),
            in_channels: channels,
            out_channels: widths.fc,
            kernel: 3,
            dilation: FC6_DILATION,
        };
        let fc7 = ConvSpec {
            name: "fc7".to_string(),
            in_channels: widths.fc,
            out_channels: widths.fc,
            kernel: 1,
            dilation: 1,
        };

        let mut head_ops = Vec::with_capacity(head.len());
        for name in head {
            let name = name.as_ref();
            let op = match name.parse()? {
                LayerKind::Fc(6) => HeadOp::Conv(HeadConv::Fc6),
                LayerKind::Fc(7) => HeadOp::Conv(HeadConv::Fc7),
                LayerKind::Relu => HeadOp::Relu,
                LayerKind::Dropout => HeadOp::Dropout,
                LayerKind::BatchNorm => {
                    return Err(ModelError::UnsupportedHeadLayer(name.to_string()))
                }
                _ => return Err(ModelError::UnimplementedLayer(name.to_string())),
            };
            head_ops.push(op);
        }

        Ok(Self {
            trunk: ops,
            convs,
            pools,
            norms,
            stride,
            feature_channels: channels,
            head: head_ops,
            fc6,
            fc7,
        })
    }

    /// Channels flowing into `fc8`.
    pub fn head_channels(&self) -> usize {
        let mut channels = self.feature_channels;
        for op in &self.head {
            if let HeadOp::Conv(conv) = op {
                channels = self.head_conv(*conv).out_channels;
            }
        }
        channels
    }

    /// Shape of a head convolution.
    pub fn head_conv(&self, conv: HeadConv) -> &ConvSpec {
        match conv {
            HeadConv::Fc6 => &self.fc6,
            HeadConv::Fc7 => &self.fc7,
        }
    }
}

impl fmt::Display for LayerPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for conv in self.convs.iter().chain([&self.fc6, &self.fc7]) {
            writeln!(
                f,
                "{}: {} -> {} (k={}, d={})",
                conv.name, conv.in_channels, conv.out_channels, conv.kernel, conv.dilation
            )?;
        }
        write!(f, "stride {}", self.stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layer_names() {
        assert_eq!(
            "conv3_2".parse::<LayerKind>().unwrap(),
            LayerKind::Conv { stage: 3, index: 2 }
        );
        assert_eq!("pool4".parse::<LayerKind>().unwrap(), LayerKind::Pool { stage: 4 });
        assert_eq!("relu5_3".parse::<LayerKind>().unwrap(), LayerKind::Relu);
        assert_eq!("fc7".parse::<LayerKind>().unwrap(), LayerKind::Fc(7));
        assert_eq!("drop6".parse::<LayerKind>().unwrap(), LayerKind::Dropout);
        assert_eq!("batch_norm1".parse::<LayerKind>().unwrap(), LayerKind::BatchNorm);
    }

    #[test]
    fn test_unknown_layer_is_rejected() {
        for name in ["batchnorm1", "conv", "conv3", "convx_1", "poolx", "softmax"] {
            match name.parse::<LayerKind>() {
                Err(ModelError::UnimplementedLayer(n)) => assert_eq!(n, name),
                other => panic!("{} parsed as {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_unknown_layer_fails_planning() {
        let trunk = ["conv1_1", "relu1_1", "softmax"];
        let err = LayerPlan::new(&trunk, &VGG16_HEAD, ChannelWidths::default()).unwrap_err();
        assert!(matches!(err, ModelError::UnimplementedLayer(ref n) if n == "softmax"));
    }

    #[test]
    fn test_batch_norm_in_trunk() {
        let trunk = ["conv1_1", "batch_norm1_1", "relu1_1", "pool1", "conv2_1", "batch_norm2_1"];
        let plan = LayerPlan::new(&trunk, &VGG16_HEAD, ChannelWidths::default()).unwrap();

        assert_eq!(
            plan.trunk,
            vec![
                TrunkOp::Conv(0),
                TrunkOp::BatchNorm(0),
                TrunkOp::Relu,
                TrunkOp::Pool(0),
                TrunkOp::Conv(1),
                TrunkOp::BatchNorm(1),
            ]
        );
        assert_eq!(plan.norms[0].channels, 64);
        assert_eq!(plan.norms[1].channels, 128);
        assert_eq!(plan.norms[1].name, "batch_norm2_1");
    }

    #[test]
    fn test_batch_norm_in_head_is_rejected() {
        let head = ["fc6", "batch_norm6", "relu6"];
        let err = LayerPlan::new(&VGG16_TRUNK, &head, ChannelWidths::default()).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedHeadLayer(ref n) if n == "batch_norm6"));
    }

    #[test]
    fn test_pool_strides() {
        assert_eq!(LayerKind::Pool { stage: 1 }.stride(), 2);
        assert_eq!(LayerKind::Pool { stage: 3 }.stride(), 2);
        assert_eq!(LayerKind::Pool { stage: 4 }.stride(), 1);
        assert_eq!(LayerKind::Pool { stage: 5 }.stride(), 1);
        assert_eq!(LayerKind::Conv { stage: 5, index: 1 }.dilation(), 2);
        assert_eq!(LayerKind::Conv { stage: 4, index: 1 }.dilation(), 1);
    }

    #[test]
    fn test_vgg16_widths() {
        let plan = LayerPlan::new(&VGG16_TRUNK, &VGG16_HEAD, ChannelWidths::default()).unwrap();

        let widths: Vec<(usize, usize)> = plan
            .convs
            .iter()
            .map(|c| (c.in_channels, c.out_channels))
            .collect();
        assert_eq!(
            widths,
            vec![
                (3, 64),
                (64, 64),
                (64, 128),
                (128, 128),
                (128, 256),
                (256, 256),
                (256, 256),
                (256, 512),
                (512, 512),
                (512, 512),
                (512, 512),
                (512, 512),
                (512, 512),
            ]
        );
        assert_eq!(plan.stride, 8);
        assert_eq!(plan.feature_channels, 512);
        assert_eq!(plan.fc6.in_channels, 512);
        assert_eq!(plan.fc6.padding(), 12);
        assert_eq!(plan.fc7.padding(), 0);
        assert_eq!(plan.head_channels(), 1024);
        assert_eq!(plan.convs[12].dilation, 2);
        assert_eq!(plan.convs[12].padding(), 2);
    }

    #[test]
    fn test_head_ops() {
        let plan = LayerPlan::new(&VGG16_TRUNK, &VGG16_HEAD, ChannelWidths::default()).unwrap();
        assert_eq!(
            plan.head,
            vec![
                HeadOp::Conv(HeadConv::Fc6),
                HeadOp::Relu,
                HeadOp::Dropout,
                HeadOp::Conv(HeadConv::Fc7),
                HeadOp::Relu,
                HeadOp::Dropout,
            ]
        );
    }

    #[test]
    fn test_small_widths_chain() {
        let widths = ChannelWidths {
            input: 3,
            base: 2,
            max: 16,
            fc: 8,
        };
        let plan = LayerPlan::new(&VGG16_TRUNK, &VGG16_HEAD, widths).unwrap();
        assert_eq!(plan.feature_channels, 16);
        assert_eq!(plan.head_channels(), 8);
    }

    #[test]
    fn test_widths_that_do_not_chain() {
        let widths = ChannelWidths {
            input: 3,
            base: 4,
            max: 16,
            fc: 8,
        };
        let err = LayerPlan::new(&VGG16_TRUNK, &VGG16_HEAD, widths).unwrap_err();
        assert!(matches!(err, ModelError::ChannelMismatch { ref layer, .. } if layer == "conv4_1"));
    }
}
