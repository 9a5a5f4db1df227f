//! # gain_models
//!
//! Networks for GAIN:
//!
//! - [`Vgg16`] - VGG16 with stride-1 late pooling and dilated stage 5, built
//!   from a typed [`LayerPlan`]
//! - [`GainNet`] - one shared backbone run on the image and on its
//!   per-class complement images
//!
//! Plus learning-rate group tags for every parameter, a `.npz` loader for
//! pretrained weights, and checkpoint save/restore/pruning.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
mod error;
pub mod gain;
pub mod layers;
mod params;
pub mod pretrained;
pub mod vgg;

pub use checkpoint::{
    list_norm_checkpoints, load_checkpoint, prune_checkpoints, save_checkpoint, CheckpointMetadata,
    CheckpointName,
};
pub use error::{ModelError, Result};
pub use gain::{GainNet, GainNetConfig, GainOutput};
pub use layers::{ChannelWidths, LayerKind, LayerPlan, NormSpec, VGG16_HEAD, VGG16_TRUNK};
pub use params::{LrGroup, ParamTag};
pub use pretrained::PretrainedArchive;
pub use vgg::{BackboneOutput, HeadTrace, Vgg16, Vgg16Config};
