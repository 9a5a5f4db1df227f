//! # gain
//!
//! Guided attention inference networks (GAIN) in Rust: weakly-supervised
//! semantic segmentation learned from image-level labels.
//!
//! - **Data**: VOC-style datasets, cyclic batch loading, mask files
//! - **Models**: dilated VGG16 backbone, the two-pass GAIN network,
//!   pretrained archives and checkpoints
//! - **Explainability**: Grad-CAM, complement images, segmentation masks
//! - **Training**: losses, gradient accumulation, schedules, inference
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gain::prelude::*;
//!
//! let config = GainConfig::default();
//! let dataset = VocDataset::open("data/VOC2012", "train", config.voc_config())?;
//! let (model, start) = ModelSource::Random.load::<Autodiff<NdArray>>(&config, &device)?;
//! let output = GainTrainer::new(config, device).fit(model, dataset, start)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray
//! - `backend-wgpu`: GPU backend using WGPU
//! - `backend-tch`: PyTorch backend via tch-rs

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use gain_core as core;
pub use gain_data as data;
pub use gain_explain as explain;
pub use gain_models as models;
pub use gain_train as train;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use gain::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use gain_core::backend::*;
    pub use gain_core::{ImageShape, ImageSize, Seed};

    // Data
    pub use gain_data::{
        multi_hot, read_mask, write_mask, Batch, BatchLoader, ImageSample, InMemoryDataset,
        SegmentationDataset, VocConfig, VocDataset,
    };

    // Models
    pub use gain_models::{
        ChannelWidths, GainNet, GainNetConfig, GainOutput, PretrainedArchive, Vgg16, Vgg16Config,
    };

    // Explain
    pub use gain_explain::{
        complement_images, grad_cam, segmentation_masks, AttentionMap, ComplementConfig,
    };

    // Training
    pub use gain_train::{
        GainConfig, GainLoss, GainTrainer, ModelSource, PiecewiseConstantLR, Predictor, Scheduler,
    };
}
