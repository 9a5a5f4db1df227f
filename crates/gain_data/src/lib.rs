//! # gain_data
//!
//! Datasets and batch loading for GAIN.
//!
//! This crate provides:
//! - [`SegmentationDataset`], the random-access source of [`ImageSample`]s
//! - [`InMemoryDataset`] and the PASCAL VOC reader [`VocDataset`]
//! - [`DatasetCursor`] and [`BatchLoader`] for endless cyclic iteration with
//!   an explicit epoch counter
//! - [`write_mask`] for storing predicted masks as `.npy`
//!
//! ## Example
//!
//! ```rust,ignore
//! use gain_data::{BatchLoader, VocConfig, VocDataset};
//! use gain_core::Seed;
//!
//! let voc = VocDataset::open("data/VOC2012", "train", VocConfig::default())?;
//! let mut loader = BatchLoader::new(voc, 1, true, Seed::new(42))?;
//! let batch = loader.next_batch::<NdArray>(&device)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod dataset;
mod error;
mod io;
mod loader;
pub mod voc;

pub use dataset::{multi_hot, ImageSample, InMemoryDataset, SegmentationDataset};
pub use error::{DataError, Result};
pub use io::{read_mask, write_mask};
pub use loader::{Batch, BatchLoader, DatasetCursor};
pub use voc::{VocConfig, VocDataset, VGG_MEAN_BGR, VOC_CLASSES};
