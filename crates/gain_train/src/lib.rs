//! # gain_train
//!
//! Training and inference drivers for GAIN.
//!
//! This crate provides:
//! - [`GainTrainer`], the gradient-accumulating training loop
//! - Classification and attention-mining losses
//! - Piecewise-constant learning-rate schedules
//! - [`Predictor`] for writing per-pixel class masks
//! - [`GainConfig`], the JSON run configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use gain_train::{GainConfig, GainTrainer, ModelSource};
//!
//! let config = GainConfig::default();
//! let (model, start) = ModelSource::Random.load::<MyAutodiffBackend>(&config, &device)?;
//! let output = GainTrainer::new(config, device).fit(model, dataset, start)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulate;
pub mod config;
pub mod error;
pub mod inference;
pub mod losses;
pub mod scheduler;
pub mod summary;
pub mod trainer;

pub use accumulate::GradientAccumulator;
pub use config::GainConfig;
pub use error::{Result, TrainError};
pub use inference::{InferenceSummary, Predictor};
pub use losses::{AttentionMiningLoss, BceWithLogitsLoss, GainLoss, LossValues};
pub use scheduler::{PiecewiseConstantLR, Scheduler};
pub use summary::{read_summary, SummaryRecord, SummaryWriter};
pub use trainer::{GainTrainer, ModelSource, TrainerState, TrainingOutput};
