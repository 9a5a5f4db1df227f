//! Run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use gain_core::{ImageSize, Seed};
use gain_data::VocConfig;
use gain_explain::ComplementConfig;
use gain_models::{ChannelWidths, GainNetConfig, Vgg16Config};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::scheduler::PiecewiseConstantLR;

/// Classes a `u8` mask can label.
const MAX_CATEGORIES: usize = u8::MAX as usize + 1;

/// Everything a training or inference run needs.
///
/// Missing fields in a JSON file take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    /// Network input resolution.
    pub input_size: ImageSize,
    /// Resolution of the complement images.
    pub complement_size: ImageSize,
    /// Number of classes, background included.
    pub category_num: usize,
    /// Channel widths of the backbone.
    pub widths: ChannelWidths,
    /// Mini-batches per optimizer step.
    pub accum_num: usize,
    /// Images per mini-batch.
    pub batch_size: usize,
    /// Training length in epochs.
    pub epochs: usize,
    /// Initial learning rate.
    pub base_lr: f64,
    /// Factor applied at each learning-rate boundary.
    pub lr_decay: f64,
    /// Epochs at which the learning rate drops.
    pub lr_boundaries_epochs: Vec<usize>,
    /// Scale of the L2 weight penalty.
    pub weight_decay: f64,
    /// Adam β₁.
    pub momentum: f64,
    /// Dropout probability in the head.
    pub dropout: f64,
    /// Steepness of the complement threshold.
    pub threshold_sigma: f32,
    /// Centre of the complement threshold.
    pub threshold: f32,
    /// Probability floor before the inference argmax.
    pub min_prob: f32,
    /// Iterations between logged summaries.
    pub summary_every: usize,
    /// Iterations between periodic checkpoints.
    pub checkpoint_every: usize,
    /// Periodic checkpoints kept on disk.
    pub max_to_keep: usize,
    /// Shuffle the training set every epoch.
    pub shuffle: bool,
    /// Random seed.
    pub seed: u64,
    /// Checkpoint and summary directory.
    pub saver_path: PathBuf,
    /// Directory for predicted masks.
    pub pred_path: PathBuf,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            input_size: ImageSize::new(321, 321),
            complement_size: ImageSize::new(321, 321),
            category_num: 21,
            widths: ChannelWidths::default(),
            accum_num: 16,
            batch_size: 1,
            epochs: 10,
            base_lr: 1e-4,
            lr_decay: 0.1,
            lr_boundaries_epochs: vec![10, 20],
            weight_decay: 5e-5,
            momentum: 0.9,
            dropout: 0.5,
            threshold_sigma: 10.0,
            threshold: 0.5,
            min_prob: 1e-5,
            summary_every: 500,
            checkpoint_every: 3000,
            max_to_keep: 2,
            shuffle: true,
            seed: 42,
            saver_path: PathBuf::from("gain_gcam-saver"),
            pred_path: PathBuf::from("gain_gcam-preds"),
        }
    }
}

impl GainConfig {
    /// Read a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("category_num", self.category_num),
            ("accum_num", self.accum_num),
            ("batch_size", self.batch_size),
            ("summary_every", self.summary_every),
            ("checkpoint_every", self.checkpoint_every),
            ("max_to_keep", self.max_to_keep),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TrainError::InvalidConfig(format!("{} must be positive", name)));
        }
        if self.category_num > MAX_CATEGORIES {
            return Err(TrainError::InvalidConfig(format!(
                "category_num {} exceeds {}",
                self.category_num, MAX_CATEGORIES
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainError::InvalidConfig(format!(
                "dropout {} outside [0, 1)",
                self.dropout
            )));
        }
        if !(self.base_lr.is_finite() && self.base_lr > 0.0) {
            return Err(TrainError::InvalidLearningRate(self.base_lr.to_string()));
        }
        Ok(())
    }

    /// Network configuration.
    pub fn model_config(&self) -> GainNetConfig {
        GainNetConfig::new(
            Vgg16Config::new(self.category_num)
                .with_widths(self.widths)
                .with_dropout(self.dropout),
            ComplementConfig {
                size: self.complement_size,
                sigma: self.threshold_sigma,
                threshold: self.threshold,
            },
        )
    }

    /// Dataset configuration.
    pub fn voc_config(&self) -> VocConfig {
        VocConfig {
            input_size: self.input_size,
            n_classes: self.category_num,
            ..Default::default()
        }
    }

    /// Learning-rate schedule for a dataset of the given length.
    pub fn schedule(&self, iterations_per_epoch: usize) -> Result<PiecewiseConstantLR> {
        PiecewiseConstantLR::from_epochs(
            self.base_lr,
            self.lr_decay,
            &self.lr_boundaries_epochs,
            iterations_per_epoch,
        )
    }

    /// Run seed.
    pub fn seed(&self) -> Seed {
        Seed::new(self.seed)
    }
}
