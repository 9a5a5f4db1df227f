//! Writing predicted segmentation masks.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::prelude::*;
use gain_core::ImageSize;
use gain_data::{write_mask, BatchLoader, SegmentationDataset};
use gain_explain::segmentation_masks;
use gain_models::GainNet;
use ndarray::Array2;

use crate::config::GainConfig;
use crate::error::{Result, TrainError};

const PROGRESS_EVERY: usize = 100;

/// Outcome of an inference pass.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceSummary {
    /// Images processed.
    pub images: usize,
    /// Directory the masks were written to.
    pub output_dir: PathBuf,
    /// Wall time in seconds.
    pub duration_secs: f64,
}

/// Turns attention maps into per-pixel class masks.
///
/// Meant for a non-autodiff backend, where dropout is inactive.
pub struct Predictor<B: Backend> {
    model: GainNet<B>,
    label_size: ImageSize,
    min_prob: f32,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Predict at the configured input resolution.
    pub fn new(model: GainNet<B>, config: &GainConfig, device: B::Device) -> Self {
        Self {
            model,
            label_size: config.input_size,
            min_prob: config.min_prob,
            device,
        }
    }

    /// Class masks of a batch, (batch, height, width).
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 3, Int> {
        let attention = self.model.attention(images);
        segmentation_masks(attention.into_inner(), self.label_size, self.min_prob)
    }

    /// Predict every image of `dataset` once and write `<out_dir>/<id>.npy`.
    pub fn run<D: SegmentationDataset>(
        &self,
        dataset: &D,
        out_dir: impl AsRef<Path>,
    ) -> Result<InferenceSummary> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir)?;

        let start = Instant::now();
        let total = dataset.len();
        let mut images = 0;
        tracing::info!("Predicting {} images into {}", total, out_dir.display());

        for batch in BatchLoader::single_pass::<B>(dataset, 1, &self.device) {
            let batch = batch?;
            let masks = to_masks(self.predict(batch.images))?;
            for (id, mask) in batch.ids.iter().zip(masks) {
                write_mask(out_dir.join(format!("{}.npy", id)), &mask)?;
                images += 1;
                if images % PROGRESS_EVERY == 0 {
                    tracing::info!("{}/{} images", images, total);
                }
            }
        }

        let duration_secs = start.elapsed().as_secs_f64();
        tracing::info!("Wrote {} masks in {:.1}s", images, duration_secs);
        Ok(InferenceSummary {
            images,
            output_dir: out_dir.to_path_buf(),
            duration_secs,
        })
    }
}

/// Split a (batch, height, width) class tensor into `u8` masks.
fn to_masks<B: Backend>(masks: Tensor<B, 3, Int>) -> Result<Vec<Array2<u8>>> {
    let [batch, height, width] = masks.dims();
    let values: Vec<i64> = masks
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| TrainError::TensorError(format!("{:?}", e)))?;

    values
        .chunks(height * width)
        .take(batch)
        .map(|chunk| {
            let classes = chunk
                .iter()
                .map(|&c| {
                    u8::try_from(c).map_err(|_| {
                        TrainError::TensorError(format!("class index {} does not fit a u8 mask", c))
                    })
                })
                .collect::<Result<Vec<u8>>>()?;
            Array2::from_shape_vec((height, width), classes)
                .map_err(|e| TrainError::TensorError(e.to_string()))
        })
        .collect()
}
