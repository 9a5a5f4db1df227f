//! Image-level segmentation datasets.

use ndarray::{Array2, Array3};

use crate::error::{DataError, Result};

/// One image with its image-level labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    /// Identifier, used to name prediction files.
    pub id: String,
    /// Pixel data, (channels, height, width).
    pub image: Array3<f32>,
    /// Ground-truth class per pixel, (height, width), when available.
    pub mask: Option<Array2<u8>>,
    /// Multi-hot class vector.
    pub labels: Vec<f32>,
}

impl ImageSample {
    /// Create a sample without a ground-truth mask.
    pub fn new(id: impl Into<String>, image: Array3<f32>, labels: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            image,
            mask: None,
            labels,
        }
    }

    /// Attach a ground-truth mask.
    #[must_use]
    pub fn with_mask(mut self, mask: Array2<u8>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Image dimensions as (channels, height, width).
    pub fn dims(&self) -> (usize, usize, usize) {
        self.image.dim()
    }

    /// Indices of the classes present in the image.
    pub fn classes(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .map(|(c, _)| c)
            .collect()
    }
}

/// Multi-hot vector of length `n_classes` with the given classes set.
pub fn multi_hot(classes: &[usize], n_classes: usize) -> Result<Vec<f32>> {
    let mut labels = vec![0.0; n_classes];
    for &class in classes {
        let slot = labels.get_mut(class).ok_or(DataError::IndexOutOfBounds {
            index: class,
            length: n_classes,
        })?;
        *slot = 1.0;
    }
    Ok(labels)
}

/// Random-access source of image samples.
///
/// Every sample of a dataset has the same image dimensions and label length.
pub trait SegmentationDataset: Send + Sync {
    /// Number of samples.
    fn len(&self) -> usize;

    /// Load sample `index`.
    fn get(&self, index: usize) -> Result<ImageSample>;

    /// Length of the label vectors.
    fn n_classes(&self) -> usize;

    /// Whether the dataset holds no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dataset held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Vec<ImageSample>,
    n_classes: usize,
}

impl InMemoryDataset {
    /// Build from samples, checking that they agree in shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the samples differ in image dimensions or label length.
    pub fn from_samples(samples: Vec<ImageSample>, n_classes: usize) -> Result<Self> {
        if let Some(first) = samples.first() {
            let dims = first.dims();
            for sample in &samples {
                if sample.dims() != dims {
                    return Err(DataError::InvalidShape(format!(
                        "{} has dims {:?}, expected {:?}",
                        sample.id,
                        sample.dims(),
                        dims
                    )));
                }
                if sample.labels.len() != n_classes {
                    return Err(DataError::InvalidShape(format!(
                        "{} has {} labels, expected {}",
                        sample.id,
                        sample.labels.len(),
                        n_classes
                    )));
                }
            }
        }
        Ok(Self { samples, n_classes })
    }

    /// All samples.
    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }
}

impl SegmentationDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<ImageSample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or(DataError::IndexOutOfBounds {
                index,
                length: self.samples.len(),
            })
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}
