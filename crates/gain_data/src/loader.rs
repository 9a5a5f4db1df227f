//! Cyclic batch loading.
//!
//! Training never runs out of data: the [`DatasetCursor`] wraps around at the
//! end of the dataset, bumps its epoch counter and reshuffles. Inference walks
//! the dataset once with [`BatchLoader::single_pass`].

use burn::prelude::*;
use rand::seq::SliceRandom;

use crate::dataset::SegmentationDataset;
use crate::error::{DataError, Result};
use gain_core::{ImageShape, ImageSize, Seed};

const SHUFFLE_STREAM: &str = "shuffle";

/// A batch of images ready for the network.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    /// Images, (batch, channels, height, width).
    pub images: Tensor<B, 4>,
    /// Multi-hot labels, (batch, classes).
    pub labels: Tensor<B, 2>,
    /// Image identifiers, in batch order.
    pub ids: Vec<String>,
    /// Dataset indices of the samples.
    pub indices: Vec<usize>,
    /// Cursor epoch after the batch was drawn.
    pub epoch: usize,
}

impl<B: Backend> Batch<B> {
    /// Number of images.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the batch holds no images.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Position in an endlessly repeated dataset.
#[derive(Debug, Clone)]
pub struct DatasetCursor {
    order: Vec<usize>,
    position: usize,
    epoch: usize,
    shuffle: bool,
    seed: Seed,
}

impl DatasetCursor {
    /// Start at epoch 0 over `len` samples.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty dataset.
    pub fn new(len: usize, shuffle: bool, seed: Seed) -> Result<Self> {
        if len == 0 {
            return Err(DataError::EmptyDataset);
        }
        let mut cursor = Self {
            order: (0..len).collect(),
            position: 0,
            epoch: 0,
            shuffle,
            seed,
        };
        cursor.reorder();
        Ok(cursor)
    }

    fn reorder(&mut self) {
        self.order.sort_unstable();
        if self.shuffle {
            let mut rng = self.seed.epoch_rng(SHUFFLE_STREAM, self.epoch);
            self.order.shuffle(&mut rng);
        }
    }

    /// Current epoch, starting at 0.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Samples already consumed in the current epoch.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Dataset length.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false; an empty cursor cannot be built.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Next dataset index, wrapping to a new epoch after the last one.
    pub fn advance(&mut self) -> usize {
        if self.position == self.order.len() {
            self.position = 0;
            self.epoch += 1;
            self.reorder();
        }
        let index = self.order[self.position];
        self.position += 1;
        index
    }

    /// Next `n` indices.
    pub fn take(&mut self, n: usize) -> Vec<usize> {
        (0..n).map(|_| self.advance()).collect()
    }
}

/// Builds batches from a dataset.
pub struct BatchLoader<D: SegmentationDataset> {
    dataset: D,
    batch_size: usize,
    cursor: DatasetCursor,
}

impl<D: SegmentationDataset> BatchLoader<D> {
    /// Create an endless loader.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero batch size or an empty dataset.
    pub fn new(dataset: D, batch_size: usize, shuffle: bool, seed: Seed) -> Result<Self> {
        if batch_size == 0 {
            return Err(DataError::InvalidBatchSize(
                "batch size must be positive".to_string(),
            ));
        }
        let cursor = DatasetCursor::new(dataset.len(), shuffle, seed)?;
        Ok(Self {
            dataset,
            batch_size,
            cursor,
        })
    }

    /// The wrapped dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whole batches per epoch, `dataset_len / batch_size`.
    pub fn iterations_per_epoch(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    /// Current cursor epoch.
    pub fn epoch(&self) -> usize {
        self.cursor.epoch()
    }

    /// Skip `n` batches without loading them.
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.cursor.take(self.batch_size);
        }
    }

    /// Load the next batch, wrapping around as needed.
    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> Result<Batch<B>> {
        let indices = self.cursor.take(self.batch_size);
        let epoch = self.cursor.epoch();
        collate(&self.dataset, indices, epoch, device)
    }

    /// Visit every sample once, in order, one batch at a time.
    pub fn single_pass<'a, B: Backend>(
        dataset: &'a D,
        batch_size: usize,
        device: &'a B::Device,
    ) -> impl Iterator<Item = Result<Batch<B>>> + 'a {
        let len = dataset.len();
        let step = batch_size.max(1);
        (0..len).step_by(step).map(move |start| {
            let indices: Vec<usize> = (start..(start + step).min(len)).collect();
            collate(dataset, indices, 0, device)
        })
    }
}

fn collate<B: Backend, D: SegmentationDataset + ?Sized>(
    dataset: &D,
    indices: Vec<usize>,
    epoch: usize,
    device: &B::Device,
) -> Result<Batch<B>> {
    let n_classes = dataset.n_classes();
    let mut shape: Option<ImageShape> = None;
    let mut pixels = Vec::new();
    let mut labels = Vec::with_capacity(indices.len() * n_classes);
    let mut ids = Vec::with_capacity(indices.len());

    for &index in &indices {
        let sample = dataset.get(index)?;
        let (channels, height, width) = sample.dims();
        let sample_shape = ImageShape::new(1, channels, ImageSize::new(height, width));
        match shape {
            None => shape = Some(sample_shape),
            Some(first) => first.ensure_compatible(&sample_shape)?,
        }
        if sample.labels.len() != n_classes {
            return Err(DataError::InvalidShape(format!(
                "{} has {} labels, expected {}",
                sample.id,
                sample.labels.len(),
                n_classes
            )));
        }

        pixels.extend(sample.image.iter().copied());
        labels.extend_from_slice(&sample.labels);
        ids.push(sample.id);
    }

    let first = shape.ok_or(DataError::EmptyDataset)?;
    let batch_shape = ImageShape::new(indices.len(), first.channels(), first.size());
    let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape(batch_shape.as_array());
    let labels = Tensor::<B, 1>::from_floats(labels.as_slice(), device)
        .reshape([batch_shape.batch(), n_classes]);

    Ok(Batch {
        images,
        labels,
        ids,
        indices,
        epoch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{multi_hot, ImageSample, InMemoryDataset};
    use gain_core::backend::NdArray;
    use ndarray::Array3;

    type TestBackend = NdArray;

    fn dataset(n: usize) -> InMemoryDataset {
        let samples = (0..n)
            .map(|i| {
                ImageSample::new(
                    format!("img{}", i),
                    Array3::from_elem((3, 2, 2), i as f32),
                    multi_hot(&[i % 4], 4).unwrap(),
                )
            })
            .collect();
        InMemoryDataset::from_samples(samples, 4).unwrap()
    }

    #[test]
    fn test_cursor_wraps_and_counts_epochs() {
        let mut cursor = DatasetCursor::new(3, false, Seed::new(1)).unwrap();
        assert_eq!(cursor.take(3), vec![0, 1, 2]);
        assert_eq!(cursor.epoch(), 0);
        assert_eq!(cursor.position(), 3);

        assert_eq!(cursor.advance(), 0);
        assert_eq!(cursor.epoch(), 1);
        assert_eq!(cursor.take(4), vec![1, 2, 0, 1]);
        assert_eq!(cursor.epoch(), 2);
    }

    #[test]
    fn test_shuffled_epochs_are_permutations() {
        let mut cursor = DatasetCursor::new(10, true, Seed::new(7)).unwrap();
        let first = cursor.take(10);
        let second = cursor.take(10);

        for epoch in [&first, &second] {
            let mut sorted = epoch.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        }
        assert_ne!(first, second);

        let mut again = DatasetCursor::new(10, true, Seed::new(7)).unwrap();
        assert_eq!(again.take(10), first);
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        assert!(matches!(
            DatasetCursor::new(0, false, Seed::default()),
            Err(DataError::EmptyDataset)
        ));
    }

    #[test]
    fn test_next_batch() {
        let device = Default::default();
        let mut loader = BatchLoader::new(dataset(5), 2, false, Seed::default()).unwrap();
        assert_eq!(loader.iterations_per_epoch(), 2);

        let batch = loader.next_batch::<TestBackend>(&device).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.labels.dims(), [2, 4]);
        assert_eq!(batch.ids, vec!["img0", "img1"]);

        let labels: Vec<f32> = batch.labels.into_data().to_vec().unwrap();
        assert_eq!(labels, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

        loader.next_batch::<TestBackend>(&device).unwrap();
        // third batch straddles the end of the dataset
        let batch = loader.next_batch::<TestBackend>(&device).unwrap();
        assert_eq!(batch.indices, vec![4, 0]);
        assert_eq!(batch.epoch, 1);
        assert_eq!(loader.epoch(), 1);
    }

    #[test]
    fn test_skip() {
        let device = Default::default();
        let mut loader = BatchLoader::new(dataset(5), 2, false, Seed::default()).unwrap();
        loader.skip(2);
        let batch = loader.next_batch::<TestBackend>(&device).unwrap();
        assert_eq!(batch.indices, vec![4, 0]);
    }

    #[test]
    fn test_zero_batch_size() {
        let result = BatchLoader::new(dataset(2), 0, false, Seed::default());
        assert!(matches!(result, Err(DataError::InvalidBatchSize(_))));
    }

    #[test]
    fn test_single_pass_visits_every_sample_once() {
        let device = Default::default();
        let ds = dataset(3);
        let batches: Vec<Batch<TestBackend>> =
            BatchLoader::single_pass(&ds, 1, &device).collect::<Result<_>>().unwrap();

        assert_eq!(batches.len(), 3);
        let ids: Vec<&str> = batches.iter().map(|b| b.ids[0].as_str()).collect();
        assert_eq!(ids, vec!["img0", "img1", "img2"]);

        let pixel: f32 = batches[2].images.clone().mean().into_scalar();
        assert_eq!(pixel, 2.0);
    }
}
