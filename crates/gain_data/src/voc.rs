//! PASCAL VOC style dataset with image-level labels.
//!
//! Layout under the dataset root:
//!
//! ```text
//! <root>/<split>.txt                      one line per image: "<id> <class> <class> ..."
//! <root>/JPEGImages/<id>.jpg
//! <root>/SegmentationClassAug/<id>.png    optional ground truth
//! ```
//!
//! Images are resized to the input size, reordered to BGR and have the VGG
//! channel mean subtracted.

use std::fs;
use std::path::{Path, PathBuf};

use gain_core::ImageSize;
use image::imageops::FilterType;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::dataset::{multi_hot, ImageSample, SegmentationDataset};
use crate::error::{DataError, Result};

/// PASCAL VOC class names; index 0 is the background.
pub const VOC_CLASSES: [&str; 21] = [
    "background", "aeroplane", "bicycle", "bird", "boat", "bottle", "bus", "car", "cat", "chair",
    "cow", "diningtable", "dog", "horse", "motorbike", "person", "pottedplant", "sheep", "sofa",
    "train", "tvmonitor",
];

/// Per-channel mean of the VGG training set, BGR order.
pub const VGG_MEAN_BGR: [f32; 3] = [104.008, 116.669, 122.675];

const IMAGE_DIR: &str = "JPEGImages";
const MASK_DIR: &str = "SegmentationClassAug";

/// Settings of [`VocDataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocConfig {
    /// Size images and masks are resized to.
    pub input_size: ImageSize,
    /// Length of the label vectors.
    pub n_classes: usize,
    /// Mean subtracted from each BGR channel.
    pub mean_bgr: [f32; 3],
    /// Whether to read ground-truth masks when present.
    pub load_masks: bool,
}

impl Default for VocConfig {
    fn default() -> Self {
        Self {
            input_size: ImageSize::new(321, 321),
            n_classes: VOC_CLASSES.len(),
            mean_bgr: VGG_MEAN_BGR,
            load_masks: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    classes: Vec<usize>,
}

/// Images listed in `<root>/<split>.txt`, decoded lazily.
#[derive(Debug, Clone)]
pub struct VocDataset {
    root: PathBuf,
    entries: Vec<Entry>,
    config: VocConfig,
}

impl VocDataset {
    /// Read the image list of `split`.
    pub fn open(root: impl AsRef<Path>, split: &str, config: VocConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let list = root.join(format!("{}.txt", split));
        let content = fs::read_to_string(&list)?;
        let entries = parse_image_list(&content, &list.display().to_string(), config.n_classes)?;
        if entries.is_empty() {
            return Err(DataError::EmptyDataset);
        }

        tracing::info!("Loaded {} images from {}", entries.len(), list.display());
        Ok(Self {
            root,
            entries,
            config,
        })
    }

    /// Identifier of sample `index`.
    pub fn id(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.id.as_str())
    }

    /// Dataset settings.
    pub fn config(&self) -> &VocConfig {
        &self.config
    }

    fn image_path(&self, id: &str) -> PathBuf {
        self.root.join(IMAGE_DIR).join(format!("{}.jpg", id))
    }

    fn mask_path(&self, id: &str) -> PathBuf {
        self.root.join(MASK_DIR).join(format!("{}.png", id))
    }
}

impl SegmentationDataset for VocDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, index: usize) -> Result<ImageSample> {
        let entry = self.entries.get(index).ok_or(DataError::IndexOutOfBounds {
            index,
            length: self.entries.len(),
        })?;

        let image = load_image(&self.image_path(&entry.id), self.config.input_size, &self.config.mean_bgr)?;
        let labels = multi_hot(&entry.classes, self.config.n_classes)?;
        let mut sample = ImageSample::new(entry.id.clone(), image, labels);

        let mask_path = self.mask_path(&entry.id);
        if self.config.load_masks && mask_path.exists() {
            sample = sample.with_mask(load_mask(&mask_path, self.config.input_size)?);
        }
        Ok(sample)
    }

    fn n_classes(&self) -> usize {
        self.config.n_classes
    }
}

fn parse_image_list(content: &str, file: &str, n_classes: usize) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(id) = fields.next() else {
            continue;
        };

        let mut classes = Vec::new();
        for field in fields {
            let class: usize = field.parse().map_err(|_| DataError::Parse {
                file: file.to_string(),
                line: i + 1,
                message: format!("'{}' is not a class index", field),
            })?;
            if class >= n_classes {
                return Err(DataError::Parse {
                    file: file.to_string(),
                    line: i + 1,
                    message: format!("class {} out of range for {} classes", class, n_classes),
                });
            }
            classes.push(class);
        }

        entries.push(Entry {
            id: id.to_string(),
            classes,
        });
    }
    Ok(entries)
}

/// Decode an image, resize it and convert it to mean-subtracted BGR (3, h, w).
pub fn load_image(path: &Path, size: ImageSize, mean_bgr: &[f32; 3]) -> Result<Array3<f32>> {
    let rgb = image::open(path)?.to_rgb8();
    let resized = image::imageops::resize(
        &rgb,
        size.width as u32,
        size.height as u32,
        FilterType::Triangle,
    );

    let mut out = Array3::<f32>::zeros((3, size.height, size.width));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        out[[0, y, x]] = b as f32 - mean_bgr[0];
        out[[1, y, x]] = g as f32 - mean_bgr[1];
        out[[2, y, x]] = r as f32 - mean_bgr[2];
    }
    Ok(out)
}

/// Decode a class-index mask and resize it with nearest-neighbour sampling.
pub fn load_mask(path: &Path, size: ImageSize) -> Result<Array2<u8>> {
    let gray = image::open(path)?.to_luma8();
    let resized = image::imageops::resize(
        &gray,
        size.width as u32,
        size.height as u32,
        FilterType::Nearest,
    );

    let mut out = Array2::<u8>::zeros((size.height, size.width));
    for (x, y, pixel) in resized.enumerate_pixels() {
        out[[y as usize, x as usize]] = pixel.0[0];
    }
    Ok(out)
}
