//! Pretrained VGG16 weights stored as a NumPy `.npz` archive.
//!
//! Every layer contributes two arrays, `<layer>_w` and `<layer>_b`. Convolution
//! weights use the (kh, kw, in, out) layout of Caffe/TensorFlow exports and are
//! permuted to burn's (out, in, kh, kw) when read.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use ndarray::{ArrayD, Ix1, Ix4, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};

use crate::error::{ModelError, Result};

/// In-memory pretrained archive.
#[derive(Debug, Clone, Default)]
pub struct PretrainedArchive {
    arrays: HashMap<String, ArrayD<f32>>,
}

impl PretrainedArchive {
    /// Read every array of an `.npz` file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut npz = NpzReader::new(file).map_err(|e| ModelError::Archive(e.to_string()))?;
        let names = npz.names().map_err(|e| ModelError::Archive(e.to_string()))?;

        let mut arrays = HashMap::with_capacity(names.len());
        for name in names {
            let array: ArrayD<f32> = npz
                .by_name::<OwnedRepr<f32>, IxDyn>(&name)
                .map_err(|e| ModelError::Archive(format!("{}: {}", name, e)))?;
            let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
            arrays.insert(key, array);
        }

        tracing::info!("Loaded {} pretrained arrays from {}", arrays.len(), path.display());
        Ok(Self { arrays })
    }

    /// Build an archive from arrays already in memory.
    pub fn from_arrays(arrays: HashMap<String, ArrayD<f32>>) -> Self {
        Self { arrays }
    }

    /// Write the archive as `.npz`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut npz = NpzWriter::new(file);
        let mut names: Vec<&String> = self.arrays.keys().collect();
        names.sort();
        for name in names {
            npz.add_array(name.as_str(), &self.arrays[name])
                .map_err(|e| ModelError::Archive(e.to_string()))?;
        }
        npz.finish().map_err(|e| ModelError::Archive(e.to_string()))?;
        Ok(())
    }

    /// Number of arrays.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Whether the archive holds no arrays.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    fn array(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.arrays
            .get(name)
            .ok_or_else(|| ModelError::MissingWeights(name.to_string()))
    }

    /// Convolution weight of `layer` in (out, in, kh, kw) order, flattened.
    ///
    /// `shape` is the burn shape the layer expects.
    pub fn conv_weight(&self, layer: &str, shape: [usize; 4]) -> Result<Vec<f32>> {
        let name = format!("{}_w", layer);
        let array = self.array(&name)?;
        let [out_ch, in_ch, kh, kw] = shape;
        let expected = vec![kh, kw, in_ch, out_ch];
        if array.shape() != expected.as_slice() {
            return Err(ModelError::PretrainedShape {
                name,
                expected,
                got: array.shape().to_vec(),
            });
        }

        let array = array
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|e| ModelError::Archive(e.to_string()))?;
        Ok(array.permuted_axes([3, 2, 0, 1]).iter().copied().collect())
    }

    /// Bias of `layer`.
    pub fn bias(&self, layer: &str, len: usize) -> Result<Vec<f32>> {
        let name = format!("{}_b", layer);
        let array = self.array(&name)?;
        if array.shape() != [len].as_slice() {
            return Err(ModelError::PretrainedShape {
                name,
                expected: vec![len],
                got: array.shape().to_vec(),
            });
        }

        let array = array
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|e| ModelError::Archive(e.to_string()))?;
        Ok(array.to_vec())
    }
}
