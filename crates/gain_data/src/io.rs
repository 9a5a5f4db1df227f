//! Reading and writing class-index masks as NumPy `.npy` files.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};

use crate::error::{DataError, Result};

/// Write a (height, width) mask of class indices as a `u8` `.npy` array.
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Array2<u8>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    mask.write_npy(writer)
        .map_err(|e| DataError::FormatError(format!("Failed to write {}: {}", path.display(), e)))
}

/// Read a mask written by [`write_mask`].
pub fn read_mask<P: AsRef<Path>>(path: P) -> Result<Array2<u8>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    Array2::<u8>::read_npy(reader)
        .map_err(|e| DataError::FormatError(format!("Failed to read {}: {}", path.display(), e)))
}
