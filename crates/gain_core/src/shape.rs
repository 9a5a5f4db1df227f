//! Image shape metadata.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Spatial size of an image or feature map.
///
/// Serialized as a `[height, width]` pair so configs read like the
/// `input_size: [321, 321]` entries they replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct ImageSize {
    /// Height in pixels.
    pub height: usize,
    /// Width in pixels.
    pub width: usize,
}

impl ImageSize {
    /// Create a new size.
    #[must_use]
    pub const fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of pixels.
    #[must_use]
    pub const fn area(&self) -> usize {
        self.height * self.width
    }

    /// As a `[height, width]` array, the form burn ops take.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 2] {
        [self.height, self.width]
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from([height, width]: [usize; 2]) -> Self {
        Self::new(height, width)
    }
}

impl From<ImageSize> for [usize; 2] {
    fn from(size: ImageSize) -> Self {
        size.as_array()
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Shape metadata for a channels-first image batch `(B, C, H, W)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    batch: usize,
    channels: usize,
    size: ImageSize,
}

impl ImageShape {
    /// Create a new shape.
    #[must_use]
    pub const fn new(batch: usize, channels: usize, size: ImageSize) -> Self {
        Self {
            batch,
            channels,
            size,
        }
    }

    /// Build from a `[B, C, H, W]` dims slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice does not have exactly four entries.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            &[batch, channels, height, width] => {
                Ok(Self::new(batch, channels, ImageSize::new(height, width)))
            }
            _ => Err(CoreError::DimensionError {
                expected: 4,
                got: dims.len(),
            }),
        }
    }

    /// Batch size.
    #[must_use]
    pub const fn batch(&self) -> usize {
        self.batch
    }

    /// Channel count.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Spatial size.
    #[must_use]
    pub const fn size(&self) -> ImageSize {
        self.size
    }

    /// Elements per batch entry.
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.channels * self.size.area()
    }

    /// As burn dims.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 4] {
        [self.batch, self.channels, self.size.height, self.size.width]
    }

    /// Check that `other` has the same channel count and spatial size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidShape`] when they differ; batch may differ.
    pub fn ensure_compatible(&self, other: &Self) -> Result<()> {
        if self.channels == other.channels && self.size == other.size {
            Ok(())
        } else {
            Err(CoreError::InvalidShape {
                expected: self.to_string(),
                got: other.to_string(),
            })
        }
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(B={}, C={}, H={}, W={})",
            self.batch, self.channels, self.size.height, self.size.width
        )
    }
}
