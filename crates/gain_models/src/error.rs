//! Error types for model construction and persistence.

use thiserror::Error;

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while building, loading or saving a network.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Layer name that the builder does not know.
    #[error("Unimplemented layer: {0}")]
    UnimplementedLayer(String),

    /// Known layer that the head cannot hold.
    #[error("Layer {0} is not supported in the head: the Grad-CAM head gradient only passes through convolutions, ReLU and dropout")]
    UnsupportedHeadLayer(String),

    /// Channel widths of consecutive layers do not line up.
    #[error("Channel mismatch at {layer}: expected {expected} input channels, got {got}")]
    ChannelMismatch {
        /// Layer whose input width is wrong.
        layer: String,
        /// Width produced by the previous layer.
        expected: usize,
        /// Width computed for this layer.
        got: usize,
    },

    /// Pretrained array does not match the layer it is loaded into.
    #[error("Pretrained shape mismatch for {name}: expected {expected:?}, got {got:?}")]
    PretrainedShape {
        /// Array name in the archive.
        name: String,
        /// Shape required by the layer.
        expected: Vec<usize>,
        /// Shape found in the archive.
        got: Vec<usize>,
    },

    /// Array missing from the pretrained archive.
    #[error("Pretrained archive has no entry '{0}'")]
    MissingWeights(String),

    /// Archive could not be read or written.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Checkpoint could not be saved or loaded.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
