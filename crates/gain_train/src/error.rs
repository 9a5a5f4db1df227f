//! Error types for training and inference.

use thiserror::Error;

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur during training or inference.
#[derive(Error, Debug)]
pub enum TrainError {
    /// Invalid training configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid learning rate schedule.
    #[error("Invalid learning rate: {0}")]
    InvalidLearningRate(String),

    /// Tensor data could not be read back.
    #[error("Tensor data error: {0}")]
    TensorError(String),

    /// Summary could not be written.
    #[error("Summary error: {0}")]
    SummaryError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Data error.
    #[error("Data error: {0}")]
    DataError(#[from] gain_data::DataError),

    /// Model error.
    #[error("Model error: {0}")]
    ModelError(#[from] gain_models::ModelError),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] gain_core::CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
