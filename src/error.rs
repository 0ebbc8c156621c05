//! Errors surfaced by the classification pipeline

use thiserror::Error;

/// Everything that can go wrong between a captured image and a `Classification`.
///
/// The suggestion lookup never fails, so it has no variant here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    /// The input image is empty, has a zero dimension, or cannot be decoded.
    /// The caller should ask the user for another photo.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The preprocessed tensor does not match the model's input shape. This is
    /// a bug in the pipeline wiring, not a user-facing condition.
    #[error("model input shape mismatch: expected {expected:?}, got {actual:?}")]
    ModelInput {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// The model artifact is missing or corrupt. Classification is unavailable
    /// for the rest of the process.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The loaded model failed while computing a prediction
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for ClassifyError {
    fn from(err: config::ConfigError) -> Self {
        ClassifyError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClassifyError>;
