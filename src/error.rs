//! Error types for the recognition core.
//!
//! Only conditions a caller must react to are errors. Missing hands, dropped
//! inference frames and uncorrectable words degrade silently into the result.

use thiserror::Error;

/// Errors surfaced by the recognition core.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The classifier checkpoint has not been (or could not be) loaded.
    #[error("model not loaded")]
    ModelNotLoaded,

    /// The frame payload is empty, malformed or unusable.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The frame bytes could not be decoded into an image.
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// A label outside the 36 recognized classes.
    #[error("unknown class label '{0}'")]
    UnknownClass(String),

    /// Forward pass or tensor conversion failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The checkpoint exists but does not match the network layout.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Writing or reading collected samples failed.
    #[error("sample store error: {0}")]
    SampleStore(String),
}

impl From<candle_core::Error> for RecognitionError {
    fn from(e: candle_core::Error) -> Self {
        RecognitionError::Inference(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecognitionError>;
