use std::path::PathBuf;

use thiserror::Error;

/// Failures a detection caller may need to branch on.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("model file not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("failed to load model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    Decode(String),

    #[error("invalid detection input: {0}")]
    InvalidInput(String),
}
