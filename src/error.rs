use std::io;

use tch::TchError;
use thiserror::Error;

/// Main library error type.
#[derive(Error, Debug)]
pub enum BdcnError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown dataset key.
    #[error("unknown dataset {0:?}, expected one of {1:?}")]
    UnknownDataset(String, Vec<String>),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Image decoding or encoding error.
    #[error("image error for {path}: {source}")]
    Image { path: String, source: image::ImageError },

    /// Dataset list or directory without usable entries.
    #[error("no samples found in {0}")]
    EmptyDataset(String),

    /// Invalid shape.
    #[error("invalid shape: {0}")]
    Shape(String),

    /// Unexpected value returned by a scripted model.
    #[error("unexpected model output: {0}")]
    ModelOutput(String),

    /// A weight file does not provide a parameter of the model.
    #[error("missing parameter {0} in weight file")]
    MissingParameter(String),

    /// Malformed or incompatible training state record.
    #[error("invalid checkpoint {path}: {msg}")]
    Checkpoint { path: String, msg: String },

    /// JSON configuration error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Errors returned by the Torch C++ API.
    #[error(transparent)]
    Torch(#[from] TchError),
}

impl BdcnError {
    pub fn image_context(path: &std::path::Path, source: image::ImageError) -> Self {
        BdcnError::Image { path: path.display().to_string(), source }
    }

    pub fn checkpoint(path: &std::path::Path, msg: impl Into<String>) -> Self {
        BdcnError::Checkpoint { path: path.display().to_string(), msg: msg.into() }
    }
}

pub type Result<T> = std::result::Result<T, BdcnError>;
