use std::path::PathBuf;
use sticker_core::{AttemptFailure, ConvertError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("Could not decode {path}: {failure}")]
    Decode {
        path: PathBuf,
        failure: AttemptFailure,
    },

    #[error("Invalid sticker record: {0}")]
    InvalidRecord(String),

    #[error("Malformed record JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackError>;
