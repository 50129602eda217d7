use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("pdf extraction failed for {path:?}: {message}")]
    PdfExtraction { path: PathBuf, message: String },
    #[error("invalid archive: {0}")]
    InvalidArchive(String),
    #[error("no text extracted from {0:?}")]
    EmptyDocument(PathBuf),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ClaimError>;

impl From<anyhow::Error> for ClaimError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
