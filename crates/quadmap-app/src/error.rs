use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the mapping core. None of them are fatal to the process.
#[derive(Debug, Error)]
pub enum MapperError {
    /// File missing, unreadable or in a format the decoder cannot handle.
    #[error("failed to open media {}: {reason}", path.display())]
    MediaOpen { path: PathBuf, reason: String },

    /// A frame read failed mid-stream without reaching end-of-stream.
    #[error("decode stalled: {0}")]
    DecodeStall(String),

    /// A snapshot entry could not be applied.
    #[error("restore: {0}")]
    Restore(String),

    /// The command needs state that is not there (no selection, empty slot, ...).
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MapperError {
    pub fn media_open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MapperError::MediaOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type MapperResult<T> = Result<T, MapperError>;
