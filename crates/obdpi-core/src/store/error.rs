//! Storage errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the store failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A complete line is not a valid reading
    #[error("Malformed reading at {path}:{line}: {message}")]
    Malformed {
        /// File involved
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Decoder message
        message: String,
    },

    /// A reading could not be serialized
    #[error("Failed to encode reading: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
