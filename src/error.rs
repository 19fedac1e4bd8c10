//! Internal, non-fatal error kinds for the file writer.
//!
//! Every variant here is logged and swallowed by its caller: none of it
//! crosses the public `Observer` API. The enum exists so the internal
//! plumbing has something typed to match on and log, and so tests can
//! assert which failure path a simulated fault took.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, #[source] source: io::Error },

    #[error("failed to create in-progress directory {path}: {source}")]
    DirCreate { path: PathBuf, #[source] source: io::Error },

    #[error("i/o failure on {path}: {source}")]
    Io { path: PathBuf, #[source] source: io::Error },
}

impl WriterError {
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriterError::Open { path: path.into(), source }
    }

    pub fn dir_create(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriterError::DirCreate { path: path.into(), source }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriterError::Io { path: path.into(), source }
    }
}
