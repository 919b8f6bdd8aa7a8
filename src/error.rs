//! Error taxonomy for the backup store (see spec §7).

use std::path::PathBuf;

/// Structured error type returned by every fallible operation in this crate.
///
/// Each variant corresponds to one of the error kinds enumerated in the
/// design: callers are expected to match on this rather than stringly-type
/// their error handling.
#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to acquire exclusive lock on {0:?}")]
    Locked(PathBuf),

    #[error("log {0:?} is non-empty but index is missing or empty; reindex required")]
    ReindexRequired(PathBuf),

    #[error("checksum mismatch on chunk {chunk_id}: {reason}")]
    ChecksumMismatch { chunk_id: i64, reason: String },

    #[error("corrupt log at offset {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },

    #[error("timestamp order violation: {0}")]
    DataOrder(String),

    #[error("index schema error: {0}")]
    Schema(String),

    #[error("invalid api usage: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io { path: Some(path.into()), source }
    }

    pub fn io_unpathed(source: std::io::Error) -> Self {
        BackupError::Io { path: None, source }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(source: std::io::Error) -> Self {
        BackupError::io_unpathed(source)
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => BackupError::NotFound(err.to_string()),
            other => BackupError::Schema(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
