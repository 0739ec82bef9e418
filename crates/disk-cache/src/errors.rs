use std::io;

use journal::JournalError;
use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// Absence and contention are not errors: a missing entry reads as
/// `Ok(None)`, a contended edit as `Ok(None)`, a missed remove as
/// `Ok(false)`. The variants here are real failures: I/O propagated from
/// the filesystem, or misuse of the API.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Keys must be non-empty and contain no space, newline, carriage
    /// return, or path separator.
    #[error("invalid key {key:?}")]
    InvalidKey { key: String },
    /// The cache has been closed; no further operations are possible.
    #[error("cache is closed")]
    Closed,
    /// The editor no longer owns its entry: it was already committed or
    /// aborted, or the cache was closed underneath it.
    #[error("editor no longer owns its entry")]
    StaleEditor,
    /// A first-time commit did not stage a value for every index.
    #[error("edit did not create a value for index {index}")]
    MissingValue { index: usize },
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

impl From<JournalError> for CacheError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::Io(err) => CacheError::Io(err),
            JournalError::Corrupt(msg) => {
                CacheError::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
