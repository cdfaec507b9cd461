//! Error types for the mail server

use std::path::PathBuf;

use thiserror::Error;

/// Failure while reading or writing the mailbox directory
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid mailbox name '{0}'")]
    InvalidMailbox(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the server API
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Transport limits
pub struct Limits;

impl Limits {
    /// Longest line accepted from a client, excluding the line terminator
    pub const MAX_LINE_LENGTH: usize = 16384;

    /// Seconds of read inactivity before a connection is closed
    pub const IDLE_TIMEOUT_SECS: u64 = 60;
}
