//! Application-wide error types.

use thiserror::Error;

use crate::scan::registry::ScanKind;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown scan type: {0}")]
    InvalidScanType(String),

    #[error("interval must be at least 1 second, got {0}")]
    IntervalOutOfRange(u64),

    #[error("scan {0} is already running")]
    AlreadyRunning(ScanKind),

    #[error("scan {0} is not running")]
    NotRunning(ScanKind),

    #[error("failed to spawn scan command: {0}")]
    SpawnFailure(#[source] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
