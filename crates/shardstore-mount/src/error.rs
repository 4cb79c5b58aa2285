//! Error types for mounts.

use thiserror::Error;

/// Errors for mount operations.
///
/// Transport errors are carried as strings so results stay `Clone`-able; the
/// upgrader's refetch latch hands the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    #[error("unrecognized mount scheme: {0}")]
    UnrecognizedScheme(String),

    #[error("invalid mount url: {0}")]
    InvalidUrl(String),

    #[error("underlying mount must support sequential access")]
    NotSequential,

    #[error("mount target does not exist")]
    NotFound,

    #[error("mount fetch failed: {0}")]
    Fetch(String),

    #[error("mount stat failed: {0}")]
    Stat(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MountError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for mount operations.
pub type MountResult<T> = Result<T, MountError>;
