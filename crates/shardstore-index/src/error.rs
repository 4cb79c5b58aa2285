//! Error types for index repositories and archive codecs.

use shardstore_core::ShardKey;
use thiserror::Error;

/// Errors for index repository operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("no index found for shard: {0}")]
    NotFound(ShardKey),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors for archive codec operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    #[error("archive truncated at offset {offset}")]
    Truncated { offset: u64 },

    #[error("invalid archive record at offset {offset}: {reason}")]
    InvalidRecord { offset: u64, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
