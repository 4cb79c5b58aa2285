//! Error types for the shard store.

use shardstore_core::{ContentId, ShardKey};
use shardstore_index::{ArchiveError, IndexError};
use shardstore_mount::MountError;
use thiserror::Error;

use crate::{DatastoreError, ShardState};

/// Errors surfaced by the shard store.
///
/// Transport failures from mounts, indices and the datastore are wrapped as
/// strings; failures fan out to both the caller's sink and the optional
/// failure sink, so errors must stay `Clone`-able.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("shard not found: {0}")]
    ShardUnknown(ShardKey),

    #[error("shard already exists: {0}")]
    ShardExists(ShardKey),

    #[error("shard in use: {0}")]
    ShardInUse(ShardKey),

    #[error("shard initialization failed: {0}")]
    InitializationFailed(String),

    #[error("shard is not in errored state: {0}")]
    NotInErroredState(ShardKey),

    #[error("shard is in errored state: {0}")]
    ShardErrored(String),

    #[error("illegal {op} on shard {key} in state {state}")]
    IllegalTransition {
        key: ShardKey,
        op: &'static str,
        state: ShardState,
    },

    #[error("content id not found in shard index: {0}")]
    BlockNotFound(ContentId),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("datastore error: {0}")]
    Datastore(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("shard store closed")]
    Closed,
}

impl From<MountError> for StoreError {
    fn from(err: MountError) -> Self {
        Self::Mount(err.to_string())
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        Self::Index(err.to_string())
    }
}

impl From<ArchiveError> for StoreError {
    fn from(err: ArchiveError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<DatastoreError> for StoreError {
    fn from(err: DatastoreError) -> Self {
        Self::Datastore(err.to_string())
    }
}

/// Result type for shard store operations.
pub type StoreResult<T> = Result<T, StoreError>;
