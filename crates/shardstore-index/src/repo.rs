//! The index repository interface.

use async_trait::async_trait;
use shardstore_core::{FullIndex, ShardKey};

use crate::IndexError;

/// Existence and size of a stored index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStat {
    /// Whether an index is stored for the key.
    pub exists: bool,
    /// Approximate stored size in bytes.
    pub size: u64,
}

/// Durable storage for full shard indices.
///
/// The engine treats the repository as authoritative: on restart, presence of
/// an index is what decides whether a shard is serviceable.
#[async_trait]
pub trait IndexRepo: Send + Sync {
    /// Store the full index for a shard, replacing any existing one.
    ///
    /// # Errors
    /// Returns an error if the index cannot be durably stored.
    async fn add_full_index(&self, key: &ShardKey, index: &FullIndex) -> Result<(), IndexError>;

    /// Load the full index for a shard into memory.
    ///
    /// # Errors
    /// Returns `NotFound` if no index is stored for the key.
    async fn get_full_index(&self, key: &ShardKey) -> Result<FullIndex, IndexError>;

    /// Cheap existence probe.
    ///
    /// # Errors
    /// Returns an error only if the probe itself fails; a missing index is
    /// `IndexStat { exists: false, .. }`.
    async fn stat_full_index(&self, key: &ShardKey) -> Result<IndexStat, IndexError>;

    /// Drop the index for a shard. Returns whether an index was dropped.
    ///
    /// # Errors
    /// Returns an error if removal fails.
    async fn drop_full_index(&self, key: &ShardKey) -> Result<bool, IndexError>;
}
