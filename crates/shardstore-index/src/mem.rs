//! In-memory index repository.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use shardstore_core::{FullIndex, ShardKey};

use crate::{IndexError, IndexRepo, IndexStat};

// Rough per-entry footprint used for stat sizes: 32-byte id + 8-byte offset.
const ENTRY_SIZE_ESTIMATE: u64 = 40;

/// Index repository held entirely in memory.
///
/// Suitable for tests and for engines that rebuild indices on startup.
#[derive(Default)]
pub struct MemIndexRepo {
    indices: RwLock<HashMap<ShardKey, FullIndex>>,
}

impl MemIndexRepo {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexRepo for MemIndexRepo {
    async fn add_full_index(&self, key: &ShardKey, index: &FullIndex) -> Result<(), IndexError> {
        self.indices.write().insert(key.clone(), index.clone());
        Ok(())
    }

    async fn get_full_index(&self, key: &ShardKey) -> Result<FullIndex, IndexError> {
        self.indices
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(key.clone()))
    }

    async fn stat_full_index(&self, key: &ShardKey) -> Result<IndexStat, IndexError> {
        Ok(self.indices.read().get(key).map_or(
            IndexStat {
                exists: false,
                size: 0,
            },
            |idx| IndexStat {
                exists: true,
                size: idx.len() as u64 * ENTRY_SIZE_ESTIMATE,
            },
        ))
    }

    async fn drop_full_index(&self, key: &ShardKey) -> Result<bool, IndexError> {
        Ok(self.indices.write().remove(key).is_some())
    }
}
