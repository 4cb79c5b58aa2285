//! Accessors: live read handles over a shard.

use std::fmt;
use std::sync::Arc;

use shardstore_core::{ContentId, FullIndex, Reader, ShardKey};
use shardstore_index::ArchiveFormat;
use tokio::sync::mpsc;
use tracing::debug;

use crate::shard::Shard;
use crate::task::{OpType, Task};
use crate::{StoreError, StoreResult};

/// Reference-counted read handle over one shard.
///
/// Owns a seekable reader on the shard's bytes and the in-memory full index.
/// The shard stays in the serving state while any accessor is alive;
/// dropping the accessor enqueues the matching release.
pub struct ShardAccessor {
    key: ShardKey,
    index: FullIndex,
    reader: Box<dyn Reader>,
    archive: Arc<dyn ArchiveFormat>,
    release: Option<ReleaseHandle>,
}

struct ReleaseHandle {
    shard: Arc<Shard>,
    tx: mpsc::Sender<Task>,
}

impl ShardAccessor {
    pub(crate) fn new(
        key: ShardKey,
        reader: Box<dyn Reader>,
        index: FullIndex,
        archive: Arc<dyn ArchiveFormat>,
        shard: Arc<Shard>,
        release_tx: mpsc::Sender<Task>,
    ) -> Self {
        Self {
            key,
            index,
            reader,
            archive,
            release: Some(ReleaseHandle {
                shard,
                tx: release_tx,
            }),
        }
    }

    /// Key of the shard this accessor reads.
    #[must_use]
    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    /// The shard's full index.
    #[must_use]
    pub const fn index(&self) -> &FullIndex {
        &self.index
    }

    /// Read the block stored under `id`.
    ///
    /// # Errors
    /// Returns `BlockNotFound` if the id is not in the index, or an archive
    /// error if the record cannot be read back.
    pub async fn read_block(&mut self, id: &ContentId) -> StoreResult<Vec<u8>> {
        let offset = self
            .index
            .offset(id)
            .ok_or_else(|| StoreError::BlockNotFound(*id))?;

        let (stored, payload) = self
            .archive
            .read_block_at(self.reader.as_mut(), offset)
            .await?;
        if stored != *id {
            return Err(StoreError::Archive(format!(
                "index points at block {stored}, expected {id}"
            )));
        }
        Ok(payload)
    }
}

impl fmt::Debug for ShardAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardAccessor")
            .field("key", &self.key)
            .field("blocks", &self.index.len())
            .finish()
    }
}

impl Drop for ShardAccessor {
    fn drop(&mut self) {
        let Some(handle) = self.release.take() else {
            return;
        };
        let task = Task::new(OpType::Release, handle.shard);

        // Best-effort enqueue: fall back to a spawned send when the external
        // queue is momentarily full, drop silently when the store is closed.
        match handle.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let tx = handle.tx;
                    runtime.spawn(async move {
                        let _ = tx.send(task).await;
                    });
                } else {
                    debug!(key = %self.key, "no runtime at accessor drop; release lost");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
