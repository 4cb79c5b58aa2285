//! Async workers: fetch + index and fetch + accessor-build flows.
//!
//! Spawned by the event loop, at most one state-transitioning worker per
//! shard. Workers never touch shard state directly; every outcome goes back
//! through the completion queue.

use std::sync::Arc;

use shardstore_mount::Mount;
use tracing::debug;

use crate::accessor::ShardAccessor;
use crate::shard::Shard;
use crate::store::StoreInner;
use crate::task::{OpType, Task, Waiter};
use crate::{ShardResult, StoreError};

impl StoreInner {
    pub(crate) fn spawn_initialize(self: &Arc<Self>, shard: Arc<Shard>) {
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                () = inner.cancel.cancelled() => debug!(key = %shard.key, "initialize worker cancelled"),
                () = inner.initialize_shard(&shard) => {}
            }
        });
    }

    pub(crate) fn spawn_recover(self: &Arc<Self>, shard: Arc<Shard>) {
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                () = inner.cancel.cancelled() => debug!(key = %shard.key, "recover worker cancelled"),
                () = async {
                    // Recovery refetches from the source of truth; a stale
                    // or corrupt transient must not be reused.
                    if let Err(e) = shard.mount.delete_transient().await {
                        debug!(key = %shard.key, error = %e, "no transient dropped before recovery");
                    }
                    inner.initialize_shard(&shard).await;
                } => {}
            }
        });
    }

    pub(crate) fn spawn_acquire(self: &Arc<Self>, shard: Arc<Shard>, waiter: Waiter) {
        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                () = inner.cancel.cancelled() => debug!(key = %shard.key, "acquire worker cancelled"),
                () = inner.acquire_async(&shard, waiter) => {}
            }
        });
    }

    /// Fetch the mount, read or generate the full index, and store it.
    /// Ends by queueing either a make-available or a failure.
    async fn initialize_shard(&self, shard: &Arc<Shard>) {
        let key = shard.key.clone();
        debug!(key = %key, "initialize worker starting");

        let fetched = self.throttle_fetch.run(shard.mount.fetch()).await;
        let mut reader = match fetched {
            Ok(reader) => reader,
            Err(e) => {
                self.fail_shard(
                    Arc::clone(shard),
                    StoreError::InitializationFailed(format!(
                        "failed to acquire reader of mount: {e}"
                    )),
                )
                .await;
                return;
            }
        };

        let indexed = self
            .throttle_index
            .run(self.archive.read_or_generate_index(reader.as_mut()))
            .await;
        let index = match indexed {
            Ok(index) => index,
            Err(e) => {
                self.fail_shard(
                    Arc::clone(shard),
                    StoreError::InitializationFailed(format!(
                        "failed to read or generate index: {e}"
                    )),
                )
                .await;
                return;
            }
        };

        if let Err(e) = self.indices.add_full_index(&key, &index).await {
            self.fail_shard(
                Arc::clone(shard),
                StoreError::InitializationFailed(format!("failed to add index for shard: {e}")),
            )
            .await;
            return;
        }

        debug!(key = %key, blocks = index.len(), "initialize worker done");
        let _ = self
            .queue_task(
                Task::new(OpType::MakeAvailable, Arc::clone(shard)),
                &self.completion_tx,
            )
            .await;
    }

    /// Fetch the mount, load the full index, and join them into an accessor
    /// for the waiter.
    ///
    /// The loop incremented `refs` when it accepted the acquire, so every
    /// failure path queues a compensating release before failing the shard.
    async fn acquire_async(&self, shard: &Arc<Shard>, waiter: Waiter) {
        let key = shard.key.clone();

        let fetched = self.throttle_fetch.run(shard.mount.fetch()).await;
        let reader = match fetched {
            Ok(reader) => reader,
            Err(e) => {
                let err = StoreError::from(e);
                self.undo_acquire(
                    Arc::clone(shard),
                    StoreError::InitializationFailed(format!(
                        "failed to acquire reader of mount: {err}"
                    )),
                )
                .await;
                self.dispatch(waiter, ShardResult::err(key, err)).await;
                return;
            }
        };

        let index = match self.indices.get_full_index(&key).await {
            Ok(index) => index,
            Err(e) => {
                drop(reader);
                let err = StoreError::from(e);
                self.undo_acquire(
                    Arc::clone(shard),
                    StoreError::InitializationFailed(format!(
                        "failed to recover index for shard {key}: {err}"
                    )),
                )
                .await;
                self.dispatch(waiter, ShardResult::err(key, err)).await;
                return;
            }
        };

        let accessor = ShardAccessor::new(
            key.clone(),
            reader,
            index,
            Arc::clone(&self.archive),
            Arc::clone(shard),
            self.external_tx.clone(),
        );
        self.dispatch(waiter, ShardResult::with_accessor(key, accessor))
            .await;
    }

    /// Queue the compensating release and the shard failure.
    async fn undo_acquire(&self, shard: Arc<Shard>, error: StoreError) {
        let _ = self
            .queue_task(
                Task::new(OpType::Release, Arc::clone(&shard)),
                &self.completion_tx,
            )
            .await;
        self.fail_shard(shard, error).await;
    }

    async fn fail_shard(&self, shard: Arc<Shard>, error: StoreError) {
        let _ = self
            .queue_task(Task::fail(shard, error), &self.completion_tx)
            .await;
    }
}
