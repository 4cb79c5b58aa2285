//! The shard store: public API, construction and state restore.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use shardstore_core::ShardKey;
use shardstore_index::{ArchiveFormat, FsIndexRepo, IndexRepo, MemIndexRepo, PlainArchive};
use shardstore_mount::{Mount, MountRegistry, Upgrader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::datastore::NamespacedDatastore;
use crate::shard::{PersistedShard, Shard};
use crate::task::{Dispatch, OpType, Task, Waiter};
use crate::throttle::Throttler;
use crate::{
    AllShardsInfo, MemDatastore, RegisterOpts, ShardInfo, ShardResult, ShardState, StoreConfig,
    StoreError, StoreResult, Trace,
};

/// Namespace under which shard records are persisted.
pub const STORE_NAMESPACE: &str = "dagstore";

// Queue depths. External takes the brunt of caller concurrency; internal
// only ever stages a single loop follow-up; completion makes async workers
// wait instead of growing unbounded.
const EXTERNAL_QUEUE_DEPTH: usize = 128;
const INTERNAL_QUEUE_DEPTH: usize = 1;
const COMPLETION_QUEUE_DEPTH: usize = 64;
const DISPATCH_QUEUE_DEPTH: usize = 128;

/// A catalog of content-addressed data shards.
///
/// See the crate docs for the lifecycle model. All methods are cheap to call
/// from any task; mutations are serialized through the internal event loop.
pub struct ShardStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) shards: RwLock<HashMap<ShardKey, Arc<Shard>>>,
    pub(crate) indices: Arc<dyn IndexRepo>,
    pub(crate) archive: Arc<dyn ArchiveFormat>,
    pub(crate) store: NamespacedDatastore,
    pub(crate) mounts: Arc<MountRegistry>,
    pub(crate) transients_dir: PathBuf,

    pub(crate) external_tx: mpsc::Sender<Task>,
    pub(crate) internal_tx: mpsc::Sender<Task>,
    pub(crate) completion_tx: mpsc::Sender<Task>,
    pub(crate) dispatch_tx: mpsc::Sender<Dispatch>,
    pub(crate) failure_tx: Option<mpsc::Sender<Dispatch>>,
    pub(crate) failure_sink: Option<mpsc::Sender<ShardResult>>,
    pub(crate) trace_tx: Option<mpsc::Sender<Trace>>,

    pub(crate) throttle_fetch: Throttler,
    pub(crate) throttle_index: Throttler,

    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl ShardStore {
    /// Construct a shard store, restore persisted shard state, and start the
    /// event loop and dispatchers.
    ///
    /// # Errors
    /// Fails if the transients directory cannot be created, the index
    /// directory cannot be opened, or persisted state cannot be enumerated.
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        if config.transients_dir.as_os_str().is_empty() {
            return Err(StoreError::Config("transients directory is required".into()));
        }
        tokio::fs::create_dir_all(&config.transients_dir)
            .await
            .map_err(|e| {
                StoreError::Config(format!("failed to create transients dir: {e}"))
            })?;

        let indices: Arc<dyn IndexRepo> = match &config.index_dir {
            None => {
                info!("using in-memory index repo");
                Arc::new(MemIndexRepo::new())
            }
            Some(dir) => Arc::new(
                FsIndexRepo::open(dir)
                    .map_err(|e| StoreError::Config(format!("failed to open index repo: {e}")))?,
            ),
        };

        let datastore = config.datastore.unwrap_or_else(|| {
            warn!("no datastore provided; shard state will not survive restarts");
            Arc::new(MemDatastore::new())
        });
        let store = NamespacedDatastore::new(datastore, STORE_NAMESPACE);

        let mounts = config
            .mount_registry
            .unwrap_or_else(|| Arc::new(MountRegistry::with_defaults()));
        let archive: Arc<dyn ArchiveFormat> =
            config.archive.unwrap_or_else(|| Arc::new(PlainArchive));

        let (external_tx, external_rx) = mpsc::channel(EXTERNAL_QUEUE_DEPTH);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_QUEUE_DEPTH);
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_QUEUE_DEPTH);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
        let (failure_tx, failure_rx) = if config.failure_ch.is_some() {
            let (tx, rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let inner = Arc::new(StoreInner {
            shards: RwLock::new(HashMap::new()),
            indices,
            archive,
            store,
            mounts,
            transients_dir: config.transients_dir,
            external_tx,
            internal_tx,
            completion_tx,
            dispatch_tx,
            failure_tx,
            failure_sink: config.failure_ch,
            trace_tx: config.trace_ch,
            throttle_fetch: Throttler::new(config.max_concurrent_fetch),
            throttle_index: Throttler::new(config.max_concurrent_index),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        // Restore before the loop starts so the catalog is complete when the
        // first external task lands.
        let (register, destroy) = inner.restore_state().await?;

        inner.tracker.spawn(Arc::clone(&inner).event_loop(
            completion_rx,
            internal_rx,
            external_rx,
        ));
        inner
            .tracker
            .spawn(dispatcher(inner.cancel.clone(), dispatch_rx));
        if let Some(failure_rx) = failure_rx {
            inner
                .tracker
                .spawn(dispatcher(inner.cancel.clone(), failure_rx));
        }

        // Resume work interrupted by the previous shutdown. Queued after the
        // loop is running: more interrupted shards than the queue depth
        // would otherwise block construction forever.
        for shard in register {
            let _ = inner
                .queue_task(Task::new(OpType::Register, shard), &inner.external_tx)
                .await;
        }
        for shard in destroy {
            let _ = inner
                .queue_task(Task::new(OpType::Destroy, shard), &inner.external_tx)
                .await;
        }

        Ok(Self { inner })
    }

    /// Register a new shard backed by `mount` under `key`.
    ///
    /// Validation happens synchronously; the fetch and index work is queued,
    /// and its outcome is delivered on `out`.
    ///
    /// # Errors
    /// Returns `ShardExists` for duplicate keys, a mount error if the mount
    /// cannot be upgraded, or `Closed` after shutdown.
    #[instrument(skip(self, mount, out, opts), fields(key = %key))]
    pub async fn register_shard(
        &self,
        key: ShardKey,
        mount: Arc<dyn Mount>,
        out: mpsc::Sender<ShardResult>,
        opts: RegisterOpts,
    ) -> StoreResult<()> {
        let shard = {
            let mut shards = self.inner.shards.write();
            if shards.contains_key(&key) {
                return Err(StoreError::ShardExists(key));
            }

            let upgrader = Upgrader::upgrade(
                mount,
                &self.inner.transients_dir,
                key.as_str(),
                opts.existing_transient.as_deref(),
            )
            .map_err(StoreError::from)?;

            let shard = Arc::new(Shard::new(
                key.clone(),
                Arc::new(upgrader),
                opts.lazy_initialization,
            ));
            shards.insert(key, Arc::clone(&shard));
            shard
        };

        self.inner
            .queue_task(
                Task::with_waiter(OpType::Register, shard, out),
                &self.inner.external_tx,
            )
            .await
    }

    /// Acquire an accessor for the shard under `key`.
    ///
    /// Resolves quickly when the shard's bytes are local; otherwise the data
    /// is fetched from its mount first. The accessor (or failure) is
    /// delivered on `out`.
    ///
    /// # Errors
    /// Returns `ShardUnknown` if the key is not registered, or `Closed`
    /// after shutdown.
    #[instrument(skip(self, out), fields(key = %key))]
    pub async fn acquire_shard(
        &self,
        key: &ShardKey,
        out: mpsc::Sender<ShardResult>,
    ) -> StoreResult<()> {
        let shard = self.lookup(key)?;
        self.inner
            .queue_task(
                Task::with_waiter(OpType::Acquire, shard, out),
                &self.inner.external_tx,
            )
            .await
    }

    /// Recover a shard that is in the errored state.
    ///
    /// The outcome is delivered on `out`; requesting recovery of a shard
    /// that is not errored delivers an error there as well.
    ///
    /// # Errors
    /// Returns `ShardUnknown` if the key is not registered, or `Closed`
    /// after shutdown.
    pub async fn recover_shard(
        &self,
        key: &ShardKey,
        out: mpsc::Sender<ShardResult>,
    ) -> StoreResult<()> {
        let shard = self.lookup(key)?;
        self.inner
            .queue_task(
                Task::with_waiter(OpType::Recover, shard, out),
                &self.inner.external_tx,
            )
            .await
    }

    /// Destroy the shard under `key`: drop its index, delete its transient
    /// and remove it from the catalog.
    ///
    /// Refused with `ShardInUse` (on `out`) while accessors are outstanding.
    ///
    /// # Errors
    /// Returns `ShardUnknown` if the key is not registered, or `Closed`
    /// after shutdown.
    pub async fn destroy_shard(
        &self,
        key: &ShardKey,
        out: mpsc::Sender<ShardResult>,
    ) -> StoreResult<()> {
        let shard = self.lookup(key)?;
        self.inner
            .queue_task(
                Task::with_waiter(OpType::Destroy, shard, out),
                &self.inner.external_tx,
            )
            .await
    }

    /// Reclaim transients of shards that are available or errored and have
    /// no outstanding accessors.
    ///
    /// Candidates are selected up front; the event loop re-checks each shard
    /// immediately before deletion and silently skips shards that have since
    /// become busy. Returns one entry per candidate, `None` for success.
    ///
    /// # Errors
    /// Returns `Closed` after shutdown.
    pub async fn gc(&self) -> StoreResult<HashMap<ShardKey, Option<StoreError>>> {
        let reclaim: Vec<Arc<Shard>> = {
            let shards = self.inner.shards.read();
            shards
                .values()
                .filter(|s| {
                    matches!(s.state(), ShardState::Available | ShardState::Errored)
                })
                .cloned()
                .collect()
        };

        let (tx, mut rx) = mpsc::channel(reclaim.len().max(1));
        let mut awaiting = 0usize;
        let mut results = HashMap::with_capacity(reclaim.len());
        for shard in reclaim {
            let key = shard.key.clone();
            match self
                .inner
                .queue_task(
                    Task::with_waiter(OpType::Gc, shard, tx.clone()),
                    &self.inner.external_tx,
                )
                .await
            {
                Ok(()) => awaiting += 1,
                Err(e) => {
                    results.insert(key, Some(e));
                }
            }
        }
        drop(tx);

        for _ in 0..awaiting {
            tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                res = rx.recv() => match res {
                    Some(res) => {
                        results.insert(res.key, res.error);
                    }
                    None => break,
                },
            }
        }
        Ok(results)
    }

    /// Snapshot of one shard's observable state.
    ///
    /// # Errors
    /// Returns `ShardUnknown` if the key is not registered.
    pub fn get_shard_info(&self, key: &ShardKey) -> StoreResult<ShardInfo> {
        Ok(self.lookup(key)?.info())
    }

    /// Snapshot of every registered shard.
    #[must_use]
    pub fn all_shards_info(&self) -> AllShardsInfo {
        let shards = self.inner.shards.read();
        shards
            .iter()
            .map(|(key, shard)| (key.clone(), shard.info()))
            .collect()
    }

    /// Shut the store down: stop the event loop and dispatchers, cancel
    /// in-flight workers, and flush the datastore. Idempotent.
    ///
    /// # Errors
    /// Returns a datastore error if the final flush fails.
    pub async fn close(&self) -> StoreResult<()> {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.store.sync().await.map_err(StoreError::from)
    }

    fn lookup(&self, key: &ShardKey) -> StoreResult<Arc<Shard>> {
        self.inner
            .shards
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::ShardUnknown(key.clone()))
    }
}

impl StoreInner {
    /// Send a task, bailing out when the store shuts down.
    pub(crate) async fn queue_task(
        &self,
        task: Task,
        tx: &mpsc::Sender<Task>,
    ) -> StoreResult<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StoreError::Closed),
            res = tx.send(task) => res.map_err(|_| StoreError::Closed),
        }
    }

    /// Load every persisted shard record into the catalog.
    ///
    /// Returns the shards whose interrupted registration or destruction must
    /// be re-queued once the event loop is running.
    async fn restore_state(&self) -> StoreResult<(Vec<Arc<Shard>>, Vec<Arc<Shard>>)> {
        let records = self.store.list_all().await.map_err(StoreError::from)?;

        let mut register = Vec::new();
        let mut destroy = Vec::new();
        let mut restored = HashMap::with_capacity(records.len());

        for (record_key, value) in records {
            let record: PersistedShard = match serde_json::from_slice(&value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %record_key, error = %e, "failed to decode shard record; skipping");
                    continue;
                }
            };
            let key = record.key.clone();

            let shard = match self.revive(record).await {
                Ok(shard) => shard,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to restore shard; skipping");
                    continue;
                }
            };

            match shard.state() {
                ShardState::New => register.push(Arc::clone(&shard)),
                ShardState::Destroying => destroy.push(Arc::clone(&shard)),
                _ => {}
            }
            restored.insert(key, shard);
        }

        if !restored.is_empty() {
            info!(shards = restored.len(), "restored shard catalog");
        }
        let mut shards = self.shards.write();
        shards.extend(restored);
        drop(shards);

        Ok((register, destroy))
    }

    /// Rebuild one shard from its persisted record, applying the restart
    /// fixups: serving downgrades to available, an interrupted
    /// initialization restarts unless its index already exists, and an
    /// interrupted recovery lands back in errored.
    async fn revive(&self, record: PersistedShard) -> StoreResult<Arc<Shard>> {
        let url = Url::parse(&record.mount)
            .map_err(|e| StoreError::Mount(format!("bad mount url: {e}")))?;
        let mount = self.mounts.instantiate(&url).map_err(StoreError::from)?;
        let upgrader = Upgrader::upgrade(
            mount,
            &self.transients_dir,
            record.key.as_str(),
            record.transient.as_deref(),
        )
        .map_err(StoreError::from)?;

        let mut state = record.state;
        let mut error = record.error;
        match state {
            ShardState::Serving => state = ShardState::Available,
            ShardState::Initializing => {
                let exists = self
                    .indices
                    .stat_full_index(&record.key)
                    .await
                    .map_or(false, |stat| stat.exists);
                state = if exists {
                    ShardState::Available
                } else {
                    ShardState::New
                };
            }
            ShardState::Recovering => {
                state = ShardState::Errored;
                error.get_or_insert_with(|| "recovery interrupted by restart".to_string());
            }
            _ => {}
        }
        if state != ShardState::Errored {
            error = None;
        }

        debug!(key = %record.key, state = %state, "restored shard");
        Ok(Arc::new(Shard::restored(
            record.key,
            Arc::new(upgrader),
            record.lazy,
            state,
            error,
        )))
    }
}

/// Pump results from the loop's buffered dispatch queue to waiter sinks.
///
/// Runs as its own task so a slow or absent consumer never stalls the event
/// loop; gone receivers are skipped silently.
async fn dispatcher(cancel: CancellationToken, mut rx: mpsc::Receiver<Dispatch>) {
    loop {
        let dispatch = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            item = rx.recv() => match item {
                Some(dispatch) => dispatch,
                None => return,
            },
        };

        let Waiter { out: Some(out) } = dispatch.waiter else {
            continue;
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            res = out.send(dispatch.result) => {
                if res.is_err() {
                    debug!("result receiver gone; skipping dispatch");
                }
            }
        }
    }
}
