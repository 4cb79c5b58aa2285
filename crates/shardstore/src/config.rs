//! Shard store configuration.

use std::path::PathBuf;
use std::sync::Arc;

use shardstore_index::ArchiveFormat;
use shardstore_mount::MountRegistry;
use tokio::sync::mpsc;

use crate::{Datastore, ShardResult, Trace};

/// Configuration for a [`crate::ShardStore`].
pub struct StoreConfig {
    /// Directory owned by the engine for transient shard copies. Created if
    /// missing; required.
    pub transients_dir: PathBuf,

    /// Directory for on-disk indices. When unset, indices live in memory and
    /// are rebuilt as needed after a restart.
    pub index_dir: Option<PathBuf>,

    /// Datastore for shard records. When unset, an in-memory store is used
    /// and shard state does not survive restarts.
    pub datastore: Option<Arc<dyn Datastore>>,

    /// Mount registry used to reconstruct mounts on restart. Defaults to the
    /// built-in schemes.
    pub mount_registry: Option<Arc<MountRegistry>>,

    /// Archive codec used to index shards and read blocks. Defaults to the
    /// plain length-prefixed codec.
    pub archive: Option<Arc<dyn ArchiveFormat>>,

    /// Sink for operation traces. The event loop blocks on this send, so the
    /// receiver must be serviced promptly.
    pub trace_ch: Option<mpsc::Sender<Trace>>,

    /// Sink notified whenever a shard moves to the errored state. Served by
    /// its own dispatcher, so a slow consumer never blocks the event loop.
    pub failure_ch: Option<mpsc::Sender<ShardResult>>,

    /// Upper bound of concurrent mount fetches. Zero disables throttling.
    pub max_concurrent_fetch: usize,

    /// Upper bound of concurrent indexing jobs. Zero disables throttling.
    pub max_concurrent_index: usize,
}

impl StoreConfig {
    /// Configuration with defaults for everything but the transients root.
    #[must_use]
    pub fn new(transients_dir: impl Into<PathBuf>) -> Self {
        Self {
            transients_dir: transients_dir.into(),
            index_dir: None,
            datastore: None,
            mount_registry: None,
            archive: None,
            trace_ch: None,
            failure_ch: None,
            max_concurrent_fetch: 0,
            max_concurrent_index: 0,
        }
    }

    /// Persist indices under the given directory.
    #[must_use]
    pub fn with_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.index_dir = Some(dir.into());
        self
    }

    /// Persist shard records in the given datastore.
    #[must_use]
    pub fn with_datastore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Use a custom mount registry.
    #[must_use]
    pub fn with_mount_registry(mut self, registry: Arc<MountRegistry>) -> Self {
        self.mount_registry = Some(registry);
        self
    }

    /// Use a custom archive codec.
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveFormat>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Receive a trace for every accepted operation.
    #[must_use]
    pub fn with_trace_ch(mut self, trace_ch: mpsc::Sender<Trace>) -> Self {
        self.trace_ch = Some(trace_ch);
        self
    }

    /// Receive a notification for every shard failure.
    #[must_use]
    pub fn with_failure_ch(mut self, failure_ch: mpsc::Sender<ShardResult>) -> Self {
        self.failure_ch = Some(failure_ch);
        self
    }

    /// Bound concurrent mount fetches.
    #[must_use]
    pub const fn with_max_concurrent_fetch(mut self, max: usize) -> Self {
        self.max_concurrent_fetch = max;
        self
    }

    /// Bound concurrent indexing jobs.
    #[must_use]
    pub const fn with_max_concurrent_index(mut self, max: usize) -> Self {
        self.max_concurrent_index = max;
        self
    }
}

/// Options for registering a shard.
#[derive(Debug, Clone, Default)]
pub struct RegisterOpts {
    /// Pre-existing local copy of the shard's bytes, adopted as the initial
    /// transient if the file exists.
    pub existing_transient: Option<PathBuf>,

    /// Defer fetching and indexing to the first acquire. Registration then
    /// completes as soon as the shard is in the catalog.
    pub lazy_initialization: bool,
}
