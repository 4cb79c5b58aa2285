//! The in-memory shard record and its persisted form.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use shardstore_core::ShardKey;
use shardstore_mount::{Mount, Upgrader};

use crate::task::Waiter;

/// Lifecycle state of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    /// Registered but not yet processed by the event loop.
    New,
    /// Fetch and indexing in progress.
    Initializing,
    /// Indexed and ready to be acquired.
    Available,
    /// At least one accessor is outstanding.
    Serving,
    /// A terminal error was recorded; the shard can be recovered.
    Errored,
    /// Recovery (refetch + reindex) in progress.
    Recovering,
    /// Being removed from the catalog.
    Destroying,
}

impl ShardState {
    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Initializing => "initializing",
            Self::Available => "available",
            Self::Serving => "serving",
            Self::Errored => "errored",
            Self::Recovering => "recovering",
            Self::Destroying => "destroying",
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a shard's observable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Current lifecycle state.
    pub state: ShardState,
    /// Last terminal error, present exactly when the state is errored.
    pub error: Option<String>,
    /// Number of outstanding accessors.
    pub refs: u32,
}

/// Snapshot of every registered shard.
pub type AllShardsInfo = HashMap<ShardKey, ShardInfo>;

/// One registered shard.
///
/// The event loop is the only writer of the mutable fields; the lock exists
/// so observers outside the loop can take consistent snapshots.
pub(crate) struct Shard {
    pub(crate) key: ShardKey,
    pub(crate) lazy: bool,
    pub(crate) mount: Arc<Upgrader>,
    inner: RwLock<ShardMut>,
}

pub(crate) struct ShardMut {
    pub(crate) state: ShardState,
    pub(crate) error: Option<String>,
    pub(crate) refs: u32,
    /// Waiter of the registration in flight, answered on the first
    /// transition to available or errored.
    pub(crate) pending_register: Option<Waiter>,
    /// Waiter of the recovery in flight.
    pub(crate) pending_recover: Option<Waiter>,
    /// Acquirers parked until the shard becomes available.
    pub(crate) waiting_acquires: Vec<Waiter>,
}

impl Shard {
    pub(crate) fn new(key: ShardKey, mount: Arc<Upgrader>, lazy: bool) -> Self {
        Self::restored(key, mount, lazy, ShardState::New, None)
    }

    pub(crate) fn restored(
        key: ShardKey,
        mount: Arc<Upgrader>,
        lazy: bool,
        state: ShardState,
        error: Option<String>,
    ) -> Self {
        Self {
            key,
            lazy,
            mount,
            inner: RwLock::new(ShardMut {
                state,
                error,
                refs: 0,
                pending_register: None,
                pending_recover: None,
                waiting_acquires: Vec::new(),
            }),
        }
    }

    pub(crate) fn state(&self) -> ShardState {
        self.inner.read().state
    }

    pub(crate) fn info(&self) -> ShardInfo {
        let inner = self.inner.read();
        ShardInfo {
            state: inner.state,
            error: inner.error.clone(),
            refs: inner.refs,
        }
    }

    /// Write access to the mutable fields. Event loop only.
    pub(crate) fn lock(&self) -> RwLockWriteGuard<'_, ShardMut> {
        self.inner.write()
    }

    /// Serialized form written to the datastore after every mutation.
    pub(crate) fn persisted(&self) -> PersistedShard {
        let inner = self.inner.read();
        PersistedShard {
            key: self.key.clone(),
            state: inner.state,
            error: inner.error.clone(),
            lazy: self.lazy,
            mount: self.mount.serialize().to_string(),
            transient: self.mount.transient_path(),
        }
    }
}

/// Durable form of a shard record.
///
/// `refs` is deliberately absent: no accessor survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedShard {
    pub(crate) key: ShardKey,
    pub(crate) state: ShardState,
    pub(crate) error: Option<String>,
    pub(crate) lazy: bool,
    pub(crate) mount: String,
    pub(crate) transient: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serde_names_are_stable() {
        for (state, name) in [
            (ShardState::New, "\"new\""),
            (ShardState::Initializing, "\"initializing\""),
            (ShardState::Available, "\"available\""),
            (ShardState::Serving, "\"serving\""),
            (ShardState::Errored, "\"errored\""),
            (ShardState::Recovering, "\"recovering\""),
            (ShardState::Destroying, "\"destroying\""),
        ] {
            assert_eq!(serde_json::to_string(&state).unwrap(), name);
            let back: ShardState = serde_json::from_str(name).unwrap();
            assert_eq!(back, state);
        }
    }

    #[test]
    fn persisted_shard_roundtrip() {
        let record = PersistedShard {
            key: ShardKey::new("k1"),
            state: ShardState::Available,
            error: None,
            lazy: true,
            mount: "mem:00ff".to_string(),
            transient: Some(PathBuf::from("/tmp/transients/t1")),
        };
        let bytes = serde_json::to_vec(&record).unwrap();
        let back: PersistedShard = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.key, record.key);
        assert_eq!(back.state, record.state);
        assert_eq!(back.lazy, record.lazy);
        assert_eq!(back.mount, record.mount);
        assert_eq!(back.transient, record.transient);
    }
}
