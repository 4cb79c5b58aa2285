//! Tasks, waiters and results flowing through the event loop.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shardstore_core::ShardKey;
use tokio::sync::mpsc;

use crate::shard::{Shard, ShardInfo};
use crate::{ShardAccessor, StoreError};

/// Operation kinds handled by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Register,
    Acquire,
    Release,
    Fail,
    MakeAvailable,
    Recover,
    Destroy,
    Gc,
}

impl OpType {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Acquire => "acquire",
            Self::Release => "release",
            Self::Fail => "fail",
            Self::MakeAvailable => "make_available",
            Self::Recover => "recover",
            Self::Destroy => "destroy",
            Self::Gc => "gc",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an asynchronous shard operation, delivered on a caller's sink.
pub struct ShardResult {
    /// Shard the result concerns.
    pub key: ShardKey,
    /// Failure, if the operation did not complete.
    pub error: Option<StoreError>,
    /// Accessor, for successful acquires.
    pub accessor: Option<ShardAccessor>,
}

impl ShardResult {
    pub(crate) fn ok(key: ShardKey) -> Self {
        Self {
            key,
            error: None,
            accessor: None,
        }
    }

    pub(crate) fn err(key: ShardKey, error: StoreError) -> Self {
        Self {
            key,
            error: Some(error),
            accessor: None,
        }
    }

    pub(crate) fn with_accessor(key: ShardKey, accessor: ShardAccessor) -> Self {
        Self {
            key,
            error: None,
            accessor: Some(accessor),
        }
    }
}

impl fmt::Debug for ShardResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardResult")
            .field("key", &self.key)
            .field("error", &self.error)
            .field("accessor", &self.accessor.is_some())
            .finish()
    }
}

/// Trace of one accepted operation, emitted after its state mutation.
#[derive(Debug, Clone)]
pub struct Trace {
    /// Shard the operation ran against.
    pub key: ShardKey,
    /// The operation.
    pub op: OpType,
    /// Observable shard state after the operation.
    pub after: ShardInfo,
}

/// A caller waiting for a result. A dropped receiver on the sink marks the
/// waiter as gone; dispatchers skip it silently.
pub(crate) struct Waiter {
    pub(crate) out: Option<mpsc::Sender<ShardResult>>,
}

impl Waiter {
    pub(crate) const fn none() -> Self {
        Self { out: None }
    }

    pub(crate) const fn new(out: mpsc::Sender<ShardResult>) -> Self {
        Self { out: Some(out) }
    }
}

/// One unit of work for the event loop.
pub(crate) struct Task {
    pub(crate) op: OpType,
    pub(crate) shard: Arc<Shard>,
    pub(crate) waiter: Waiter,
    pub(crate) error: Option<StoreError>,
}

impl Task {
    pub(crate) fn new(op: OpType, shard: Arc<Shard>) -> Self {
        Self {
            op,
            shard,
            waiter: Waiter::none(),
            error: None,
        }
    }

    pub(crate) fn with_waiter(op: OpType, shard: Arc<Shard>, out: mpsc::Sender<ShardResult>) -> Self {
        Self {
            op,
            shard,
            waiter: Waiter::new(out),
            error: None,
        }
    }

    pub(crate) fn fail(shard: Arc<Shard>, error: StoreError) -> Self {
        Self {
            op: OpType::Fail,
            shard,
            waiter: Waiter::none(),
            error: Some(error),
        }
    }
}

/// A result en route to a waiter's sink, queued for a dispatcher task.
pub(crate) struct Dispatch {
    pub(crate) waiter: Waiter,
    pub(crate) result: ShardResult,
}
