//! The mount interface.

use async_trait::async_trait;
use shardstore_core::Reader;
use url::Url;

use crate::MountResult;

/// Where the mount's bytes physically live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Bytes are on the local filesystem (or in memory).
    Local,
    /// Bytes must be fetched over the network.
    Remote,
}

/// Capability description of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountInfo {
    /// Physical location of the data.
    pub kind: MountKind,
    /// The source can be read front to back.
    pub access_sequential: bool,
    /// The source supports seeking.
    pub access_seek: bool,
    /// The source supports positional (random) reads.
    pub access_random: bool,
}

impl MountInfo {
    /// Whether the mount needs no transient to serve seek/random access.
    #[must_use]
    pub const fn is_fully_featured(&self) -> bool {
        self.access_seek && self.access_random
    }
}

/// Existence and size of the bytes behind a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountStat {
    /// Whether the target exists at all.
    pub exists: bool,
    /// Size in bytes, when known.
    pub size: u64,
}

/// A source of shard bytes.
///
/// Mounts are cheap handles: fetching opens a fresh [`Reader`] each time.
/// A mount round-trips through its URL form (`serialize` + the registry's
/// factory for the scheme) so shard records survive restarts.
#[async_trait]
pub trait Mount: Send + Sync {
    /// Capability info. Must be constant for the lifetime of the mount.
    fn info(&self) -> MountInfo;

    /// Open a read handle on the mount's bytes.
    ///
    /// # Errors
    /// Returns an error if the source cannot be opened or reached.
    async fn fetch(&self) -> MountResult<Box<dyn Reader>>;

    /// Probe existence and size of the underlying bytes.
    ///
    /// # Errors
    /// Returns an error if the probe itself fails; a missing target is
    /// reported as `MountStat { exists: false, .. }`.
    async fn stat(&self) -> MountResult<MountStat>;

    /// Serialized form, used to persist and restore the mount.
    fn serialize(&self) -> Url;
}
