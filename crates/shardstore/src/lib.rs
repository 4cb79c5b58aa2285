//! The shard lifecycle engine.
//!
//! A [`ShardStore`] manages a catalog of content-addressed data shards. For
//! each shard it:
//!
//! - registers the shard's [`Mount`](shardstore_mount::Mount) and builds a
//!   full index of the archive behind it,
//! - persists shard state across restarts,
//! - hands out concurrent [`ShardAccessor`]s combining a seekable read handle
//!   with the in-memory index,
//! - reclaims local transient copies when shards go unused.
//!
//! All state transitions run on a single event loop task; async fetch and
//! index work fans out to bounded workers and reports back through a
//! completion queue. Results reach callers through per-call sinks serviced
//! by dedicated dispatcher tasks, so a slow consumer never stalls the loop.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::significant_drop_tightening)]

mod accessor;
mod config;
mod datastore;
mod error;
mod events;
mod shard;
mod store;
mod task;
mod throttle;
mod workers;

pub use accessor::*;
pub use config::*;
pub use datastore::*;
pub use error::*;
pub use shard::{AllShardsInfo, ShardInfo, ShardState};
pub use store::*;
pub use task::{OpType, ShardResult, Trace};
