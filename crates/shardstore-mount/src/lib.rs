//! Mounts: the byte sources that back shards.
//!
//! A [`Mount`] describes where a shard's archive lives (local file, HTTP
//! endpoint, in-memory buffer) and what access patterns the source supports.
//! The [`Upgrader`] bridges capability gaps by materializing a local
//! *transient* copy, so upper layers always see a seekable, random-access
//! reader. The [`MountRegistry`] reconstructs mounts from their serialized
//! URL form when shard state is restored from disk.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod bytes_mount;
mod error;
mod file;
mod http;
mod mount;
mod registry;
mod upgrader;

pub use bytes_mount::*;
pub use error::*;
pub use file::*;
pub use http::*;
pub use mount::*;
pub use registry::*;
pub use upgrader::*;
