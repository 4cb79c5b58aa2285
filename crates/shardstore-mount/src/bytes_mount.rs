//! In-memory mount.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use shardstore_core::Reader;
use url::Url;

use crate::{Mount, MountError, MountInfo, MountKind, MountResult, MountStat};

/// Mount over an in-memory byte buffer.
///
/// Fully featured and always present. Serializes the payload into the URL
/// (`mem:<hex>`), which keeps it restorable but limits it to small shards;
/// intended for tests, demos and fixtures.
#[derive(Debug, Clone)]
pub struct BytesMount {
    bytes: Bytes,
}

impl BytesMount {
    /// Create a mount over the given buffer.
    #[must_use]
    pub const fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// The mounted bytes.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Reconstruct a bytes mount from its URL form.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the payload is not valid hex.
    pub fn deserialize(url: &Url) -> MountResult<Self> {
        let payload = hex::decode(url.path())
            .map_err(|e| MountError::InvalidUrl(format!("bad mem payload: {e}")))?;
        Ok(Self::new(Bytes::from(payload)))
    }
}

#[async_trait]
impl Mount for BytesMount {
    fn info(&self) -> MountInfo {
        MountInfo {
            kind: MountKind::Local,
            access_sequential: true,
            access_seek: true,
            access_random: true,
        }
    }

    async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }

    async fn stat(&self) -> MountResult<MountStat> {
        Ok(MountStat {
            exists: true,
            size: self.bytes.len() as u64,
        })
    }

    fn serialize(&self) -> Url {
        let mut url = Url::parse("mem:").expect("static url");
        url.set_path(&hex::encode(&self.bytes));
        url
    }
}
