//! Content identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content address of a single block inside a shard archive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(#[serde(with = "hex::serde")] [u8; 32]);

impl ContentId {
    /// Size of a content id in bytes.
    pub const LEN: usize = 32;

    /// Construct a `ContentId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct a `ContentId` from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidContentId` if the slice is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidContentId> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| InvalidContentId { len: bytes.len() })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentId").field(&self.to_string()).finish()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ContentId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Error constructing a [`ContentId`] from a slice of the wrong length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid content id length: {len} bytes, expected 32")]
pub struct InvalidContentId {
    /// Length of the rejected slice.
    pub len: usize,
}
