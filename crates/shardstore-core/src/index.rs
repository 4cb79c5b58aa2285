//! Full shard indices.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ContentId;

/// Mapping from content id to byte offset inside a shard archive.
///
/// A full index covers every block of the archive. It is built once during
/// shard initialization, persisted in the index repository, and loaded into
/// memory for every accessor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullIndex {
    offsets: HashMap<ContentId, u64>,
}

impl FullIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the offset of a block.
    ///
    /// Returns the previous offset if the id was already indexed.
    pub fn insert(&mut self, id: ContentId, offset: u64) -> Option<u64> {
        self.offsets.insert(id, offset)
    }

    /// Look up the byte offset of a block.
    #[must_use]
    pub fn offset(&self, id: &ContentId) -> Option<u64> {
        self.offsets.get(id).copied()
    }

    /// Whether the index contains the given id.
    #[must_use]
    pub fn contains(&self, id: &ContentId) -> bool {
        self.offsets.contains_key(id)
    }

    /// Number of indexed blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterate over `(id, offset)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContentId, u64)> {
        self.offsets.iter().map(|(id, off)| (id, *off))
    }
}

impl FromIterator<(ContentId, u64)> for FullIndex {
    fn from_iter<I: IntoIterator<Item = (ContentId, u64)>>(iter: I) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> ContentId {
        ContentId::from_bytes([b; 32])
    }

    #[test]
    fn insert_and_lookup() {
        let mut idx = FullIndex::new();
        assert!(idx.is_empty());
        assert_eq!(idx.insert(id(1), 0), None);
        assert_eq!(idx.insert(id(2), 512), None);
        assert_eq!(idx.insert(id(1), 1024), Some(0));
        assert_eq!(idx.offset(&id(1)), Some(1024));
        assert_eq!(idx.offset(&id(3)), None);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn serde_roundtrip() {
        let idx: FullIndex = [(id(9), 42u64), (id(7), 7168)].into_iter().collect();
        let json = serde_json::to_string(&idx).unwrap();
        let back: FullIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, idx);
    }
}
