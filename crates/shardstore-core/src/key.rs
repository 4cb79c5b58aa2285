//! Shard keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, printable identifier of a shard.
///
/// Keys are opaque to the engine: equality and display are the only
/// operations relied upon. They survive restarts unchanged, so they are also
/// the persistence key for shard records and indices.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(String);

impl ShardKey {
    /// Construct a key from any printable string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShardKey").field(&self.0).finish()
    }
}

impl From<&str> for ShardKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ShardKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_verbatim() {
        let k = ShardKey::new("baga6ea4seaq");
        assert_eq!(k.to_string(), "baga6ea4seaq");
        assert_eq!(k.as_str(), "baga6ea4seaq");
    }

    #[test]
    fn serde_is_transparent() {
        let k = ShardKey::new("k1");
        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, "\"k1\"");
        let back: ShardKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, k);
    }
}
