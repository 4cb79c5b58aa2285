//! The key-value datastore consumed for shard state persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Errors for datastore operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("datastore I/O error: {0}")]
    Io(String),
}

/// Flat key-value store for shard records.
///
/// The engine performs all operations under a namespace prefix, one record
/// per shard. Concurrency control is the implementation's concern; the
/// engine only ever writes from the event loop.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    ///
    /// # Errors
    /// Returns an error if the lookup fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatastoreError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError>;

    /// Remove the value stored under `key`. Missing keys are not an error.
    ///
    /// # Errors
    /// Returns an error if the removal fails.
    async fn delete(&self, key: &str) -> Result<(), DatastoreError>;

    /// List all `(key, value)` pairs whose key starts with `prefix`.
    ///
    /// # Errors
    /// Returns an error if the scan fails.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, DatastoreError>;

    /// Flush pending writes to stable storage.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    async fn sync(&self) -> Result<(), DatastoreError>;
}

/// In-memory datastore.
///
/// The default when no datastore is configured; shard state then does not
/// survive restarts. Also handy for tests, where a shared instance stands in
/// for a persistent store across engine rebuilds.
#[derive(Default)]
pub struct MemDatastore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemDatastore {
    /// Create an empty datastore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemDatastore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatastoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, DatastoreError> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn sync(&self) -> Result<(), DatastoreError> {
        Ok(())
    }
}

/// Datastore view that prefixes every key with a namespace.
pub(crate) struct NamespacedDatastore {
    inner: Arc<dyn Datastore>,
    prefix: String,
}

impl NamespacedDatastore {
    pub(crate) fn new(inner: Arc<dyn Datastore>, namespace: &str) -> Self {
        Self {
            inner,
            prefix: format!("{namespace}/"),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    pub(crate) async fn put(&self, key: &str, value: &[u8]) -> Result<(), DatastoreError> {
        self.inner.put(&self.scoped(key), value).await
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        self.inner.delete(&self.scoped(key)).await
    }

    /// List all records in the namespace, keys returned unprefixed.
    pub(crate) async fn list_all(&self) -> Result<Vec<(String, Vec<u8>)>, DatastoreError> {
        Ok(self
            .inner
            .list(&self.prefix)
            .await?
            .into_iter()
            .map(|(k, v)| (k[self.prefix.len()..].to_string(), v))
            .collect())
    }

    pub(crate) async fn sync(&self) -> Result<(), DatastoreError> {
        self.inner.sync().await
    }
}
