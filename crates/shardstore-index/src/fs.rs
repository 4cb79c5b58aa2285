//! Filesystem index repository.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shardstore_core::{FullIndex, ShardKey};
use tracing::debug;

use crate::{IndexError, IndexRepo, IndexStat};

const INDEX_SUFFIX: &str = ".full.idx";

/// Index repository storing one JSON file per shard under a root directory.
///
/// File names are the hex encoding of the shard key, so arbitrary printable
/// keys cannot escape the root. Writes go through a temp file and a rename,
/// so a crash mid-write never leaves a truncated index behind.
pub struct FsIndexRepo {
    dir: PathBuf,
}

impl FsIndexRepo {
    /// Open a repository rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| IndexError::Io(format!("failed to create index dir: {e}")))?;
        Ok(Self { dir })
    }

    fn index_path(&self, key: &ShardKey) -> PathBuf {
        self.dir
            .join(format!("{}{INDEX_SUFFIX}", hex::encode(key.as_str())))
    }

    /// Root directory of the repository.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl IndexRepo for FsIndexRepo {
    async fn add_full_index(&self, key: &ShardKey, index: &FullIndex) -> Result<(), IndexError> {
        let payload =
            serde_json::to_vec(index).map_err(|e| IndexError::Serialization(e.to_string()))?;

        let temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| IndexError::Io(format!("failed to create temp index file: {e}")))?;
        tokio::fs::write(temp.path(), &payload).await?;
        temp.persist(self.index_path(key))
            .map_err(|e| IndexError::Io(format!("failed to persist index file: {e}")))?;

        debug!(key = %key, entries = index.len(), "stored full index");
        Ok(())
    }

    async fn get_full_index(&self, key: &ShardKey) -> Result<FullIndex, IndexError> {
        let path = self.index_path(key);
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::NotFound(key.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&payload).map_err(|e| IndexError::Serialization(e.to_string()))
    }

    async fn stat_full_index(&self, key: &ShardKey) -> Result<IndexStat, IndexError> {
        match tokio::fs::metadata(self.index_path(key)).await {
            Ok(meta) => Ok(IndexStat {
                exists: true,
                size: meta.len(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IndexStat {
                exists: false,
                size: 0,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_full_index(&self, key: &ShardKey) -> Result<bool, IndexError> {
        match tokio::fs::remove_file(self.index_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use shardstore_core::ContentId;

    use super::*;

    #[tokio::test]
    async fn roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsIndexRepo::open(dir.path()).unwrap();
        let key = ShardKey::new("shard/with/slashes");

        let index: FullIndex = [
            (ContentId::from_bytes([1; 32]), 0u64),
            (ContentId::from_bytes([2; 32]), 4096),
        ]
        .into_iter()
        .collect();

        repo.add_full_index(&key, &index).await.unwrap();
        let stat = repo.stat_full_index(&key).await.unwrap();
        assert!(stat.exists);
        assert!(stat.size > 0);
        assert_eq!(repo.get_full_index(&key).await.unwrap(), index);

        assert!(repo.drop_full_index(&key).await.unwrap());
        assert!(!repo.stat_full_index(&key).await.unwrap().exists);
        assert!(matches!(
            repo.get_full_index(&key).await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn overwrite_replaces_index() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsIndexRepo::open(dir.path()).unwrap();
        let key = ShardKey::new("k");

        let first: FullIndex = [(ContentId::from_bytes([1; 32]), 0u64)]
            .into_iter()
            .collect();
        let second: FullIndex = [(ContentId::from_bytes([2; 32]), 8u64)]
            .into_iter()
            .collect();

        repo.add_full_index(&key, &first).await.unwrap();
        repo.add_full_index(&key, &second).await.unwrap();
        assert_eq!(repo.get_full_index(&key).await.unwrap(), second);
    }
}
