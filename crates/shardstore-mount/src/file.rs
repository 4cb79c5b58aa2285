//! Local file mount.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shardstore_core::Reader;
use url::Url;

use crate::{Mount, MountError, MountInfo, MountKind, MountResult, MountStat};

/// Mount backed by a file on the local filesystem.
///
/// Fully featured: file handles seek and read positionally, so the upgrader
/// passes this mount through without materializing a transient.
#[derive(Debug, Clone)]
pub struct FileMount {
    path: PathBuf,
}

impl FileMount {
    /// Create a mount for the given path. The file need not exist yet;
    /// existence is checked by `stat` and `fetch`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reconstruct a file mount from its URL form.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the URL carries no usable path.
    pub fn deserialize(url: &Url) -> MountResult<Self> {
        let path = url
            .to_file_path()
            .unwrap_or_else(|()| PathBuf::from(url.path()));
        if path.as_os_str().is_empty() {
            return Err(MountError::InvalidUrl(format!("no path in {url}")));
        }
        Ok(Self::new(path))
    }
}

#[async_trait]
impl Mount for FileMount {
    fn info(&self) -> MountInfo {
        MountInfo {
            kind: MountKind::Local,
            access_sequential: true,
            access_seek: true,
            access_random: true,
        }
    }

    async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| MountError::Fetch(format!("{}: {e}", self.path.display())))?;
        Ok(Box::new(file))
    }

    async fn stat(&self) -> MountResult<MountStat> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(MountStat {
                exists: true,
                size: meta.len(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MountStat {
                exists: false,
                size: 0,
            }),
            Err(e) => Err(MountError::Stat(e.to_string())),
        }
    }

    fn serialize(&self) -> Url {
        Url::from_file_path(&self.path).unwrap_or_else(|()| {
            // Relative paths have no canonical file URL; keep them opaque.
            let mut url = Url::parse("file:/").expect("static url");
            url.set_path(&self.path.to_string_lossy());
            url
        })
    }
}
