//! HTTP mount.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use shardstore_core::{Reader, SequentialReader};
use tokio_util::io::StreamReader;
use url::Url;

use crate::{Mount, MountError, MountInfo, MountKind, MountResult, MountStat};

/// Mount over an HTTP(S) endpoint.
///
/// Sequential-only: the response body streams front to back, so the upgrader
/// materializes a transient before anything above it can seek.
#[derive(Debug, Clone)]
pub struct HttpMount {
    url: Url,
    client: reqwest::Client,
}

impl HttpMount {
    /// Create a mount for the given endpoint.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    /// The endpoint URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Mount for HttpMount {
    fn info(&self) -> MountInfo {
        MountInfo {
            kind: MountKind::Remote,
            access_sequential: true,
            access_seek: false,
            access_random: false,
        }
    }

    async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| MountError::Fetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MountError::Fetch(format!(
                "GET {} returned {}",
                self.url,
                resp.status()
            )));
        }

        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        Ok(Box::new(SequentialReader::new(StreamReader::new(stream))))
    }

    async fn stat(&self) -> MountResult<MountStat> {
        let resp = self
            .client
            .head(self.url.clone())
            .send()
            .await
            .map_err(|e| MountError::Stat(e.to_string()))?;
        Ok(MountStat {
            exists: resp.status().is_success(),
            size: resp.content_length().unwrap_or(0),
        })
    }

    fn serialize(&self) -> Url {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_mount_is_sequential_only() {
        let mount = HttpMount::new(Url::parse("http://example.com/shard.data").unwrap());
        let info = mount.info();
        assert_eq!(info.kind, MountKind::Remote);
        assert!(info.access_sequential);
        assert!(!info.is_fully_featured());
    }
}
