//! Transient-backed mount upgrade.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use shardstore_core::Reader;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::{Mount, MountError, MountInfo, MountKind, MountResult, MountStat};

type RefetchFuture = Shared<BoxFuture<'static, Result<PathBuf, MountError>>>;

/// Bridges any mount up to full reader capabilities by keeping a local
/// transient copy.
///
/// If the underlying mount already supports seek and random access, the
/// upgrader passes fetches straight through and never touches disk.
/// Otherwise the first fetch materializes the underlying stream into a
/// uniquely named file under the engine's transients root, and subsequent
/// fetches open that file directly.
///
/// Concurrent fetches that find the transient missing share a single refetch:
/// the latch slot holds the in-flight refetch future, every waiter awaits the
/// same shared result (including failures), and the slot is cleared again
/// when the refetch finishes so a later fetch can start a fresh one.
pub struct Upgrader {
    underlying: Arc<dyn Mount>,
    root_dir: PathBuf,
    key: String,
    passthrough: bool,
    inner: Arc<Mutex<UpgraderInner>>,
}

#[derive(Default)]
struct UpgraderInner {
    transient: Option<PathBuf>,
    refetch: Option<RefetchFuture>,
}

impl Upgrader {
    /// Wrap `underlying`, keeping transients under `root_dir`.
    ///
    /// `initial` may point at a pre-existing local copy of the shard's bytes;
    /// if the file exists it is adopted as the current transient.
    ///
    /// # Errors
    /// Returns `NotSequential` if the underlying mount cannot be read front
    /// to back.
    pub fn upgrade(
        underlying: Arc<dyn Mount>,
        root_dir: impl Into<PathBuf>,
        key: &str,
        initial: Option<&Path>,
    ) -> MountResult<Self> {
        let info = underlying.info();
        if !info.access_sequential {
            return Err(MountError::NotSequential);
        }

        let mut upgrader = Self {
            underlying,
            root_dir: root_dir.into(),
            key: key.to_string(),
            passthrough: info.is_fully_featured(),
            inner: Arc::new(Mutex::new(UpgraderInner::default())),
        };

        if upgrader.passthrough {
            return Ok(upgrader);
        }

        if let Some(initial) = initial {
            if initial.is_file() {
                debug!(key = %key, path = %initial.display(), "adopting initial transient");
                upgrader.inner = Arc::new(Mutex::new(UpgraderInner {
                    transient: Some(initial.to_path_buf()),
                    refetch: None,
                }));
            }
        }

        Ok(upgrader)
    }

    /// The underlying (non-upgraded) mount.
    #[must_use]
    pub fn underlying(&self) -> &Arc<dyn Mount> {
        &self.underlying
    }

    /// Current transient path. `None` when passing through or when no
    /// transient has been materialized yet.
    #[must_use]
    pub fn transient_path(&self) -> Option<PathBuf> {
        self.inner.lock().transient.clone()
    }

    /// Delete the tracked transient, if it lies under the transients root.
    ///
    /// The tracked path is cleared before removal is attempted, so a
    /// transient deleted out-of-band does not wedge the upgrader.
    ///
    /// # Errors
    /// Returns the removal error, with internal state already cleared.
    pub async fn delete_transient(&self) -> MountResult<()> {
        let path = {
            let mut inner = self.inner.lock();
            match &inner.transient {
                None => return Ok(()),
                Some(path) if !path.starts_with(&self.root_dir) => {
                    warn!(
                        key = %self.key,
                        path = %path.display(),
                        "refusing to delete transient outside the transients root"
                    );
                    return Ok(());
                }
                Some(path) => {
                    let path = path.clone();
                    inner.transient = None;
                    path
                }
            }
        };

        debug!(key = %self.key, path = %path.display(), "deleting transient");
        tokio::fs::remove_file(&path).await.map_err(Into::into)
    }

    async fn open_transient(path: &Path) -> MountResult<Box<dyn Reader>> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| MountError::Fetch(format!("failed to open transient: {e}")))?;
        Ok(Box::new(file))
    }
}

#[async_trait]
impl Mount for Upgrader {
    /// After upgrade the mount is always fully featured.
    fn info(&self) -> MountInfo {
        MountInfo {
            kind: MountKind::Local,
            access_sequential: true,
            access_seek: true,
            access_random: true,
        }
    }

    async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
        if self.passthrough {
            return self.underlying.fetch().await;
        }

        // Decide under one lock acquisition: reuse the live transient, join
        // an in-flight refetch, or arm a new one.
        enum Plan {
            Open(PathBuf),
            Await(RefetchFuture),
        }

        let plan = {
            let mut inner = self.inner.lock();
            if let Some(path) = inner.transient.as_ref().filter(|p| p.is_file()) {
                Plan::Open(path.clone())
            } else if let Some(fut) = &inner.refetch {
                Plan::Await(fut.clone())
            } else {
                let fut = refetch(
                    Arc::clone(&self.underlying),
                    self.root_dir.clone(),
                    self.key.clone(),
                    Arc::clone(&self.inner),
                )
                .boxed()
                .shared();
                inner.refetch = Some(fut.clone());
                Plan::Await(fut)
            }
        };

        let path = match plan {
            Plan::Open(path) => path,
            Plan::Await(fut) => fut.await?,
        };
        Self::open_transient(&path).await
    }

    async fn stat(&self) -> MountResult<MountStat> {
        if let Some(path) = self.transient_path() {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                return Ok(MountStat {
                    exists: true,
                    size: meta.len(),
                });
            }
        }
        self.underlying.stat().await
    }

    fn serialize(&self) -> Url {
        self.underlying.serialize()
    }
}

/// Materialize the underlying mount into a fresh transient.
///
/// Runs at most once per latch arming; the caller holds the only reference
/// until it is stored in the latch slot. Clears the slot on both success and
/// failure so the latch is rearmed for the next miss.
async fn refetch(
    underlying: Arc<dyn Mount>,
    root_dir: PathBuf,
    key: String,
    inner: Arc<Mutex<UpgraderInner>>,
) -> Result<PathBuf, MountError> {
    let result = do_refetch(&underlying, &root_dir, &key, &inner).await;

    let mut guard = inner.lock();
    guard.refetch = None;
    if let Ok(path) = &result {
        guard.transient = Some(path.clone());
    }
    drop(guard);

    result
}

async fn do_refetch(
    underlying: &Arc<dyn Mount>,
    root_dir: &Path,
    key: &str,
    inner: &Arc<Mutex<UpgraderInner>>,
) -> Result<PathBuf, MountError> {
    // Drop the stale copy first so a failed refetch cannot leave a
    // half-written file masquerading as a good transient.
    let stale = inner.lock().transient.clone();
    if let Some(stale) = stale {
        debug!(key, path = %stale.display(), "removing stale transient");
        let _ = tokio::fs::remove_file(&stale).await;
    }

    let temp = tempfile::Builder::new()
        .prefix(&format!("transient-{key}-"))
        .tempfile_in(root_dir)
        .map_err(|e| MountError::Io(format!("failed to create transient file: {e}")))?;
    let (file, path) = temp
        .keep()
        .map_err(|e| MountError::Io(format!("failed to keep transient file: {e}")))?;

    let stat = underlying.stat().await?;
    if !stat.exists {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(MountError::NotFound);
    }

    let mut from = underlying.fetch().await?;
    let mut to = tokio::fs::File::from_std(file);
    if let Err(e) = tokio::io::copy(&mut from, &mut to).await {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(MountError::Fetch(format!(
            "failed to copy mount into transient: {e}"
        )));
    }
    to.flush()
        .await
        .map_err(|e| MountError::Io(e.to_string()))?;

    debug!(key, path = %path.display(), size = stat.size, "materialized transient");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use shardstore_core::SequentialReader;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::BytesMount;

    /// Sequential-only mount that counts fetches.
    struct CountingMount {
        inner: BytesMount,
        fetches: AtomicUsize,
    }

    impl CountingMount {
        fn new(bytes: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                inner: BytesMount::new(Bytes::from_static(bytes)),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Mount for CountingMount {
        fn info(&self) -> MountInfo {
            MountInfo {
                kind: MountKind::Remote,
                access_sequential: true,
                access_seek: false,
                access_random: false,
            }
        }

        async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let reader = self.inner.fetch().await?;
            Ok(Box::new(SequentialReader::new(reader)))
        }

        async fn stat(&self) -> MountResult<MountStat> {
            self.inner.stat().await
        }

        fn serialize(&self) -> Url {
            self.inner.serialize()
        }
    }

    #[tokio::test]
    async fn passthrough_skips_transient() {
        let dir = tempfile::tempdir().unwrap();
        let mount: Arc<dyn Mount> = Arc::new(BytesMount::new(Bytes::from_static(b"full")));
        let upgrader = Upgrader::upgrade(mount, dir.path(), "k", None).unwrap();

        let mut reader = upgrader.fetch().await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"full");
        assert_eq!(upgrader.transient_path(), None);
    }

    #[tokio::test]
    async fn sequential_mount_materializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let counting = CountingMount::new(b"sequential bytes");
        let upgrader =
            Upgrader::upgrade(Arc::clone(&counting) as Arc<dyn Mount>, dir.path(), "k", None)
                .unwrap();

        for _ in 0..3 {
            let mut reader = upgrader.fetch().await.unwrap();
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"sequential bytes");
        }

        assert_eq!(counting.fetches.load(Ordering::SeqCst), 1);
        let transient = upgrader.transient_path().unwrap();
        assert!(transient.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let counting = CountingMount::new(b"deduped");
        let upgrader = Arc::new(
            Upgrader::upgrade(Arc::clone(&counting) as Arc<dyn Mount>, dir.path(), "k", None)
                .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let upgrader = Arc::clone(&upgrader);
            handles.push(tokio::spawn(async move {
                let mut reader = upgrader.fetch().await.unwrap();
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await.unwrap();
                buf
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), b"deduped");
        }

        assert_eq!(counting.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deleted_transient_triggers_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let counting = CountingMount::new(b"again");
        let upgrader =
            Upgrader::upgrade(Arc::clone(&counting) as Arc<dyn Mount>, dir.path(), "k", None)
                .unwrap();

        let _ = upgrader.fetch().await.unwrap();
        let first = upgrader.transient_path().unwrap();
        tokio::fs::remove_file(&first).await.unwrap();

        let _ = upgrader.fetch().await.unwrap();
        let second = upgrader.transient_path().unwrap();
        assert_ne!(first, second);
        assert_eq!(counting.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delete_transient_clears_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let counting = CountingMount::new(b"gc me");
        let upgrader =
            Upgrader::upgrade(Arc::clone(&counting) as Arc<dyn Mount>, dir.path(), "k", None)
                .unwrap();

        let _ = upgrader.fetch().await.unwrap();
        let path = upgrader.transient_path().unwrap();
        assert!(path.is_file());

        upgrader.delete_transient().await.unwrap();
        assert!(!path.exists());
        assert_eq!(upgrader.transient_path(), None);

        // Deleting again is a no-op.
        upgrader.delete_transient().await.unwrap();
    }

    #[tokio::test]
    async fn initial_transient_is_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let initial = dir.path().join("seeded");
        tokio::fs::write(&initial, b"seeded bytes").await.unwrap();

        let counting = CountingMount::new(b"unused");
        let upgrader = Upgrader::upgrade(
            Arc::clone(&counting) as Arc<dyn Mount>,
            dir.path(),
            "k",
            Some(&initial),
        )
        .unwrap();

        let mut reader = upgrader.fetch().await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"seeded bytes");
        assert_eq!(counting.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refetch_failure_reaches_all_waiters_and_rearms() {
        struct FailingMount {
            attempts: AtomicUsize,
        }

        #[async_trait]
        impl Mount for FailingMount {
            fn info(&self) -> MountInfo {
                MountInfo {
                    kind: MountKind::Remote,
                    access_sequential: true,
                    access_seek: false,
                    access_random: false,
                }
            }

            async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                // Fail slowly, so every concurrent waiter joins this refetch
                // instead of arming a fresh one after it settles.
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                Err(MountError::Fetch("no route to host".into()))
            }

            async fn stat(&self) -> MountResult<MountStat> {
                Ok(MountStat {
                    exists: true,
                    size: 0,
                })
            }

            fn serialize(&self) -> Url {
                Url::parse("mem:").unwrap()
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let failing = Arc::new(FailingMount {
            attempts: AtomicUsize::new(0),
        });
        let upgrader = Arc::new(
            Upgrader::upgrade(Arc::clone(&failing) as Arc<dyn Mount>, dir.path(), "k", None)
                .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let upgrader = Arc::clone(&upgrader);
            handles.push(tokio::spawn(async move { upgrader.fetch().await.err() }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap();
            assert!(err.to_string().contains("no route"), "{err}");
        }
        assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);

        // The latch rearmed: the next fetch attempts a fresh refetch.
        assert!(upgrader.fetch().await.is_err());
        assert_eq!(failing.attempts.load(Ordering::SeqCst), 2);
    }
}
