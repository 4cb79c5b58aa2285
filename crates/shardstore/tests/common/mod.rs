//! Shared fixtures for the engine integration tests.

// Not every test binary exercises every fixture.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use shardstore::{ShardInfo, ShardResult, ShardState, ShardStore};
use shardstore_core::{ContentId, Reader, SequentialReader, ShardKey};
use shardstore_index::PlainArchive;
use shardstore_mount::{BytesMount, Mount, MountInfo, MountKind, MountResult, MountStat};
use tokio::sync::mpsc;
use url::Url;

pub fn cid(b: u8) -> ContentId {
    ContentId::from_bytes([b; 32])
}

/// Build a plain archive out of `(id byte, payload)` pairs.
pub fn archive_bytes(blocks: &[(u8, &[u8])]) -> Bytes {
    let mut out = Vec::new();
    for (b, payload) in blocks {
        out.extend(PlainArchive::encode_block(&cid(*b), payload).unwrap());
    }
    Bytes::from(out)
}

/// An archive of roughly 4 KiB across a handful of blocks.
pub fn small_archive() -> Bytes {
    let payload = vec![0x5a_u8; 1024];
    archive_bytes(&[
        (1, payload.as_slice()),
        (2, payload.as_slice()),
        (3, payload.as_slice()),
        (4, payload.as_slice()),
    ])
}

/// Tracks how many fetches overlap.
#[derive(Default)]
pub struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Sequential-only mount over an in-memory archive.
///
/// Counts fetches, optionally dwells in `fetch` so overlap is observable,
/// and optionally reports to a [`ConcurrencyProbe`].
pub struct SeqMount {
    inner: BytesMount,
    fetches: AtomicUsize,
    delay: Option<Duration>,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl SeqMount {
    pub fn new(payload: Bytes) -> Self {
        Self {
            inner: BytesMount::new(payload),
            fetches: AtomicUsize::new(0),
            delay: None,
            probe: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mount for SeqMount {
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
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reader = self.inner.fetch().await;
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        Ok(Box::new(SequentialReader::new(reader?)))
    }

    async fn stat(&self) -> MountResult<MountStat> {
        self.inner.stat().await
    }

    fn serialize(&self) -> Url {
        self.inner.serialize()
    }
}

/// Mount whose fetch always fails.
pub struct FailingMount {
    message: String,
}

impl FailingMount {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
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
        Err(shardstore_mount::MountError::Fetch(self.message.clone()))
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

/// Mount that fails its first `fail_count` fetches, then serves the payload.
pub struct FlakyMount {
    inner: SeqMount,
    remaining_failures: AtomicUsize,
}

impl FlakyMount {
    pub fn new(payload: Bytes, fail_count: usize) -> Self {
        Self {
            inner: SeqMount::new(payload),
            remaining_failures: AtomicUsize::new(fail_count),
        }
    }
}

#[async_trait]
impl Mount for FlakyMount {
    fn info(&self) -> MountInfo {
        self.inner.info()
    }

    async fn fetch(&self) -> MountResult<Box<dyn Reader>> {
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(shardstore_mount::MountError::Fetch(
                "temporary outage".to_string(),
            ));
        }
        self.inner.fetch().await
    }

    async fn stat(&self) -> MountResult<MountStat> {
        self.inner.stat().await
    }

    fn serialize(&self) -> Url {
        self.inner.serialize()
    }
}

/// Receive one result with a generous timeout.
pub async fn recv_result(rx: &mut mpsc::Receiver<ShardResult>) -> ShardResult {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for shard result")
        .expect("result channel closed")
}

/// Poll shard info until the predicate holds.
pub async fn wait_for<F: Fn(&ShardInfo) -> bool>(
    store: &ShardStore,
    key: &ShardKey,
    what: &str,
    pred: F,
) -> ShardInfo {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(info) = store.get_shard_info(key) {
            if pred(&info) {
                return info;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what} on {key}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(store: &ShardStore, key: &ShardKey, state: ShardState) -> ShardInfo {
    wait_for(store, key, state.as_str(), |info| info.state == state).await
}
