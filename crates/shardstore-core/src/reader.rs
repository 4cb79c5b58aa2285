//! The read handle shared between mounts, archive codecs and accessors.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// A read handle over shard bytes.
///
/// Every fetch hands one of these out. Seeking is part of the contract, but
/// sequential-only sources are allowed to return
/// [`io::ErrorKind::Unsupported`] from seek operations; callers consult the
/// mount's capability info before seeking.
pub trait Reader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> Reader for T {}

/// Adapter giving a sequential-only source the [`Reader`] shape.
///
/// Reads forward to the inner source; any seek fails with
/// [`io::ErrorKind::Unsupported`].
#[derive(Debug)]
pub struct SequentialReader<R> {
    inner: R,
}

impl<R: AsyncRead + Send + Unpin> SequentialReader<R> {
    /// Wrap a sequential source.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: AsyncRead + Send + Unpin> AsyncRead for SequentialReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R: AsyncRead + Send + Unpin> AsyncSeek for SequentialReader<R> {
    fn start_seek(self: Pin<&mut Self>, _position: io::SeekFrom) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "seek on a sequential-only reader",
        ))
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    #[tokio::test]
    async fn sequential_reader_reads_but_refuses_seek() {
        let mut r = SequentialReader::new(std::io::Cursor::new(b"hello".to_vec()));

        let err = r.seek(io::SeekFrom::Start(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }
}
