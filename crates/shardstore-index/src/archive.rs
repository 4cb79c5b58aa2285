//! The archive codec seam.

use std::io::SeekFrom;

use async_trait::async_trait;
use shardstore_core::{ContentId, FullIndex, Reader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::ArchiveError;

/// Codec for a self-describing archive of content blocks.
///
/// The engine is format-agnostic: it indexes an archive stream once during
/// initialization and later reads blocks back through the offsets the index
/// recorded. Implementations may recover an embedded index instead of
/// scanning when the format carries one.
#[async_trait]
pub trait ArchiveFormat: Send + Sync {
    /// Read the archive's embedded index, or generate one by scanning.
    ///
    /// The reader is positioned at the start of the archive.
    ///
    /// # Errors
    /// Returns an error if the stream is not a well-formed archive.
    async fn read_or_generate_index(
        &self,
        reader: &mut (dyn Reader),
    ) -> Result<FullIndex, ArchiveError>;

    /// Read the block whose record starts at `offset`.
    ///
    /// # Errors
    /// Returns an error if the offset does not point at a well-formed record.
    async fn read_block_at(
        &self,
        reader: &mut (dyn Reader),
        offset: u64,
    ) -> Result<(ContentId, Vec<u8>), ArchiveError>;
}

/// Minimal archive codec: a flat sequence of
/// `[32-byte content id][u32-be length][payload]` records.
///
/// Carries no embedded index, so indexing always scans the stream. Intended
/// for tests, fixtures and demos.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainArchive;

const HEADER_LEN: u64 = ContentId::LEN as u64 + 4;

impl PlainArchive {
    /// Encode one record for inclusion in an archive.
    ///
    /// # Errors
    /// Returns `InvalidRecord` if the payload exceeds `u32::MAX` bytes.
    pub fn encode_block(id: &ContentId, payload: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        let len = u32::try_from(payload.len()).map_err(|_| ArchiveError::InvalidRecord {
            offset: 0,
            reason: "payload exceeds u32 length".into(),
        })?;

        let mut record = Vec::with_capacity(ContentId::LEN + 4 + payload.len());
        record.extend_from_slice(id.as_bytes());
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(payload);
        Ok(record)
    }
}

#[async_trait]
impl ArchiveFormat for PlainArchive {
    async fn read_or_generate_index(
        &self,
        reader: &mut (dyn Reader),
    ) -> Result<FullIndex, ArchiveError> {
        let mut index = FullIndex::new();
        let mut pos: u64 = 0;

        loop {
            let mut id_buf = [0u8; ContentId::LEN];
            let n = read_up_to(&mut *reader, &mut id_buf).await?;
            if n == 0 {
                return Ok(index);
            }
            if n < id_buf.len() {
                return Err(ArchiveError::Truncated { offset: pos });
            }

            let mut len_buf = [0u8; 4];
            if read_up_to(&mut *reader, &mut len_buf).await? < len_buf.len() {
                return Err(ArchiveError::Truncated { offset: pos });
            }
            let len = u64::from(u32::from_be_bytes(len_buf));

            index.insert(ContentId::from_bytes(id_buf), pos);

            let skipped =
                tokio::io::copy(&mut (&mut *reader).take(len), &mut tokio::io::sink()).await?;
            if skipped < len {
                return Err(ArchiveError::Truncated { offset: pos });
            }
            pos += HEADER_LEN + len;
        }
    }

    async fn read_block_at(
        &self,
        reader: &mut (dyn Reader),
        offset: u64,
    ) -> Result<(ContentId, Vec<u8>), ArchiveError> {
        reader.seek(SeekFrom::Start(offset)).await?;

        let mut id_buf = [0u8; ContentId::LEN];
        reader
            .read_exact(&mut id_buf)
            .await
            .map_err(|_| ArchiveError::Truncated { offset })?;

        let mut len_buf = [0u8; 4];
        reader
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| ArchiveError::Truncated { offset })?;
        let len = u32::from_be_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|_| ArchiveError::Truncated { offset })?;

        Ok((ContentId::from_bytes(id_buf), payload))
    }
}

/// Read until the buffer is full or the stream ends; returns bytes read.
async fn read_up_to<R: AsyncRead + Send + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, ArchiveError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn id(b: u8) -> ContentId {
        ContentId::from_bytes([b; 32])
    }

    fn archive(blocks: &[(u8, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (b, payload) in blocks {
            out.extend(PlainArchive::encode_block(&id(*b), payload).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn scan_indexes_every_block() {
        let bytes = archive(&[(1, b"first block"), (2, b""), (3, b"third")]);
        let mut reader = Cursor::new(bytes);

        let index = PlainArchive
            .read_or_generate_index(&mut reader)
            .await
            .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.offset(&id(1)), Some(0));
        assert_eq!(index.offset(&id(2)), Some(36 + 11));
        assert_eq!(index.offset(&id(3)), Some(36 + 11 + 36));
    }

    #[tokio::test]
    async fn read_block_roundtrip() {
        let bytes = archive(&[(1, b"first block"), (2, b"second block")]);
        let mut reader = Cursor::new(bytes);

        let index = PlainArchive
            .read_or_generate_index(&mut reader)
            .await
            .unwrap();
        let offset = index.offset(&id(2)).unwrap();

        let (got_id, payload) = PlainArchive
            .read_block_at(&mut reader, offset)
            .await
            .unwrap();
        assert_eq!(got_id, id(2));
        assert_eq!(payload, b"second block");
    }

    #[tokio::test]
    async fn empty_archive_yields_empty_index() {
        let mut reader = Cursor::new(Vec::new());
        let index = PlainArchive
            .read_or_generate_index(&mut reader)
            .await
            .unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn truncated_archive_is_rejected() {
        let mut bytes = archive(&[(1, b"whole")]);
        bytes.truncate(bytes.len() - 2);
        let mut reader = Cursor::new(bytes);

        assert!(matches!(
            PlainArchive.read_or_generate_index(&mut reader).await,
            Err(ArchiveError::Truncated { offset: 0 })
        ));
    }
}
