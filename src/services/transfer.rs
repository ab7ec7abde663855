//! Chunked, bounded byte copies shared by every ingestion and output path.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("chunk size must be positive")]
    InvalidChunkSize,

    #[error("transfer exceeded the {limit} byte limit")]
    LimitExceeded { limit: u64 },

    #[error("read failed: {0}")]
    Read(io::Error),

    #[error("write failed: {0}")]
    Write(io::Error),
}

/// Copy `reader` into `writer` one chunk at a time, returning the byte count.
pub async fn copy<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    copy_bounded(reader, writer, chunk_size, None).await
}

/// Like [`copy`], but fails with `LimitExceeded` as soon as the running total
/// passes `max_bytes`. The offending chunk is never written.
pub async fn copy_bounded<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    max_bytes: Option<u64>,
) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }

    let mut buffer = vec![0u8; chunk_size];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buffer).await.map_err(TransferError::Read)?;
        if n == 0 {
            break;
        }
        total += n as u64;

        if let Some(limit) = max_bytes {
            if total > limit {
                return Err(TransferError::LimitExceeded { limit });
            }
        }

        writer
            .write_all(&buffer[..n])
            .await
            .map_err(TransferError::Write)?;
    }

    writer.flush().await.map_err(TransferError::Write)?;
    Ok(total)
}

/// Lazily read the file at `path` in chunks of `chunk_size` bytes.
///
/// Only one chunk is held in memory at a time. The iterator is not
/// resumable: call again to start over.
pub fn chunks_of(path: &Path, chunk_size: usize) -> Result<FileChunks, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }
    let file = File::open(path).map_err(TransferError::Read)?;
    Ok(FileChunks {
        file,
        chunk_size,
        finished: false,
    })
}

pub struct FileChunks {
    file: File,
    chunk_size: usize,
    finished: bool,
}

impl Iterator for FileChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buffer = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        if filled < buffer.len() {
            self.finished = true;
        }
        if filled == 0 {
            return None;
        }
        buffer.truncate(filled);
        Some(Ok(Bytes::from(buffer)))
    }
}
