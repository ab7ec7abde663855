//! Streaming ZIP container: members are written in order through a plain
//! `Write` sink, with no seeking, so the archive can be sent while it is built.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::services::conversion::{ChunkStream, ConversionError};
use crate::services::source::StoredSource;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to convert {name}: {source}")]
    Member {
        name: String,
        #[source]
        source: ConversionError,
    },

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// The receiving side went away; nothing more can be delivered.
    pub fn is_disconnect(&self) -> bool {
        let io_error = match self {
            Self::Io(e) => Some(e),
            Self::Zip(zip::result::ZipError::Io(e)) => Some(e),
            _ => None,
        };
        io_error.is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    }
}

/// One named member. The source backing it is released once the member has
/// been written (or the archive is abandoned). Failures are reported under
/// the source's declared name, or the member name when there is no source.
pub struct ArchiveMember {
    pub name: String,
    pub chunks: ChunkStream,
    pub source: Option<StoredSource>,
}

/// Write every member, in order, as a deflated entry and finish the archive.
pub fn write_archive<W, I>(sink: W, members: I) -> Result<W, ArchiveError>
where
    W: Write,
    I: IntoIterator<Item = ArchiveMember>,
{
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new_stream(sink);

    for member in members {
        let ArchiveMember {
            name,
            chunks,
            source,
        } = member;

        zip.start_file(name.as_str(), options)?;
        let mut written = 0u64;
        for chunk in chunks {
            let chunk = chunk.map_err(|e| ArchiveError::Member {
                name: source
                    .as_ref()
                    .map(|s| s.declared_name().to_string())
                    .unwrap_or_else(|| name.clone()),
                source: e,
            })?;
            zip.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        tracing::debug!(member = %name, bytes = written, "Archive member written");
        drop(source);
    }

    let stream = zip.finish()?;
    let mut sink = stream.into_inner();
    sink.flush()?;
    Ok(sink)
}

/// `Write` adapter that forwards fixed-size chunks over a bounded channel.
///
/// `blocking_send` parks the writing thread while the channel is full, so a
/// slow reader throttles the producer. Once the receiver is gone, or the
/// stream has been aborted, the first write fails with `BrokenPipe` and
/// later writes are discarded.
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buffer: Vec<u8>,
    chunk_bytes: usize,
    closed: Arc<AtomicBool>,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>, chunk_bytes: usize) -> Self {
        let chunk_bytes = chunk_bytes.max(1);
        Self {
            tx,
            buffer: Vec::with_capacity(chunk_bytes),
            chunk_bytes,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_bytes));
        if self.tx.blocking_send(Ok(Bytes::from(chunk))).is_err() {
            self.closed.store(true, Ordering::SeqCst);
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response receiver dropped",
            ));
        }
        Ok(())
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(buf.len());
        }
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= self.chunk_bytes {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.send_buffer()
    }
}

/// Ends a [`ChannelWriter`] stream early. Once closed, anything written,
/// including the archive trailer, is discarded so the receiver never sees a
/// well-formed archive with a missing member.
#[derive(Clone)]
pub struct AbortHandle {
    tx: mpsc::Sender<io::Result<Bytes>>,
    closed: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Stop forwarding writes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Close the stream and deliver `reason` as its final item.
    pub fn fail(&self, reason: String) {
        self.close();
        let _ = self.tx.blocking_send(Err(io::Error::other(reason)));
    }
}
