//! Drives conversion for a batch and wires the output into a response body.
//!
//! Every source is converted on a blocking thread. Before any byte is
//! committed the first chunk is pulled (prefetch-and-verify) so conversion
//! errors surface as structured errors. After that a pump thread forwards
//! chunks over a bounded channel: a slow client parks the pump, a gone
//! client ends it, and each source is released when its pump finishes.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use futures::future::join_all;
use tokio::sync::mpsc;

use crate::services::archive::{ArchiveMember, ChannelWriter, write_archive};
use crate::services::conversion::{ChunkStream, ConversionEngine, ConversionError, ConversionSpec};
use crate::services::error::PipelineError;
use crate::services::source::{SourceBatch, StoredSource};
use crate::utils::filename::unique_member_names;

pub const ARCHIVE_NAME: &str = "converted_files.zip";
pub const ARCHIVE_MEDIA_TYPE: &str = "application/zip";

/// Chunks buffered between the producer thread and the response body.
const CHANNEL_DEPTH: usize = 4;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A response ready to stream.
pub struct AssembledOutput {
    pub file_name: String,
    pub media_type: &'static str,
    pub body: ByteStream,
}

/// A converted source whose first chunk has already been produced.
struct Prefetched {
    // Field order matters: the chunk stream drops before the source file
    rest: ChunkStream,
    first: Option<Bytes>,
    output_name: String,
    source: StoredSource,
}

#[derive(Debug, Clone)]
pub struct ResultAssembler {
    chunk_bytes: usize,
}

impl ResultAssembler {
    pub fn new(chunk_bytes: usize) -> Self {
        Self { chunk_bytes }
    }

    /// Convert `batch` with `spec`: one source streams directly, several
    /// become members of a streamed ZIP archive in batch order.
    ///
    /// If any member fails to prefetch, every source of the batch is released
    /// before the error is returned and no output is produced.
    pub async fn assemble(
        &self,
        batch: SourceBatch,
        spec: &ConversionSpec,
    ) -> Result<AssembledOutput, PipelineError> {
        if batch.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }
        let sources = batch.into_sources();

        let prefetches = sources.into_iter().map(|source| {
            let output_name = spec.output_name(source.declared_name());
            prefetch(source, output_name, spec.engine().clone())
        });
        let results = join_all(prefetches).await;

        let mut ready = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(item) => ready.push(item),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            // Dropping the prefetched streams releases their sources
            drop(ready);
            return Err(e);
        }

        if ready.len() == 1 {
            let item = ready.remove(0);
            let file_name = item.output_name.clone();
            tracing::info!(file = %file_name, "Streaming single converted file");
            Ok(AssembledOutput {
                file_name,
                media_type: spec.media_type(),
                body: self.stream_single(item),
            })
        } else {
            tracing::info!(members = ready.len(), "Streaming converted archive");
            Ok(AssembledOutput {
                file_name: ARCHIVE_NAME.to_string(),
                media_type: ARCHIVE_MEDIA_TYPE,
                body: self.stream_archive(ready),
            })
        }
    }

    fn stream_single(&self, item: Prefetched) -> ByteStream {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || pump(item, tx));
        receiver_stream(rx)
    }

    fn stream_archive(&self, items: Vec<Prefetched>) -> ByteStream {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let writer = ChannelWriter::new(tx, self.chunk_bytes);
        let abort = writer.abort_handle();

        let names = unique_member_names(items.iter().map(|item| item.output_name.clone()));
        let members: Vec<ArchiveMember> = items
            .into_iter()
            .zip(names)
            .map(|(item, name)| {
                let Prefetched {
                    rest,
                    first,
                    source,
                    ..
                } = item;
                let abort = abort.clone();
                // Close the writer before the error reaches the zip writer so
                // its trailer is never sent
                let chunks: ChunkStream = Box::new(first.into_iter().map(Ok).chain(rest).inspect(
                    move |chunk| {
                        if chunk.is_err() {
                            abort.close();
                        }
                    },
                ));
                ArchiveMember {
                    name,
                    chunks,
                    source: Some(source),
                }
            })
            .collect();

        tokio::task::spawn_blocking(move || match write_archive(writer, members) {
            Ok(_) => tracing::debug!("Archive stream complete"),
            Err(e) if e.is_disconnect() => {
                tracing::debug!("Client disconnected during archive stream")
            }
            Err(e) => {
                // Every member source has been released by now
                tracing::warn!(error = %e, "Archive stream aborted");
                abort.fail(e.to_string());
            }
        });
        receiver_stream(rx)
    }
}

/// Run the conversion up to its first chunk on a blocking thread.
async fn prefetch(
    source: StoredSource,
    output_name: String,
    engine: Arc<dyn ConversionEngine>,
) -> Result<Prefetched, PipelineError> {
    let task = tokio::task::spawn_blocking(move || {
        let failed = |source_name: &str, e: ConversionError| {
            tracing::warn!(name = %source_name, error = %e, "Conversion failed during prefetch");
            PipelineError::ConversionFailed {
                name: source_name.to_string(),
                source: e,
            }
        };

        let mut rest = match engine.convert(source.path()) {
            Ok(stream) => stream,
            Err(e) => return Err(failed(source.declared_name(), e)),
        };
        let first = match rest.next() {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) => return Err(failed(source.declared_name(), e)),
            None => None,
        };

        Ok(Prefetched {
            rest,
            first,
            output_name,
            source,
        })
    });

    task.await
        .map_err(|e| PipelineError::Internal(format!("conversion task failed: {}", e)))?
}

/// Forward a single converted source into the channel, then release it.
fn pump(item: Prefetched, tx: mpsc::Sender<io::Result<Bytes>>) {
    let Prefetched {
        rest,
        first,
        output_name,
        mut source,
    } = item;

    let mut sent = 0u64;
    let mut failure = None;
    for chunk in first.into_iter().map(Ok).chain(rest) {
        match chunk {
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => {
                let len = bytes.len() as u64;
                if tx.blocking_send(Ok(bytes)).is_err() {
                    tracing::debug!(file = %output_name, sent, "Client disconnected mid-stream");
                    break;
                }
                sent += len;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    tracing::debug!(file = %output_name, bytes = sent, "Single stream finished");
    source.cleanup();

    if let Some(e) = failure {
        // Status is already committed; truncate the body
        tracing::warn!(file = %output_name, error = %e, "Conversion failed mid-stream");
        let _ = tx.blocking_send(Err(io::Error::other(format!(
            "Failed to convert {}: {}",
            source.declared_name(),
            e
        ))));
    }
}

fn receiver_stream(mut rx: mpsc::Receiver<io::Result<Bytes>>) -> ByteStream {
    Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    })
}
