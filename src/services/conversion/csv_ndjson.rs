use std::path::Path;

use bytes::Bytes;

use super::tabular::{self, CsvBatches};
use super::{ChunkStream, ConversionEngine, ConversionError, OutputSettings};

/// CSV → NDJSON, one chunk of JSON lines per decoded batch.
pub struct CsvToNdjson {
    settings: OutputSettings,
}

impl CsvToNdjson {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }
}

impl ConversionEngine for CsvToNdjson {
    fn convert(&self, source: &Path) -> Result<ChunkStream, ConversionError> {
        let (_, batches) = tabular::open_csv(source, self.settings.batch_rows, None)?;
        Ok(Box::new(NdjsonChunks {
            batches,
            finished: false,
        }))
    }
}

struct NdjsonChunks {
    batches: CsvBatches,
    finished: bool,
}

impl Iterator for NdjsonChunks {
    type Item = Result<Bytes, ConversionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = match self.batches.next()? {
            Ok(batch) => tabular::encode_ndjson(&batch),
            Err(e) => Err(e.into()),
        };
        if item.is_err() {
            self.finished = true;
        }
        Some(item)
    }
}
