use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bytes::Bytes;

use super::records::{self, ColumnSet, RecordLines};
use super::{ChunkStream, ConversionEngine, ConversionError, OutputSettings};

/// NDJSON → CSV with nested records flattened to dotted columns.
///
/// The first pass validates every record and derives the column set, so
/// malformed input fails before any output exists. The second pass re-reads
/// the file and emits CSV rows lazily.
pub struct NdjsonToCsv {
    settings: OutputSettings,
}

impl NdjsonToCsv {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }
}

impl ConversionEngine for NdjsonToCsv {
    fn convert(&self, source: &Path) -> Result<ChunkStream, ConversionError> {
        let mut columns = ColumnSet::default();
        let mut count = 0usize;
        for line in RecordLines::new(BufReader::new(File::open(source)?)) {
            let (number, text) = line?;
            let record = records::parse_record(number, &text)?;
            columns.observe(&records::flatten_record(&record));
            count += 1;
        }
        tracing::debug!(records = count, columns = columns.columns().len(), "Scanned NDJSON source");

        Ok(Box::new(CsvRows {
            lines: RecordLines::new(BufReader::new(File::open(source)?)),
            columns: columns.columns().to_vec(),
            header_pending: true,
            chunk_bytes: self.settings.chunk_bytes,
            finished: columns.is_empty(),
        }))
    }
}

struct CsvRows {
    lines: RecordLines<BufReader<File>>,
    columns: Vec<String>,
    header_pending: bool,
    chunk_bytes: usize,
    finished: bool,
}

impl CsvRows {
    fn fill_chunk(&mut self) -> Result<Option<Bytes>, ConversionError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(self.chunk_bytes));

        if self.header_pending {
            writer.write_record(&self.columns)?;
            self.header_pending = false;
        }

        let mut rows = 0usize;
        loop {
            let Some(line) = self.lines.next() else {
                self.finished = true;
                break;
            };
            let (number, text) = line?;
            let flat = records::flatten_record(&records::parse_record(number, &text)?);
            writer.write_record(self.columns.iter().map(|column| {
                flat.get(column)
                    .map(records::cell_text)
                    .unwrap_or_default()
                    .into_owned()
            }))?;
            rows += 1;

            // The csv writer buffers internally; flush to measure the chunk
            if rows % 64 == 0 {
                writer.flush()?;
                if writer.get_ref().len() >= self.chunk_bytes {
                    break;
                }
            }
        }

        let buffer = writer
            .into_inner()
            .map_err(|e| ConversionError::Io(e.into_error()))?;
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::from(buffer)))
        }
    }
}

impl Iterator for CsvRows {
    type Item = Result<Bytes, ConversionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.fill_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
