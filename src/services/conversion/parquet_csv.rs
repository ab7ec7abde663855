use std::fs::File;
use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};

use super::{ChunkStream, ConversionEngine, ConversionError, OutputSettings, tabular};

/// Parquet → CSV, one CSV chunk per decoded row group slice.
pub struct ParquetToCsv {
    settings: OutputSettings,
}

impl ParquetToCsv {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }
}

impl ConversionEngine for ParquetToCsv {
    fn convert(&self, source: &Path) -> Result<ChunkStream, ConversionError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(source)?)?;
        let schema = builder.schema().clone();
        let reader = builder.with_batch_size(self.settings.batch_rows).build()?;

        Ok(Box::new(CsvChunks {
            reader,
            schema,
            header_written: false,
            finished: false,
        }))
    }
}

struct CsvChunks {
    reader: ParquetRecordBatchReader,
    schema: SchemaRef,
    header_written: bool,
    finished: bool,
}

impl CsvChunks {
    fn encode(&mut self, batch: &RecordBatch) -> Result<Bytes, ConversionError> {
        let chunk = tabular::encode_csv(batch, !self.header_written)?;
        self.header_written = true;
        Ok(chunk)
    }
}

impl Iterator for CsvChunks {
    type Item = Result<Bytes, ConversionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.reader.next() {
                Some(Ok(batch)) if batch.num_rows() == 0 => continue,
                Some(Ok(batch)) => {
                    let chunk = self.encode(&batch);
                    if chunk.is_err() {
                        self.finished = true;
                    }
                    return Some(chunk);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.finished = true;
                    // A file without rows still yields its header
                    if !self.header_written && !self.schema.fields().is_empty() {
                        let empty = RecordBatch::new_empty(self.schema.clone());
                        return Some(self.encode(&empty));
                    }
                    return None;
                }
            }
        }
    }
}
