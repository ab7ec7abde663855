use std::path::Path;

use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::{ChunkStream, ConversionEngine, ConversionError, OutputSettings, SpooledChunks, tabular};

/// CSV → Parquet.
///
/// The Parquet footer is only known once every row is written, so the file
/// is encoded into a spool file (row group by row group) and then streamed
/// in transfer-sized chunks. The spool is deleted when the stream drops.
pub struct CsvToParquet {
    settings: OutputSettings,
}

impl CsvToParquet {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }
}

impl ConversionEngine for CsvToParquet {
    fn convert(&self, source: &Path) -> Result<ChunkStream, ConversionError> {
        let (schema, batches) = tabular::open_csv(source, self.settings.batch_rows, None)?;
        if schema.fields().is_empty() {
            return Err(ConversionError::Engine(
                "CSV input has no header row".to_string(),
            ));
        }

        let (file, spool) = self.settings.spool_file(".parquet")?.into_parts();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;

        let mut rows = 0;
        for batch in batches {
            let batch = batch?;
            rows += batch.num_rows();
            writer.write(&batch)?;
        }
        writer.close()?;
        tracing::debug!(rows, "Encoded parquet spool");

        Ok(Box::new(SpooledChunks::open(spool, self.settings.chunk_bytes)?))
    }
}
