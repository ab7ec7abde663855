//! Arrow helpers shared by the CSV, Parquet and NDJSON adapters.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::datatypes::SchemaRef;
use arrow::json::writer::LineDelimited;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;

use super::ConversionError;

/// Rows per decoded record batch.
pub const BATCH_ROWS: usize = 8192;

/// Records sampled when inferring a CSV schema for preview.
pub const PREVIEW_INFERENCE_ROWS: usize = 1000;

pub type CsvBatches = arrow::csv::Reader<File>;

/// Open a headed CSV file, inferring column types.
///
/// `sample` limits how many records inference reads; `None` scans the whole
/// file so every value is known to fit its inferred type.
pub fn open_csv(
    path: &Path,
    batch_rows: usize,
    sample: Option<usize>,
) -> Result<(SchemaRef, CsvBatches), ConversionError> {
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(File::open(path)?, sample)?;
    let schema = Arc::new(schema);

    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_format(format)
        .with_batch_size(batch_rows)
        .build(File::open(path)?)?;
    Ok((schema, reader))
}

/// Encode one batch as CSV text, optionally preceded by the header row.
pub fn encode_csv(batch: &RecordBatch, with_header: bool) -> Result<Bytes, ConversionError> {
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(with_header)
        .build(Vec::new());
    writer.write(batch)?;
    Ok(Bytes::from(writer.into_inner()))
}

/// Encode one batch as newline-delimited JSON objects with explicit nulls.
pub fn encode_ndjson(batch: &RecordBatch) -> Result<Bytes, ConversionError> {
    let mut writer = arrow::json::WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, LineDelimited>(Vec::new());
    writer.write(batch)?;
    writer.finish()?;
    Ok(Bytes::from(writer.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_csv_infers_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,name,score\n1,ada,9.5\n2,grace,\n").unwrap();
        file.flush().unwrap();

        let (schema, reader) = open_csv(file.path(), 1024, None).unwrap();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field(0).name(), "id");

        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_encode_ndjson_keeps_nulls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,note\n1,\n").unwrap();
        file.flush().unwrap();

        let (_, mut reader) = open_csv(file.path(), 1024, None).unwrap();
        let batch = reader.next().unwrap().unwrap();
        let text = String::from_utf8(encode_ndjson(&batch).unwrap().to_vec()).unwrap();
        assert_eq!(text.trim_end(), r#"{"id":1,"note":null}"#);
    }
}
