//! Schema and bounded row sample for an uploaded or downloaded source.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, TimeUnit};
use arrow::json::writer::JsonArray;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::TempPath;
use utoipa::ToSchema;

use crate::services::conversion::records::normalize_escapes;
use crate::services::conversion::{ConversionError, OutputSettings, tabular};
use crate::services::error::PipelineError;
use crate::services::source::StoredSource;

/// Rows returned by a preview. The preview never reflects the whole dataset.
pub const PREVIEW_ROW_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchemaField {
    pub name: String,
    /// SQL-style type name, e.g. `BIGINT`, `VARCHAR`, `DECIMAL(10,2)`
    pub dtype: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PreviewResult {
    pub schema: Vec<SchemaField>,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Map<String, Value>>,
    /// Upper bound on `rows`
    pub row_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviewFormat {
    Parquet,
    Csv,
    Ndjson,
}

impl PreviewFormat {
    fn from_extension(ext: Option<&str>) -> Option<Self> {
        match ext? {
            "parquet" => Some(Self::Parquet),
            "csv" => Some(Self::Csv),
            "ndjson" | "jsonl" => Some(Self::Ndjson),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewEngine {
    settings: OutputSettings,
}

impl PreviewEngine {
    pub fn new(settings: OutputSettings) -> Self {
        Self { settings }
    }

    /// Extract schema and up to [`PREVIEW_ROW_LIMIT`] rows. The source is
    /// released whether or not extraction succeeds.
    pub async fn preview(&self, source: StoredSource) -> Result<PreviewResult, PipelineError> {
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let mut source = source;
            let result = preview_source(&source, &settings);
            source.cleanup();
            result
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("preview task failed: {}", e)))?
    }
}

fn preview_source(
    source: &StoredSource,
    settings: &OutputSettings,
) -> Result<PreviewResult, PipelineError> {
    let extension = source.extension();
    let Some(format) = PreviewFormat::from_extension(extension.as_deref()) else {
        return Err(PipelineError::UnsupportedPreviewFormat {
            name: source.declared_name().to_string(),
        });
    };

    let extracted = match format {
        PreviewFormat::Parquet => preview_parquet(source.path()),
        PreviewFormat::Csv => preview_csv(source.path(), settings),
        PreviewFormat::Ndjson => preview_ndjson(source.path(), settings),
    };

    extracted.map_err(|e| {
        tracing::warn!(name = %source.declared_name(), error = %e, "Preview failed");
        PipelineError::PreviewFailed { source: e }
    })
}

fn preview_parquet(path: &Path) -> Result<PreviewResult, ConversionError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema = builder.schema().clone();
    let reader = builder
        .with_batch_size(PREVIEW_ROW_LIMIT)
        .with_limit(PREVIEW_ROW_LIMIT)
        .build()?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    finish_preview(schema.fields().iter().map(|f| f.as_ref()), &batches)
}

fn preview_csv(path: &Path, settings: &OutputSettings) -> Result<PreviewResult, ConversionError> {
    let normalized = normalized_copy(path, settings, ".csv")?;
    let (schema, reader) = tabular::open_csv(
        &normalized,
        PREVIEW_ROW_LIMIT,
        Some(tabular::PREVIEW_INFERENCE_ROWS),
    )?;
    let batches = take_rows(reader)?;
    finish_preview(schema.fields().iter().map(|f| f.as_ref()), &batches)
}

fn preview_ndjson(path: &Path, settings: &OutputSettings) -> Result<PreviewResult, ConversionError> {
    let normalized = normalized_copy(path, settings, ".ndjson")?;
    let (schema, _) = arrow::json::reader::infer_json_schema(
        BufReader::new(File::open(&normalized)?),
        Some(tabular::PREVIEW_INFERENCE_ROWS),
    )?;
    let schema = Arc::new(schema);
    // Inference widens mixed columns to Utf8; numbers must decode into them
    let reader = arrow::json::ReaderBuilder::new(schema.clone())
        .with_batch_size(PREVIEW_ROW_LIMIT)
        .with_coerce_primitive(true)
        .build(BufReader::new(File::open(&normalized)?))?;

    let batches = take_rows(reader)?;
    finish_preview(schema.fields().iter().map(|f| f.as_ref()), &batches)
}

/// Copy `path` with literal `\r\n` / `\n` sequences expanded. The copy is
/// deleted when the returned path drops.
fn normalized_copy(
    path: &Path,
    settings: &OutputSettings,
    suffix: &str,
) -> Result<TempPath, ConversionError> {
    let (file, spool) = settings.spool_file(suffix)?.into_parts();
    let mut out = BufWriter::new(file);
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        out.write_all(normalize_escapes(&line).as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(spool)
}

fn take_rows<I>(reader: I) -> Result<Vec<RecordBatch>, ConversionError>
where
    I: Iterator<Item = Result<RecordBatch, arrow::error::ArrowError>>,
{
    let mut batches = Vec::new();
    let mut rows = 0;
    for batch in reader {
        let batch = batch?;
        let take = batch.num_rows().min(PREVIEW_ROW_LIMIT - rows);
        rows += take;
        batches.push(batch.slice(0, take));
        if rows >= PREVIEW_ROW_LIMIT {
            break;
        }
    }
    Ok(batches)
}

fn finish_preview<'a>(
    fields: impl Iterator<Item = &'a Field>,
    batches: &[RecordBatch],
) -> Result<PreviewResult, ConversionError> {
    let schema = fields
        .map(|field| SchemaField {
            name: field.name().clone(),
            dtype: sql_type_name(field.data_type()),
        })
        .collect();

    Ok(PreviewResult {
        schema,
        rows: rows_as_json(batches)?,
        row_limit: PREVIEW_ROW_LIMIT,
    })
}

fn rows_as_json(batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>, ConversionError> {
    let mut writer = arrow::json::WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;

    let buffer = writer.into_inner();
    if buffer.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&buffer)
        .map_err(|e| ConversionError::Engine(format!("row encoding failed: {}", e)))
}

/// SQL-style name for an Arrow type, as shown in preview schemas.
pub fn sql_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "NULL".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float16 | DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "VARCHAR".to_string(),
        DataType::Binary
        | DataType::LargeBinary
        | DataType::BinaryView
        | DataType::FixedSizeBinary(_) => "BLOB".to_string(),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Time32(_) | DataType::Time64(_) => "TIME".to_string(),
        DataType::Timestamp(unit, tz) => {
            let base = match unit {
                TimeUnit::Second => "TIMESTAMP_S",
                TimeUnit::Millisecond => "TIMESTAMP_MS",
                TimeUnit::Microsecond => "TIMESTAMP",
                TimeUnit::Nanosecond => "TIMESTAMP_NS",
            };
            if tz.is_some() {
                "TIMESTAMP WITH TIME ZONE".to_string()
            } else {
                base.to_string()
            }
        }
        DataType::Interval(_) | DataType::Duration(_) => "INTERVAL".to_string(),
        DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => format!("DECIMAL({},{})", p, s),
        DataType::List(field) | DataType::LargeList(field) | DataType::FixedSizeList(field, _) => {
            format!("{}[]", sql_type_name(field.data_type()))
        }
        DataType::Struct(fields) => {
            let inner: Vec<String> = fields
                .iter()
                .map(|f| format!("{} {}", f.name(), sql_type_name(f.data_type())))
                .collect();
            format!("STRUCT({})", inner.join(", "))
        }
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => format!(
                "MAP({}, {})",
                sql_type_name(kv[0].data_type()),
                sql_type_name(kv[1].data_type())
            ),
            _ => "MAP".to_string(),
        },
        DataType::Dictionary(_, value) => sql_type_name(value),
        other => other.to_string().to_uppercase(),
    }
}
