//! Format adapters behind a single capability: `convert(path) -> chunks`.

pub mod csv_ndjson;
pub mod csv_parquet;
pub mod ndjson_csv;
pub mod parquet_csv;
pub mod records;
pub mod tabular;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arrow::error::ArrowError;
use bytes::Bytes;
use parquet::errors::ParquetError;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;

use crate::config::AppConfig;
use crate::services::transfer::{FileChunks, TransferError, chunks_of};
use crate::utils::filename;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Arrow(#[from] ArrowError),

    #[error("{0}")]
    Parquet(#[from] ParquetError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Line {line} is not valid JSON: {source}")]
    InvalidJson {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: each NDJSON entry must be a JSON object.")]
    NotAnObject { line: usize },

    #[error("{0}")]
    Engine(String),
}

impl From<TransferError> for ConversionError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Read(e) | TransferError::Write(e) => Self::Io(e),
            other => Self::Engine(other.to_string()),
        }
    }
}

/// Finite, non-restartable sequence of output chunks.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Bytes, ConversionError>> + Send>;

/// A format-pair transform.
///
/// Implementations read a plain file and know nothing about HTTP, archives
/// or cleanup. Malformed input must fail at call time or on the first pulled
/// element; output is produced incrementally, never buffered whole.
pub trait ConversionEngine: Send + Sync {
    fn convert(&self, source: &Path) -> Result<ChunkStream, ConversionError>;
}

/// Output tuning shared by the adapters.
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub chunk_bytes: usize,
    pub batch_rows: usize,
    pub scratch_dir: Option<PathBuf>,
}

impl OutputSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_bytes: config.transfer_chunk_bytes,
            batch_rows: tabular::BATCH_ROWS,
            scratch_dir: config.scratch_dir.clone(),
        }
    }

    /// Temporary file for adapters that must finish a container format
    /// before any of it can be streamed.
    pub fn spool_file(&self, suffix: &str) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("spool-").suffix(suffix);
        match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Streams a finished spool file and deletes it once dropped.
pub struct SpooledChunks {
    chunks: FileChunks,
    _spool: TempPath,
}

impl SpooledChunks {
    pub fn open(spool: TempPath, chunk_bytes: usize) -> Result<Self, ConversionError> {
        let chunks = chunks_of(&spool, chunk_bytes)?;
        Ok(Self {
            chunks,
            _spool: spool,
        })
    }
}

impl Iterator for SpooledChunks {
    type Item = Result<Bytes, ConversionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next().map(|chunk| chunk.map_err(ConversionError::from))
    }
}

/// Static description of one output format.
#[derive(Clone)]
pub struct ConversionSpec {
    engine: Arc<dyn ConversionEngine>,
    media_type: &'static str,
    output_suffix: &'static str,
}

impl ConversionSpec {
    pub fn new(
        engine: Arc<dyn ConversionEngine>,
        media_type: &'static str,
        output_suffix: &'static str,
    ) -> Self {
        Self {
            engine,
            media_type,
            output_suffix,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ConversionEngine> {
        &self.engine
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    pub fn output_suffix(&self) -> &'static str {
        self.output_suffix
    }

    /// Declared name with its extension swapped for this format's suffix.
    pub fn output_name(&self, declared_name: &str) -> String {
        filename::output_name(declared_name, self.output_suffix)
    }
}

impl fmt::Debug for ConversionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionSpec")
            .field("media_type", &self.media_type)
            .field("output_suffix", &self.output_suffix)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionPair {
    ParquetToCsv,
    CsvToParquet,
    NdjsonToCsv,
    CsvToNdjson,
}

impl ConversionPair {
    pub const ALL: [ConversionPair; 4] = [
        Self::ParquetToCsv,
        Self::CsvToParquet,
        Self::NdjsonToCsv,
        Self::CsvToNdjson,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParquetToCsv => "parquet-to-csv",
            Self::CsvToParquet => "csv-to-parquet",
            Self::NdjsonToCsv => "ndjson-to-csv",
            Self::CsvToNdjson => "csv-to-ndjson",
        }
    }
}

impl fmt::Display for ConversionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|pair| pair.as_str() == s)
            .ok_or_else(|| format!("Unknown conversion '{}'", s))
    }
}

pub const CSV_MEDIA_TYPE: &str = "text/csv";
pub const PARQUET_MEDIA_TYPE: &str = "application/octet-stream";
pub const NDJSON_MEDIA_TYPE: &str = "application/x-ndjson";

/// Route table from conversion pair to its spec, built once at startup.
#[derive(Debug, Clone)]
pub struct ConversionRegistry {
    specs: HashMap<ConversionPair, ConversionSpec>,
}

impl ConversionRegistry {
    pub fn new(settings: OutputSettings) -> Self {
        let mut specs = HashMap::new();
        specs.insert(
            ConversionPair::ParquetToCsv,
            ConversionSpec::new(
                Arc::new(parquet_csv::ParquetToCsv::new(settings.clone())),
                CSV_MEDIA_TYPE,
                ".csv",
            ),
        );
        specs.insert(
            ConversionPair::CsvToParquet,
            ConversionSpec::new(
                Arc::new(csv_parquet::CsvToParquet::new(settings.clone())),
                PARQUET_MEDIA_TYPE,
                ".parquet",
            ),
        );
        specs.insert(
            ConversionPair::NdjsonToCsv,
            ConversionSpec::new(
                Arc::new(ndjson_csv::NdjsonToCsv::new(settings.clone())),
                CSV_MEDIA_TYPE,
                ".csv",
            ),
        );
        specs.insert(
            ConversionPair::CsvToNdjson,
            ConversionSpec::new(
                Arc::new(csv_ndjson::CsvToNdjson::new(settings)),
                NDJSON_MEDIA_TYPE,
                ".ndjson",
            ),
        );
        Self { specs }
    }

    pub fn get(&self, pair: ConversionPair) -> Option<&ConversionSpec> {
        self.specs.get(&pair)
    }

    /// Replace the engine behind one pair, keeping its media type and suffix.
    pub fn with_engine(mut self, pair: ConversionPair, engine: Arc<dyn ConversionEngine>) -> Self {
        if let Some(spec) = self.specs.get_mut(&pair) {
            spec.engine = engine;
        }
        self
    }
}
