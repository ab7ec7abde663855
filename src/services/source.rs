//! Request-scoped temporary copies of ingested inputs.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

/// One ingested input persisted to temporary storage for a single request.
///
/// The temporary file is owned exclusively by this value and is removed
/// exactly once: by [`StoredSource::cleanup`] or, failing that, on drop.
#[derive(Debug)]
pub struct StoredSource {
    location: Option<TempPath>,
    path: PathBuf,
    declared_name: String,
    byte_size: u64,
}

impl StoredSource {
    pub(crate) fn new(location: TempPath, declared_name: String, byte_size: u64) -> Self {
        let path = location.to_path_buf();
        Self {
            location: Some(location),
            path,
            declared_name,
            byte_size,
        }
    }

    /// Take ownership of an existing, fully written file. It is deleted when
    /// the returned source is cleaned up.
    pub fn adopt(path: impl Into<PathBuf>, declared_name: impl Into<String>) -> io::Result<Self> {
        let path = path.into();
        let byte_size = std::fs::metadata(&path)?.len();
        Ok(Self::new(
            TempPath::try_from_path(path)?,
            declared_name.into(),
            byte_size,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared_name(&self) -> &str {
        &self.declared_name
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Lowercased extension of the declared name, without the dot.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.declared_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn is_released(&self) -> bool {
        self.location.is_none()
    }

    /// Release the temporary file. Safe to call repeatedly; a file that is
    /// already gone is not an error.
    pub fn cleanup(&mut self) {
        let Some(location) = self.location.take() else {
            return;
        };
        match location.close() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Released temporary source"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove temporary source"
            ),
        }
    }
}

impl Drop for StoredSource {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Ordered sources of one request. Order drives archive members and error context.
#[derive(Debug, Default)]
pub struct SourceBatch {
    sources: Vec<StoredSource>,
}

impl SourceBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: StoredSource) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn into_sources(mut self) -> Vec<StoredSource> {
        std::mem::take(&mut self.sources)
    }

    /// Release every source in the batch.
    pub fn cleanup(&mut self) {
        for source in &mut self.sources {
            source.cleanup();
        }
    }
}

impl From<Vec<StoredSource>> for SourceBatch {
    fn from(sources: Vec<StoredSource>) -> Self {
        Self { sources }
    }
}

impl Drop for SourceBatch {
    fn drop(&mut self) {
        self.cleanup();
    }
}
