//! Turns uploads and remote URLs into request-scoped [`StoredSource`]s.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use futures::TryStreamExt;
use futures::future::join_all;
use tempfile::NamedTempFile;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::config::AppConfig;
use crate::services::error::PipelineError;
use crate::services::source::{SourceBatch, StoredSource};
use crate::services::transfer::{TransferError, copy_bounded};
use crate::utils::filename::{self, FALLBACK_NAME};

/// Limits applied to every acquisition.
#[derive(Debug, Clone)]
pub struct AcquireLimits {
    pub max_sources: usize,
    pub max_bytes: u64,
    pub chunk_bytes: usize,
    pub allowed_schemes: Vec<String>,
    pub timeout: Duration,
}

impl AcquireLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_sources: config.max_sources_per_request,
            max_bytes: config.max_source_bytes,
            chunk_bytes: config.transfer_chunk_bytes,
            allowed_schemes: config.remote_allowed_schemes.clone(),
            timeout: config.remote_timeout(),
        }
    }
}

/// An upload whose bytes have not been read yet.
pub struct PendingUpload {
    pub file_name: Option<String>,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl PendingUpload {
    pub fn new(file_name: Option<String>, reader: impl AsyncRead + Send + 'static) -> Self {
        Self {
            file_name,
            reader: Box::pin(reader),
        }
    }
}

/// Where a transfer's bytes came from; decides how read errors are reported.
enum Origin<'a> {
    Upload,
    Remote(&'a str),
}

pub struct SourceAcquirer {
    limits: AcquireLimits,
    scratch_dir: Option<PathBuf>,
    client: reqwest::Client,
}

impl SourceAcquirer {
    pub fn new(config: &AppConfig) -> Result<Self, PipelineError> {
        let limits = AcquireLimits::from_config(config);
        let client = reqwest::Client::builder()
            .timeout(limits.timeout)
            .connect_timeout(limits.timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            limits,
            scratch_dir: config.scratch_dir.clone(),
            client,
        })
    }

    /// Reject batches that are empty or larger than the configured maximum.
    pub fn check_count(&self, count: usize) -> Result<(), PipelineError> {
        if count == 0 {
            return Err(PipelineError::EmptyBatch);
        }
        if count > self.limits.max_sources {
            tracing::warn!(
                count,
                max = self.limits.max_sources,
                "Rejected batch with too many sources"
            );
            return Err(PipelineError::TooManySources {
                max: self.limits.max_sources,
            });
        }
        Ok(())
    }

    /// Stream an upload into temporary storage, enforcing the byte ceiling.
    pub async fn acquire_upload<R>(
        &self,
        file_name: Option<&str>,
        mut reader: R,
    ) -> Result<StoredSource, PipelineError>
    where
        R: AsyncRead + Unpin,
    {
        let declared_name = filename::sanitize_filename(file_name.unwrap_or(FALLBACK_NAME));
        self.persist(declared_name, &mut reader, Origin::Upload)
            .await
    }

    /// Download `url` into temporary storage.
    ///
    /// The scheme is checked against the allow-list before any connection is
    /// attempted. The client timeout covers connection and the full body.
    pub async fn acquire_remote(&self, url: &str) -> Result<StoredSource, PipelineError> {
        let parsed = self.check_url(url)?;

        tracing::info!(url = %parsed, "Downloading remote source");
        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnreachable {
                url: url.to_string(),
                reason: describe_reqwest_error(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %parsed, status = status.as_u16(), "Remote source rejected request");
            return Err(PipelineError::SourceRejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let declared_name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename::from_content_disposition)
            .or_else(|| filename::from_url_path(&parsed))
            .map(|name| filename::sanitize_filename(&name))
            .unwrap_or_else(|| FALLBACK_NAME.to_string());

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(body);

        self.persist(declared_name, &mut reader, Origin::Remote(url))
            .await
    }

    /// Acquire a whole batch. Count limits are checked before any storage is
    /// touched; on any failure every source already stored is released.
    pub async fn acquire_batch(
        &self,
        uploads: Vec<PendingUpload>,
        urls: Vec<String>,
    ) -> Result<SourceBatch, PipelineError> {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        self.check_count(uploads.len() + urls.len())?;

        let mut batch = SourceBatch::new();
        for upload in uploads {
            let PendingUpload { file_name, reader } = upload;
            match self.acquire_upload(file_name.as_deref(), reader).await {
                Ok(source) => batch.push(source),
                Err(e) => {
                    batch.cleanup();
                    return Err(e);
                }
            }
        }

        self.acquire_remotes(&mut batch, &urls).await?;
        Ok(batch)
    }

    /// Start an incremental batch for inputs that arrive one at a time.
    pub fn intake(&self) -> BatchIntake<'_> {
        BatchIntake {
            acquirer: self,
            batch: SourceBatch::new(),
            urls: Vec::new(),
        }
    }

    fn check_url(&self, url: &str) -> Result<url::Url, PipelineError> {
        let parsed = url::Url::parse(url.trim()).map_err(|e| PipelineError::InvalidSourceUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme().to_ascii_lowercase();
        if !self.limits.allowed_schemes.iter().any(|s| *s == scheme) {
            tracing::warn!(url, scheme = %scheme, "Rejected remote source scheme");
            return Err(PipelineError::InvalidSourceScheme {
                scheme,
                allowed: self.limits.allowed_schemes.join(", "),
            });
        }
        Ok(parsed)
    }

    /// Download `urls` concurrently and append them to `batch` in input order.
    async fn acquire_remotes(
        &self,
        batch: &mut SourceBatch,
        urls: &[String],
    ) -> Result<(), PipelineError> {
        // Validate every URL before opening any connection
        for url in urls {
            if let Err(e) = self.check_url(url) {
                batch.cleanup();
                return Err(e);
            }
        }

        let results = join_all(urls.iter().map(|url| self.acquire_remote(url))).await;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(source) if first_error.is_none() => batch.push(source),
                Ok(mut source) => source.cleanup(),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                batch.cleanup();
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn scratch_file(&self) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("source-");
        match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    async fn persist<R>(
        &self,
        declared_name: String,
        reader: &mut R,
        origin: Origin<'_>,
    ) -> Result<StoredSource, PipelineError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let temp_file = self.scratch_file()?;
        let mut target = tokio::fs::File::from_std(temp_file.reopen()?);
        // Dropping the path on any early return deletes the partial file
        let temp_path = temp_file.into_temp_path();

        let result = copy_bounded(
            reader,
            &mut target,
            self.limits.chunk_bytes,
            Some(self.limits.max_bytes),
        )
        .await;
        drop(target);

        match result {
            Ok(byte_size) => {
                tracing::info!(
                    name = %declared_name,
                    bytes = byte_size,
                    "Stored source"
                );
                Ok(StoredSource::new(temp_path, declared_name, byte_size))
            }
            Err(TransferError::LimitExceeded { limit }) => {
                tracing::warn!(name = %declared_name, limit, "Source exceeded size limit");
                Err(PipelineError::PayloadTooLarge {
                    name: declared_name,
                    limit,
                })
            }
            Err(TransferError::InvalidChunkSize) => Err(PipelineError::Internal(
                "transfer chunk size must be positive".to_string(),
            )),
            Err(TransferError::Read(e)) => Err(match origin {
                Origin::Upload => PipelineError::UploadInterrupted {
                    name: declared_name,
                    reason: e.to_string(),
                },
                Origin::Remote(url) => PipelineError::SourceUnreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                },
            }),
            Err(TransferError::Write(e)) => Err(PipelineError::Storage(e)),
        }
    }
}

/// Incremental batch builder for streamed request bodies.
///
/// The count ceiling is enforced as inputs appear: the source that would
/// exceed it is rejected before any of its bytes are stored. Dropping the
/// intake releases everything stored so far.
pub struct BatchIntake<'a> {
    acquirer: &'a SourceAcquirer,
    batch: SourceBatch,
    urls: Vec<String>,
}

impl BatchIntake<'_> {
    pub fn declared(&self) -> usize {
        self.batch.len() + self.urls.len()
    }

    fn reserve_slot(&self) -> Result<(), PipelineError> {
        let max = self.acquirer.limits.max_sources;
        if self.declared() + 1 > max {
            tracing::warn!(max, "Rejected source beyond per-request limit");
            return Err(PipelineError::TooManySources { max });
        }
        Ok(())
    }

    pub async fn push_upload<R>(
        &mut self,
        file_name: Option<&str>,
        reader: R,
    ) -> Result<(), PipelineError>
    where
        R: AsyncRead + Unpin,
    {
        self.reserve_slot()?;
        let source = self.acquirer.acquire_upload(file_name, reader).await?;
        self.batch.push(source);
        Ok(())
    }

    /// Queue a URL for download. Blank values are ignored.
    pub fn push_url(&mut self, url: &str) -> Result<(), PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(());
        }
        self.reserve_slot()?;
        self.urls.push(url.to_string());
        Ok(())
    }

    /// Download queued URLs and hand over the completed batch.
    pub async fn finish(mut self) -> Result<SourceBatch, PipelineError> {
        if self.declared() == 0 {
            return Err(PipelineError::EmptyBatch);
        }
        let urls = std::mem::take(&mut self.urls);
        let mut batch = std::mem::take(&mut self.batch);
        self.acquirer.acquire_remotes(&mut batch, &urls).await?;
        Ok(batch)
    }
}

fn describe_reqwest_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}
