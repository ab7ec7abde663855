use axum::http::StatusCode;
use thiserror::Error;

use crate::services::conversion::ConversionError;

const MIB: u64 = 1024 * 1024;

/// Whole megabytes (rounded up) for MiB-sized limits, raw bytes below that.
fn describe_limit(limit: &u64) -> String {
    if *limit >= MIB {
        format!("{} MB", limit.div_ceil(MIB))
    } else {
        format!("{limit} bytes")
    }
}

/// Failures of the ingestion, conversion and delivery pipeline.
///
/// Every variant carries a stable client-facing `code()` and an HTTP
/// `status()`; the API layer renders them as `{"detail": {code, message}}`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Provide at least one file upload or URL.")]
    EmptyBatch,

    #[error("Too many files. A maximum of {max} files or URLs is allowed per request.")]
    TooManySources { max: usize },

    #[error("File '{name}' exceeds the {} limit.", describe_limit(.limit))]
    PayloadTooLarge { name: String, limit: u64 },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidSourceUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}'. Allowed schemes: {allowed}.")]
    InvalidSourceScheme { scheme: String, allowed: String },

    #[error("Failed to download {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },

    #[error("Failed to download {url}: remote server responded with status {status}")]
    SourceRejected { url: String, status: u16 },

    #[error("Upload of '{name}' was interrupted: {reason}")]
    UploadInterrupted { name: String, reason: String },

    #[error("Failed to convert {name}: {source}")]
    ConversionFailed {
        name: String,
        #[source]
        source: ConversionError,
    },

    #[error("Unsupported file type for preview.")]
    UnsupportedPreviewFormat { name: String },

    #[error("Failed to preview file: {source}")]
    PreviewFailed {
        #[source]
        source: ConversionError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyBatch => "missing_files",
            Self::TooManySources { .. } => "too_many_files",
            Self::PayloadTooLarge { .. } => "file_too_large",
            Self::InvalidSourceUrl { .. } => "invalid_url",
            Self::InvalidSourceScheme { .. } => "invalid_url_scheme",
            Self::SourceUnreachable { .. } => "download_error",
            Self::SourceRejected { .. } => "download_failed",
            Self::UploadInterrupted { .. } => "upload_failed",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::UnsupportedPreviewFormat { .. } => "unsupported_preview",
            Self::PreviewFailed { .. } => "preview_failed",
            Self::Storage(_) | Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SourceUnreachable { .. } | Self::SourceRejected { .. } => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_too_large_message() {
        let err = PipelineError::PayloadTooLarge {
            name: "big.csv".to_string(),
            limit: 500 * MIB,
        };
        assert_eq!(err.to_string(), "File 'big.csv' exceeds the 500 MB limit.");
        assert_eq!(err.code(), "file_too_large");
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_small_limits_are_reported_in_bytes() {
        let err = PipelineError::PayloadTooLarge {
            name: "big.csv".to_string(),
            limit: 16,
        };
        assert_eq!(err.to_string(), "File 'big.csv' exceeds the 16 bytes limit.");

        let uneven = PipelineError::PayloadTooLarge {
            name: "big.csv".to_string(),
            limit: MIB + 1,
        };
        assert_eq!(uneven.to_string(), "File 'big.csv' exceeds the 2 MB limit.");
    }

    #[test]
    fn test_conversion_failed_names_source_and_cause() {
        let err = PipelineError::ConversionFailed {
            name: "broken.parquet".to_string(),
            source: ConversionError::Engine("bad magic".to_string()),
        };
        assert_eq!(err.to_string(), "Failed to convert broken.parquet: bad magic");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_download_codes() {
        let unreachable = PipelineError::SourceUnreachable {
            url: "http://example.invalid".to_string(),
            reason: "timed out".to_string(),
        };
        let rejected = PipelineError::SourceRejected {
            url: "http://example.invalid".to_string(),
            status: 404,
        };
        assert_eq!(unreachable.code(), "download_error");
        assert_eq!(rejected.code(), "download_failed");
        assert_eq!(rejected.status(), StatusCode::BAD_GATEWAY);
    }
}
