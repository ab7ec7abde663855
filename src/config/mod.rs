use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Limits and collaborators for the conversion service
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum number of sources (uploads + URLs) per request (default: 5)
    pub max_sources_per_request: usize,

    /// Per-source byte ceiling enforced while streaming (default: 500 MiB)
    pub max_source_bytes: u64,

    /// Chunk size for every ingestion and output path (default: 64 KiB)
    pub transfer_chunk_bytes: usize,

    /// URL schemes accepted for remote sources (default: http, https)
    pub remote_allowed_schemes: Vec<String>,

    /// Connect + full transfer timeout for remote sources (default: 30s)
    pub remote_timeout_seconds: u64,

    /// Root for request-scoped temporary files (default: system temp dir)
    pub scratch_dir: Option<PathBuf>,

    /// JSON-lines file that receives accepted feedback (default: feedback.log)
    pub feedback_log_path: PathBuf,

    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub supabase_feedback_table: String,
    pub supabase_session_table: String,

    /// CORS origins, `*` allows any (default: *)
    pub allowed_origins: Vec<String>,

    /// Emit logs as JSON instead of the pretty format
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_sources_per_request: 5,
            max_source_bytes: 500 * 1024 * 1024, // 500 MiB
            transfer_chunk_bytes: 64 * 1024,     // 64 KiB
            remote_allowed_schemes: vec!["http".to_string(), "https".to_string()],
            remote_timeout_seconds: 30,
            scratch_dir: None,
            feedback_log_path: PathBuf::from("feedback.log"),
            supabase_url: None,
            supabase_service_role_key: None,
            supabase_feedback_table: "feedback".to_string(),
            supabase_session_table: "session_metrics".to_string(),
            allowed_origins: vec!["*".to_string()],
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_sources_per_request: env::var("MAX_SOURCES_PER_REQUEST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_sources_per_request),

            max_source_bytes: env::var("MAX_SOURCE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_source_bytes),

            transfer_chunk_bytes: env::var("TRANSFER_CHUNK_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.transfer_chunk_bytes),

            remote_allowed_schemes: env::var("REMOTE_ALLOWED_SCHEMES")
                .map(|v| split_list(&v, true))
                .unwrap_or(default.remote_allowed_schemes),

            remote_timeout_seconds: env::var("REMOTE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.remote_timeout_seconds),

            scratch_dir: env::var("SCRATCH_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),

            feedback_log_path: env::var("FEEDBACK_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.feedback_log_path),

            supabase_url: non_empty_var("SUPABASE_URL"),
            supabase_service_role_key: non_empty_var("SUPABASE_SERVICE_ROLE_KEY"),

            supabase_feedback_table: env::var("SUPABASE_FEEDBACK_TABLE")
                .unwrap_or(default.supabase_feedback_table),

            supabase_session_table: env::var("SUPABASE_SESSION_TABLE")
                .unwrap_or(default.supabase_session_table),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| split_list(&v, false))
                .unwrap_or(default.allowed_origins),

            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(default.json_logs),
        }
    }

    /// Deterministic configuration for tests: small limits, all temporary
    /// files under `scratch_dir`, no remote persistence.
    pub fn for_tests(scratch_dir: impl Into<PathBuf>) -> Self {
        let scratch_dir = scratch_dir.into();
        Self {
            max_source_bytes: 1024 * 1024,
            transfer_chunk_bytes: 4 * 1024,
            remote_timeout_seconds: 5,
            feedback_log_path: scratch_dir.join("feedback.log"),
            scratch_dir: Some(scratch_dir),
            ..Self::default()
        }
    }

    /// Reject limits the pipeline cannot operate with. Fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer_chunk_bytes == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "TRANSFER_CHUNK_BYTES must be positive".to_string(),
            ));
        }
        if self.max_sources_per_request == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "MAX_SOURCES_PER_REQUEST must be positive".to_string(),
            ));
        }
        if self.max_source_bytes == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "MAX_SOURCE_BYTES must be positive".to_string(),
            ));
        }
        if self.remote_timeout_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "REMOTE_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }
        if self.remote_allowed_schemes.is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "REMOTE_ALLOWED_SCHEMES must name at least one scheme".to_string(),
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_seconds)
    }

    /// Request body ceiling: every allowed source at full size plus multipart overhead.
    pub fn request_body_limit(&self) -> usize {
        let sources = self.max_sources_per_request as u64;
        let total = sources
            .saturating_mul(self.max_source_bytes)
            .saturating_add(10 * 1024 * 1024);
        usize::try_from(total).unwrap_or(usize::MAX)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str, lowercase: bool) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            if lowercase {
                v.to_ascii_lowercase()
            } else {
                v.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.max_sources_per_request, 5);
        assert_eq!(config.max_source_bytes, 500 * 1024 * 1024);
        assert_eq!(config.transfer_chunk_bytes, 65536);
        assert_eq!(config.remote_allowed_schemes, vec!["http", "https"]);
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let config = AppConfig {
            transfer_chunk_bytes: 0,
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TRANSFER_CHUNK_BYTES"));
    }

    #[test]
    fn test_empty_scheme_list_is_rejected() {
        let config = AppConfig {
            remote_allowed_schemes: Vec::new(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" HTTP, https ,,", true), vec!["http", "https"]);
        assert_eq!(
            split_list("http://a.test,http://B.test", false),
            vec!["http://a.test", "http://B.test"]
        );
    }

    #[test]
    fn test_body_limit_covers_all_sources() {
        let config = AppConfig::for_tests("/tmp/scratch");
        assert_eq!(
            config.request_body_limit(),
            5 * 1024 * 1024 + 10 * 1024 * 1024
        );
        assert!(config.supabase_url.is_none());
    }
}
