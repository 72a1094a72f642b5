//! services/client/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use gutachter_core::UploadLimits;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub storage_dir: PathBuf,
    pub log_level: Level,
    pub upload_limits: UploadLimits,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Backend Settings ---
        let api_base_url = std::env::var("API_BASE_URL")
            .map_err(|_| ConfigError::MissingVar("API_BASE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", 30)?;

        // --- Load Local Storage Settings ---
        let storage_dir = std::env::var("STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.gutachter"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Upload Ceilings ---
        // The two flows deliberately carry separate ceilings; see DESIGN.md.
        let chat_attachment_max_mb: u64 = parse_var("CHAT_ATTACHMENT_MAX_MB", 10)?;
        let document_file_max_mb: u64 = parse_var("DOCUMENT_FILE_MAX_MB", 25)?;
        let upload_limits = UploadLimits {
            chat_attachment_max_bytes: chat_attachment_max_mb * 1024 * 1024,
            document_file_max_bytes: document_file_max_mb * 1024 * 1024,
        };

        Ok(Self {
            api_base_url,
            request_timeout_secs,
            storage_dir,
            log_level,
            upload_limits,
        })
    }
}

fn parse_var(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
