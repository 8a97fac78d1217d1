//! services/app/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use tracing::Level;

/// Directory holding `data.json` and `settings.json` when none is configured.
pub const DEFAULT_DATA_DIR: &str = "./tubestudy-data";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_level: Level,
    /// Overrides an empty OpenAI key in the stored settings.
    pub openai_api_key: Option<String>,
    /// Overrides an empty Gemini key in the stored settings.
    pub gemini_api_key: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let data_dir = std::env::var("TUBESTUDY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        if data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "TUBESTUDY_DATA_DIR".to_string(),
                "the data directory must not be empty".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = parse_log_level(&log_level_str)?;

        // Empty values behave like unset ones.
        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");

        Ok(Self {
            data_dir,
            log_level,
            openai_api_key,
            gemini_api_key,
        })
    }

    /// A configuration rooted at `data_dir` with no key overrides.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_level: Level::INFO,
            openai_api_key: None,
            gemini_api_key: None,
        }
    }
}

fn parse_log_level(value: &str) -> Result<Level, ConfigError> {
    value.parse::<Level>().map_err(|_| {
        ConfigError::InvalidValue(
            "RUST_LOG".to_string(),
            format!("'{}' is not a valid log level", value),
        )
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
