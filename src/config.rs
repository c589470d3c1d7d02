use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisError;

/// Application-level constants
pub const APP_NAME: &str = "ecg-batch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Recording formats the inference engine accepts.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".csv", ".parquet", ".xml", ".npy"];

/// Model id sent when the caller selected no models.
pub const ALL_MODELS_SENTINEL: &str = "all";

/// Filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "ecg_batch=info,reqwest=warn"
}

/// Directory exports are written to.
///
/// Priority:
/// 1. `ECG_EXPORT_DIR` env var
/// 2. The user's download directory
/// 3. The current working directory
pub fn export_dir() -> PathBuf {
    export_dir_from(|key| std::env::var(key).ok())
}

/// Same resolution as [`export_dir`], reading variables through `lookup`.
pub fn export_dir_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = lookup("ECG_EXPORT_DIR").filter(|d| !d.trim().is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Connection settings for the remote inference engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Per-request timeout. A request that exceeds it fails the current item.
    pub timeout_secs: u64,
    /// Total attempts per recording (1 = no retry).
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout_secs: 300,
            max_retries: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ECG_ENGINE_*` environment variables.
    pub fn from_env() -> Result<Self, AnalysisError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AnalysisError> {
        let mut config = Self::default();

        if let Some(url) = lookup("ECG_ENGINE_URL") {
            if url.trim().is_empty() {
                return Err(AnalysisError::Config("ECG_ENGINE_URL is empty".into()));
            }
            config.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("ECG_ENGINE_TIMEOUT_SECS") {
            config.timeout_secs = parse_var("ECG_ENGINE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ECG_ENGINE_MAX_RETRIES") {
            config.max_retries = parse_var("ECG_ENGINE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("ECG_ENGINE_RETRY_DELAY_MS") {
            config.retry_delay_ms = parse_var("ECG_ENGINE_RETRY_DELAY_MS", &v)?;
        }

        if config.max_retries == 0 {
            return Err(AnalysisError::Config(
                "ECG_ENGINE_MAX_RETRIES must be at least 1".into(),
            ));
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AnalysisError> {
    value
        .trim()
        .parse()
        .map_err(|_| AnalysisError::Config(format!("{key} has invalid value '{value}'")))
}
