use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://busan-dream.co.kr";
pub const DEFAULT_QUESTION_PATH: &str = "/busan/interview/question";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Hard interview limit (2 min 30 s).
pub const INTERVIEW_TIME_LIMIT_SECS: u32 = 150;
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
pub const SNAPSHOT_LIMIT_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_PERMISSION_SETTLE_MS: u64 = 100;
pub const DEFAULT_MIC_POLL_INTERVAL_MS: u64 = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to save config: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub question_path: String,
    pub request_timeout_secs: u64,
    pub interview_time_limit_secs: u32,
    pub max_upload_bytes: u64,
    pub snapshot_limit_bytes: u64,
    pub permission_settle_ms: u64,
    pub mic_poll_interval_ms: u64,
    pub session_storage_path: Option<PathBuf>,
    pub download_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            question_path: DEFAULT_QUESTION_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            interview_time_limit_secs: INTERVIEW_TIME_LIMIT_SECS,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            snapshot_limit_bytes: SNAPSHOT_LIMIT_BYTES,
            permission_settle_ms: DEFAULT_PERMISSION_SETTLE_MS,
            mic_poll_interval_ms: DEFAULT_MIC_POLL_INTERVAL_MS,
            session_storage_path: None,
            download_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `.env` and process environment overrides.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Some(url) = env::var("INTERVIEW_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            config.api_base_url = url;
        }

        match env::var("INTERVIEW_REQUEST_TIMEOUT_SECS").map(|v| v.trim().parse::<u64>()) {
            Ok(Ok(secs)) => config.request_timeout_secs = secs,
            Ok(Err(e)) => tracing::warn!("Ignoring INTERVIEW_REQUEST_TIMEOUT_SECS: {}", e),
            Err(_) => {}
        }

        if let Ok(path) = env::var("INTERVIEW_SESSION_STORAGE") {
            config.session_storage_path = normalize_path(Some(PathBuf::from(path)));
        }

        if let Some(dir) = normalize_path(env::var("INTERVIEW_DOWNLOAD_DIR").ok().map(PathBuf::from))
        {
            config.download_dir = dir;
        }

        normalize_config(&mut config);
        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn permission_settle_delay(&self) -> Duration {
        Duration::from_millis(self.permission_settle_ms)
    }

    pub fn mic_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mic_poll_interval_ms)
    }
}

pub fn load_or_create(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        let config = AppConfig::default();
        save(path, &config)?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path).map_err(ConfigError::Read)?;
    match serde_json::from_str::<AppConfig>(&raw) {
        Ok(mut config) => {
            normalize_config(&mut config);
            Ok(config)
        }
        Err(e) => {
            tracing::warn!("Config at {} is unreadable ({}), recreating", path.display(), e);
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let config = AppConfig::default();
            save(path, &config)?;
            Ok(config)
        }
    }
}

pub fn save(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(ConfigError::Write)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).map_err(ConfigError::Write)
}

fn normalize_config(config: &mut AppConfig) {
    let trimmed = config.api_base_url.trim().trim_end_matches('/');
    config.api_base_url = if trimmed.is_empty() {
        DEFAULT_API_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    };

    let path = config.question_path.trim();
    config.question_path = if path.is_empty() {
        DEFAULT_QUESTION_PATH.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    if config.request_timeout_secs == 0 {
        config.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
    }
    if config.interview_time_limit_secs == 0 {
        config.interview_time_limit_secs = INTERVIEW_TIME_LIMIT_SECS;
    }
    if config.max_upload_bytes == 0 {
        config.max_upload_bytes = MAX_UPLOAD_BYTES;
    }
    if config.snapshot_limit_bytes == 0 {
        config.snapshot_limit_bytes = SNAPSHOT_LIMIT_BYTES;
    }
    if config.mic_poll_interval_ms == 0 {
        config.mic_poll_interval_ms = DEFAULT_MIC_POLL_INTERVAL_MS;
    }
    config.session_storage_path = normalize_path(config.session_storage_path.take());
}

fn normalize_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}
