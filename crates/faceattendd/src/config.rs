use faceattend_core::{DedupScope, LlmSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration.
///
/// Resolved from defaults, then an optional TOML file, then `FACEATTEND_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Path to the SQLite store.
    pub db_path: PathBuf,
    /// Period of the recognition poll loop.
    pub recognition_interval_ms: u64,
    /// Frames discarded right after opening the webcam (auto-exposure settling).
    pub warmup_frames: usize,
    /// Raw captures tried per request before giving up on dark frames.
    pub capture_attempts: usize,
    /// JPEG quality for frames sent to the oracle.
    pub jpeg_quality: u8,
    /// Whether "already marked" means today or ever.
    pub dedup_scope: DedupScope,
    /// Base URL of the OpenAI-compatible endpoint.
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    /// Timeout in seconds for a single oracle call.
    pub llm_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let llm = LlmSettings::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            db_path: faceattend_core::default_db_path(),
            recognition_interval_ms: 2000,
            warmup_frames: 4,
            capture_attempts: 3,
            jpeg_quality: 85,
            dedup_scope: DedupScope::PerDay,
            llm_base_url: llm.base_url,
            llm_model: llm.model,
            llm_api_key: None,
            llm_timeout_secs: llm.timeout.as_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl Config {
    /// Load from the config file (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let mut config = match &path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        if let Some(p) = path.filter(|p| p.exists()) {
            tracing::info!(path = %p.display(), "config file loaded");
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values found through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FACEATTEND_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEATTEND_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEATTEND_RECOGNITION_INTERVAL_MS") {
            self.recognition_interval_ms = parse("FACEATTEND_RECOGNITION_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("FACEATTEND_WARMUP_FRAMES") {
            self.warmup_frames = parse("FACEATTEND_WARMUP_FRAMES", &v)?;
        }
        if let Some(v) = lookup("FACEATTEND_CAPTURE_ATTEMPTS") {
            self.capture_attempts = parse("FACEATTEND_CAPTURE_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("FACEATTEND_JPEG_QUALITY") {
            self.jpeg_quality = parse("FACEATTEND_JPEG_QUALITY", &v)?;
        }
        if let Some(v) = lookup("FACEATTEND_DEDUP_SCOPE") {
            self.dedup_scope = v.parse().map_err(|message| ConfigError::Invalid {
                key: "FACEATTEND_DEDUP_SCOPE",
                message,
            })?;
        }
        if let Some(v) = lookup("FACEATTEND_LLM_BASE_URL") {
            self.llm_base_url = v;
        }
        if let Some(v) = lookup("FACEATTEND_LLM_MODEL") {
            self.llm_model = v;
        }
        if let Some(v) = lookup("FACEATTEND_LLM_TIMEOUT_SECS") {
            self.llm_timeout_secs = parse("FACEATTEND_LLM_TIMEOUT_SECS", &v)?;
        }
        let key = ["FACEATTEND_API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"]
            .iter()
            .find_map(|k| lookup(k).filter(|v| !v.trim().is_empty()));
        if key.is_some() {
            self.llm_api_key = key;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recognition_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "recognition_interval_ms",
                message: "must be greater than zero".into(),
            });
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "jpeg_quality",
                message: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }
        if self.llm_model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "llm_model",
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn recognition_interval(&self) -> Duration {
        Duration::from_millis(self.recognition_interval_ms)
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            base_url: self.llm_base_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            timeout: Duration::from_secs(self.llm_timeout_secs),
        }
    }
}

/// `FACEATTEND_CONFIG`, else `$XDG_CONFIG_HOME/faceattend/config.toml`.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("FACEATTEND_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("faceattend").join("config.toml"))
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("{value:?}: {e}"),
    })
}
