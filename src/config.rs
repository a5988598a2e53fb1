use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::MygeminiError;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_gemini_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_system_instruction() -> String {
    "You are a helpful assistant. Please answer all questions in Korean.".to_string()
}

fn default_gemini_timeout_ms() -> u64 {
    60000
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_gemini_endpoint(),
            model: default_gemini_model(),
            system_instruction: default_system_instruction(),
            timeout_ms: default_gemini_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeechConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_speech_lang")]
    pub lang: String,
    #[serde(default = "default_speech_tld")]
    pub tld: String,
    #[serde(default)]
    pub slow: bool,
    #[serde(default = "default_speech_temp_dir")]
    pub temp_dir: String,
}

fn default_true() -> bool {
    true
}

fn default_speech_lang() -> String {
    "ko".to_string()
}

fn default_speech_tld() -> String {
    "com".to_string()
}

fn default_speech_temp_dir() -> String {
    std::env::temp_dir()
        .join("mygemini")
        .to_string_lossy()
        .to_string()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lang: default_speech_lang(),
            tld: default_speech_tld(),
            slow: false,
            temp_dir: default_speech_temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_archive_path")]
    pub path: String,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
}

pub fn data_dir_fallback() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| {
        // $HOME/.local/share, not an unexpandable tilde
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    })
}

fn default_archive_path() -> String {
    data_dir_fallback()
        .join("mygemini/archive.db")
        .to_string_lossy()
        .to_string()
}

fn default_preview_chars() -> usize {
    50
}

fn default_max_entries() -> u32 {
    10000
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_archive_path(),
            preview_chars: default_preview_chars(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiConfig {
    /// GtkBuilder file; the bundled layout is used when unset.
    #[serde(default)]
    pub layout_file: Option<String>,
    #[serde(default = "default_window_title")]
    pub window_title: String,
}

fn default_window_title() -> String {
    "Gemini Q&A - model: {model}".to_string()
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            layout_file: None,
            window_title: default_window_title(),
        }
    }
}

impl UiConfig {
    pub fn title_for(&self, model: &str) -> String {
        self.window_title.replace("{model}", model)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig::default(),
            speech: SpeechConfig::default(),
            archive: ArchiveConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        Self::validate_config_path(path)?;

        if !path.exists() {
            debug!("Config file not found at {:?}, creating default", path);
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Config = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Take the API key from the environment when set (a `.env` file counts).
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            let key = key.trim();
            if !key.is_empty() {
                self.gemini.api_key = key.to_string();
            }
        }
    }

    /// Fails when no API key is configured. Checked before any window is built.
    pub fn require_api_key(&self) -> Result<()> {
        if self.gemini.api_key.trim().is_empty() {
            return Err(MygeminiError::Config(format!(
                "{} is not set in the environment, a .env file or the [gemini] config section",
                API_KEY_ENV
            ))
            .into());
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.gemini.model.trim().is_empty() {
            return Err(MygeminiError::Config("gemini model cannot be empty".to_string()).into());
        }
        if !self.gemini.endpoint.starts_with("http://")
            && !self.gemini.endpoint.starts_with("https://")
        {
            return Err(MygeminiError::Config(
                "gemini endpoint must be an http(s) URL".to_string(),
            )
            .into());
        }
        if self.gemini.timeout_ms < 1000 || self.gemini.timeout_ms > 300000 {
            return Err(MygeminiError::Config(
                "gemini timeout_ms must be between 1000 and 300000".to_string(),
            )
            .into());
        }

        if self.speech.lang.trim().is_empty() {
            return Err(MygeminiError::Config("speech lang cannot be empty".to_string()).into());
        }
        if self.speech.tld.trim().is_empty() || self.speech.tld.contains('/') {
            return Err(MygeminiError::Config(
                "speech tld must be a bare domain suffix such as \"com\"".to_string(),
            )
            .into());
        }
        if self.speech.temp_dir.contains("..") {
            return Err(MygeminiError::Config(
                "temp_dir cannot contain path traversal sequences".to_string(),
            )
            .into());
        }

        if self.archive.path.contains("..") {
            return Err(MygeminiError::Config(
                "archive path cannot contain path traversal sequences".to_string(),
            )
            .into());
        }
        if self.archive.preview_chars == 0 || self.archive.preview_chars > 1000 {
            return Err(MygeminiError::Config(
                "preview_chars must be between 1 and 1000".to_string(),
            )
            .into());
        }
        if self.archive.max_entries == 0 {
            return Err(MygeminiError::Config(
                "max_entries must be greater than 0".to_string(),
            )
            .into());
        }
        if self.archive.max_entries > 1_000_000 {
            return Err(MygeminiError::Config(
                "max_entries cannot exceed 1000000".to_string(),
            )
            .into());
        }

        Ok(())
    }

    fn validate_config_path(path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.contains("..") {
            return Err(MygeminiError::Config(
                "Config path cannot contain path traversal sequences".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
