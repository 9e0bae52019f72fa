//! Typed configuration from `config.toml` plus environment overrides.
//!
//! Loads once at startup. Every field has a default, so a missing file is a
//! valid (if webhook-less) configuration. The webhook URL is wrapped in
//! `secrecy::SecretString` so it never lands in logs.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths::{self, Layout};
use crate::queue::{DEFAULT_JOB_GLOB, ReapAction};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "ONDL_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ondl: RootsConfig,
    pub tools: ToolsConfig,
    pub queue: QueueConfig,
    pub preview: PreviewConfig,
    pub discord: DiscordConfig,
    pub telemetry: TelemetrySettings,

    /// Directory the config file was read from; relative paths resolve here.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    /// Empty means the OS-specific default.
    pub state_root: String,
    /// Empty means `~/Downloads/OnDL`.
    pub download_root: String,
}

/// Optional explicit tool paths. Empty entries are resolved via `PATH`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_per_run: usize,
    pub job_glob: String,
    /// Zero or less disables the reaper.
    pub stale_processing_minutes: i64,
    pub stale_processing_action: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_per_run: 5,
            job_glob: DEFAULT_JOB_GLOB.to_string(),
            stale_processing_minutes: 0,
            stale_processing_action: "requeue".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn reap_action(&self) -> Result<ReapAction> {
        self.stale_processing_action.parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
    pub gif_seconds: f64,
    pub gif_fps: u32,
    pub gif_width: u32,
    pub gif_max_bytes: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gif_seconds: 4.0,
            gif_fps: 12,
            gif_width: 480,
            // Comfortably under Discord's upload limit.
            gif_max_bytes: 7_864_320,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub webhook_url: Option<SecretString>,
    pub username: String,
    pub avatar_url: String,
    pub author_icon_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse TOML text. `base_dir` anchors relative paths.
    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config =
            toml::from_str(text).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Read a config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml(&text, &base)
    }

    /// Locate and load configuration, then apply environment overrides.
    ///
    /// Lookup order: `explicit`, then `$ONDL_CONFIG`, then `./config.toml`,
    /// then built-in defaults. In local dev, call `dotenvy::dotenv().ok()`
    /// before this.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = env_var(CONFIG_ENV).map(|p| paths::expand_user(&p));
        let local = PathBuf::from("config.toml");

        let mut config = match (explicit, from_env) {
            (Some(path), _) => Self::from_file(path)?,
            (None, Some(path)) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "{CONFIG_ENV} points to missing file: {}",
                        path.display()
                    )));
                }
                Self::from_file(&path)?
            }
            (None, None) if local.exists() => Self::from_file(&local)?,
            (None, None) => Config {
                base_dir: std::env::current_dir()?,
                ..Config::default()
            },
        };

        config.apply_env();
        Ok(config)
    }

    /// Environment values win over the file.
    pub fn apply_env(&mut self) {
        if let Some(url) = env_var("ONDL_DISCORD_WEBHOOK_URL") {
            self.discord.webhook_url = Some(SecretString::from(url));
        }
        if let Some(endpoint) = env_var("OTEL_ENDPOINT") {
            self.telemetry.otel_endpoint = Some(endpoint);
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            self.telemetry.log_level = level;
        }
    }

    fn validate(&self) -> Result<()> {
        self.queue.reap_action()?;
        if self.queue.job_glob.trim().is_empty() {
            return Err(Error::Config("queue.job_glob must not be empty".to_string()));
        }
        if self.preview.gif_fps == 0 || self.preview.gif_width == 0 {
            return Err(Error::Config(
                "preview.gif_fps and preview.gif_width must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn state_root(&self) -> PathBuf {
        match self.ondl.state_root.trim() {
            "" => paths::default_state_root(),
            raw => paths::resolve_path(raw, &self.base_dir),
        }
    }

    pub fn download_root(&self) -> PathBuf {
        match self.ondl.download_root.trim() {
            "" => paths::default_download_root(),
            raw => paths::resolve_path(raw, &self.base_dir),
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.state_root(), self.download_root())
    }
}

/// Trimmed environment variable, `None` when unset or blank.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
