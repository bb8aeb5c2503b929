//! Configuration management for queuewatch
//!
//! Handles loading and validating `queuewatch.toml`. Every section is
//! optional and falls back to the defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::audio::AudioConfig;
use crate::classifier::ClassifierConfig;
use crate::error::ConfigError;
use crate::logging::{LogConfig, LogLevel};
use crate::message_id::DEFAULT_ID_PREFIX;
use crate::scheduler::{DebounceScope, SchedulerConfig};

/// Name of the config file looked up in the working directory and the user
/// config directory.
pub const CONFIG_FILE_NAME: &str = "queuewatch.toml";

// =============================================================================
// Main Config
// =============================================================================

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging and data directory
    pub general: GeneralConfig,

    /// Scan interval and alert windows
    pub surveillance: SurveillanceConfig,

    /// Queue rules
    pub classifier: ClassifierConfig,

    /// Alert playback and unlock behavior
    pub audio: AudioConfig,

    /// Message feed parsing
    pub feed: FeedConfig,
}

// =============================================================================
// General Config
// =============================================================================

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format (default for interactive use)
    #[default]
    Pretty,
    /// Machine-parseable JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ParseFailed(format!(
                "invalid log format: {other} (expected 'pretty' or 'json')"
            ))),
        }
    }
}

/// General configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Log format: pretty or json
    pub log_format: LogFormat,

    /// Optional log file path (supports ~ expansion)
    pub log_file: Option<String>,

    /// Data directory holding the settings file (supports ~ expansion)
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            log_file: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    #[cfg(target_os = "macos")]
    {
        "~/Library/Application Support/queuewatch".to_string()
    }
    #[cfg(not(target_os = "macos"))]
    {
        "~/.local/share/queuewatch".to_string()
    }
}

// =============================================================================
// Surveillance Config
// =============================================================================

/// Scan cadence and alert windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveillanceConfig {
    /// Time between scans
    pub check_interval_ms: u64,

    /// Detections are ignored for this long after surveillance starts
    pub grace_period_ms: u64,

    /// Minimum spacing between alerts
    pub debounce_ms: u64,

    /// Detailed scan logging lasts this long after surveillance starts
    pub verbose_logging_ms: u64,

    /// Quiet-mode heartbeat spacing
    pub pulse_interval_ms: u64,

    /// Whether debounce is shared by all queue kinds
    pub debounce_scope: DebounceScope,
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            check_interval_ms: 5_000,
            grace_period_ms: scheduler.grace_period_ms,
            debounce_ms: scheduler.debounce_ms,
            verbose_logging_ms: scheduler.verbose_logging_ms,
            pulse_interval_ms: scheduler.pulse_interval_ms,
            debounce_scope: scheduler.debounce_scope,
        }
    }
}

impl SurveillanceConfig {
    /// Scheduler windows derived from this section.
    #[must_use]
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            grace_period_ms: self.grace_period_ms,
            debounce_ms: self.debounce_ms,
            verbose_logging_ms: self.verbose_logging_ms,
            pulse_interval_ms: self.pulse_interval_ms,
            debounce_scope: self.debounce_scope,
        }
    }
}

// =============================================================================
// Feed Config
// =============================================================================

/// Message feed configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Prefix stripped from external message ids before parsing
    pub id_prefix: String,

    /// Channel label included in status events
    pub channel: String,

    /// How often the settings file is re-read for external edits
    pub settings_poll_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            channel: "default".to_string(),
            settings_poll_ms: 1_000,
        }
    }
}

// =============================================================================
// Config Loading
// =============================================================================

impl Config {
    /// Load configuration from `./queuewatch.toml`, then the user config
    /// directory, falling back to defaults.
    pub fn load() -> Result<Self> {
        let cwd_config = Path::new(CONFIG_FILE_NAME);
        if cwd_config.exists() {
            return Self::load_from(cwd_config);
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Load from an explicit path when given, otherwise search the defaults.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    /// Validate value ranges and compile the classifier rules.
    pub fn validate(&self) -> Result<()> {
        if self.general.log_level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "general.log_level '{}' is not a valid level",
                self.general.log_level
            ))
            .into());
        }

        if self.surveillance.check_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "surveillance.check_interval_ms must be >= 1".to_string(),
            )
            .into());
        }

        if self.surveillance.pulse_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "surveillance.pulse_interval_ms must be >= 1".to_string(),
            )
            .into());
        }

        if self.feed.settings_poll_ms == 0 {
            return Err(
                ConfigError::ValidationError("feed.settings_poll_ms must be >= 1".to_string()).into(),
            );
        }

        self.classifier.validate()?;
        self.audio.validate()?;
        Ok(())
    }

    /// Logging settings for [`crate::logging::init_logging`].
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.general.log_level.clone(),
            format: self.general.log_format,
            file: self.general.log_file.as_deref().map(expand_tilde),
        }
    }

    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }

    /// Default settings file inside the data directory.
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir().join("settings.json")
    }

    /// Resolved alert asset path.
    #[must_use]
    pub fn audio_asset_path(&self) -> Option<PathBuf> {
        self.audio
            .asset_path
            .as_deref()
            .map(|p| expand_tilde(&p.to_string_lossy()))
    }
}

/// User config file location (`$XDG_CONFIG_HOME/queuewatch/queuewatch.toml`
/// or the platform equivalent).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs_config_path().map(|dir| dir.join(CONFIG_FILE_NAME))
}

fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support").join("queuewatch"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .map(|p| p.join("queuewatch"))
    }
}

/// Expand a leading `~` to the home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(suffix) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(suffix);
        }
    }
    PathBuf::from(path)
}
