//! Structured logging for queuewatch
//!
//! Built on `tracing` with a pretty (interactive) or JSON (machine) format
//! and an optional append-only log file.
//!
//! # Usage
//!
//! ```ignore
//! use queuewatch_core::logging::{init_logging, LogConfig};
//! use queuewatch_core::config::LogFormat;
//!
//! let config = LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Pretty,
//!     file: None,
//! };
//! init_logging(&config)?;
//! ```
//!
//! # Correlation Fields
//!
//! Use these field names consistently in spans and events:
//! - `message_id`: Message identifier (decimal string)
//! - `classification`: Queue kind or `NONE`
//! - `decision`: Scheduler decision
//! - `audio_state`: Audio unlock state
//! - `phase`: Session phase

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Output format (pretty or json)
    pub format: LogFormat,

    /// Optional path to an append-only log file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Error type for logging initialization
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Open (or create) the append-only log file. New files are owner-only on
/// unix.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

/// Initialize the global logging subscriber.
///
/// Console output goes to stderr so stdout stays free for command output.
/// Call once at startup; later calls return
/// [`LogError::AlreadyInitialized`]. Example override:
/// `RUST_LOG=queuewatch_core=debug,qw=trace`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    let level: LogLevel = config
        .level
        .parse()
        .map_err(|_| LogError::InvalidLevel(config.level.clone()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let log_file = config
        .file
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(Mutex::new);
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => {
            let console = fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_span_events(FmtSpan::NONE);
            let file_layer = log_file.map(|file| {
                fmt::layer()
                    .with_writer(file)
                    .with_target(true)
                    .with_ansi(false)
            });
            registry.with(console).with(file_layer).try_init()?;
        }
        LogFormat::Json => {
            let console = fmt::layer()
                .json()
                .with_timer(SystemTime)
                .with_writer(io::stderr)
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true);
            let file_layer = log_file.map(|file| {
                fmt::layer()
                    .json()
                    .with_timer(SystemTime)
                    .with_writer(file)
                    .flatten_event(true)
            });
            registry.with(console).with(file_layer).try_init()?;
        }
    }

    let _ = LOGGING_INITIALIZED.set(true);
    tracing::info!(
        log_level = %level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

/// Severity used for filtering and for sink log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: {s}. Expected one of: trace, debug, info, warn, error"
            )),
        }
    }
}
