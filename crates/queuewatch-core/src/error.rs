//! Error types for queuewatch-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for queuewatch-core
#[derive(Error, Debug)]
pub enum Error {
    /// Classifier rule errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Settings store errors
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Message source errors
    #[error("Message source error: {0}")]
    Source(#[from] SourceError),

    /// Platform audio errors
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (channel failures, task joins)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Pattern(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Settings(_) => Some(
                Remediation::new("Settings could not be read or written; defaults are in effect.")
                    .command("Show settings", "qw status")
                    .alternative("Delete the settings file to recreate it with defaults."),
            ),
            Self::Source(_) => Some(
                Remediation::new("The message feed could not be read. Check the feed path.")
                    .command("Show config", "qw config show")
                    .alternative("Pass --feed with a readable JSON-lines file."),
            ),
            Self::Audio(_) => Some(
                Remediation::new("Audio playback failed. Interact with the watcher to unlock audio.")
                    .alternative("Press Enter in the terminal running `qw watch`.")
                    .alternative("Check that the configured alert asset exists and a player is installed."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .alternative("Verify the data directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .alternative("Check for trailing commas or invalid UTF-8."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Restart the watcher and retry.")
                    .command("Restart", "qw watch"),
            ),
        }
    }
}

/// Classifier rule errors
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
}

impl PatternError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidRule(_) => Remediation::new("Queue rule invalid. Fix the rule definition.")
                .command("Check config", "qw config check")
                .alternative("Remove the rule from the [classifier] section."),
            Self::InvalidRegex(_) => Remediation::new("Queue rule regex invalid. Fix the regex.")
                .command("Check config", "qw config check")
                .alternative("Use a `contains` pattern instead of a regex."),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Check config", "qw config check")
                .alternative("Validate the TOML syntax."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .alternative("Recreate the config from known-good defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Check config", "qw config check")
            }
        }
    }
}

/// Settings store errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to persist settings to {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Corrupt settings file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Message source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Feed not readable: {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Message source unavailable: {0}")]
    Unavailable(String),
}

/// Platform audio errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Playback was refused until the user interacts with the host
    #[error("playback blocked by autoplay policy: {0}")]
    Blocked(String),

    /// The audio device or context is not running
    #[error("audio subsystem inactive: {0}")]
    Inactive(String),

    /// The asset could not be played
    #[error("playback failed: {0}")]
    PlaybackFailed(String),
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
