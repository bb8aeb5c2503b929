//! queuewatch CLI
//!
//! Watches a chat feed for queue announcements and plays an alert.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use queuewatch_core::classifier::QueueClassifier;
use queuewatch_core::config::Config;
use queuewatch_core::controller::{ControllerConfig, ControllerDeps, SurveillanceController};
use queuewatch_core::interaction::{self, InteractionKind, InteractionSender};
use queuewatch_core::logging::{LogError, init_logging};
use queuewatch_core::platform::CommandAudio;
use queuewatch_core::settings::{FileSettingsStore, SettingsStore};
use queuewatch_core::sink::{JsonLinesSink, NotificationSink, TracingSink};
use queuewatch_core::source::JsonlFeedSource;

/// queuewatch - audible alerts when a retail queue opens
#[derive(Parser)]
#[command(name = "qw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "QW_CONFIG")]
    config: Option<PathBuf>,

    /// Settings file path (overrides the data directory default)
    #[arg(long, global = true, env = "QW_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a JSON-lines feed file and alert on queue announcements
    Watch {
        /// Feed file, re-read every check interval
        #[arg(long)]
        feed: PathBuf,

        /// Channel label reported in status events
        #[arg(long)]
        channel: Option<String>,

        /// Write status events to stdout as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Classify text against the configured queue rules
    Classify {
        /// Text to classify (one message per argument)
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Enable surveillance
    Enable,

    /// Disable surveillance
    Disable,

    /// Show persisted settings
    Status,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Validate the configuration
    Check,
    /// Print the default configuration file path
    Path,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        handle_fatal_error(&err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let Cli {
        verbose,
        config: config_path,
        settings: settings_override,
        command,
    } = Cli::parse();

    let mut config = Config::load_optional(config_path.as_deref())?;
    if verbose {
        config.general.log_level = "debug".to_string();
    }
    init_logging_from_config(&config)?;

    let settings_path = settings_override.unwrap_or_else(|| config.settings_path());

    match command {
        Commands::Watch {
            feed,
            channel,
            json,
        } => {
            if let Some(channel) = channel {
                config.feed.channel = channel;
            }
            run_watcher(&config, &settings_path, &feed, json).await?;
        }
        Commands::Classify { text } => {
            config.classifier.validate()?;
            let classifier = QueueClassifier::compile(&config.classifier)?;
            for message in &text {
                let result = classifier.classify(message);
                let record = serde_json::json!({
                    "text": message,
                    "classification": result.classification.to_string(),
                    "matched_text": result.matched_text,
                });
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::Enable => {
            let store = FileSettingsStore::open(&settings_path);
            store.set_enabled(true)?;
            println!("Surveillance enabled ({})", settings_path.display());
        }
        Commands::Disable => {
            let store = FileSettingsStore::open(&settings_path);
            store.set_enabled(false)?;
            println!("Surveillance disabled ({})", settings_path.display());
        }
        Commands::Status => {
            let store = FileSettingsStore::open(&settings_path);
            let settings = store.load()?;
            let record = serde_json::json!({
                "settings_path": settings_path.display().to_string(),
                "enabled": settings.enabled,
                "audio_permission": settings.audio_permission,
            });
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
            }
            ConfigCommands::Check => {
                config.validate()?;
                println!("Configuration OK");
            }
            ConfigCommands::Path => match queuewatch_core::config::default_config_path() {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("no configuration directory on this platform"),
            },
        },
    }

    Ok(())
}

fn init_logging_from_config(config: &Config) -> anyhow::Result<()> {
    match init_logging(&config.log_config()) {
        Ok(()) | Err(LogError::AlreadyInitialized) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn run_watcher(
    config: &Config,
    settings_path: &Path,
    feed: &Path,
    json: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let classifier = QueueClassifier::compile(&config.classifier)?;
    let controller_config = ControllerConfig::from(config);

    let audio = CommandAudio::new(controller_config.audio.asset_path.clone());
    tracing::info!(
        backend = %audio.backend(),
        feed = %feed.display(),
        settings = %settings_path.display(),
        "Starting watcher"
    );

    let store = Arc::new(FileSettingsStore::open(settings_path));
    let sink: Arc<dyn NotificationSink> = if json {
        Arc::new(JsonLinesSink::new(std::io::stdout()))
    } else {
        Arc::new(TracingSink)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresher = store.spawn_refresher(
        Duration::from_millis(config.feed.settings_poll_ms),
        shutdown_rx.clone(),
    );

    let (interactions, interaction_rx) = interaction::channel(16);
    tokio::spawn(forward_stdin(interactions));

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        let _ = shutdown_tx.send(true);
    });

    let mut controller = SurveillanceController::new(
        controller_config,
        classifier,
        ControllerDeps {
            source: Arc::new(JsonlFeedSource::new(feed)),
            settings: store,
            sink,
            audio: Arc::new(audio),
        },
    );
    let summary = controller.run(shutdown_rx, interaction_rx).await;

    if let Err(err) = refresher.await {
        tracing::warn!(error = %err, "Settings refresher did not stop cleanly");
    }
    tracing::info!(
        ticks = summary.ticks,
        detections = summary.detections,
        alerts_fired = summary.alerts_fired,
        alerts_queued = summary.alerts_queued,
        "Watcher shutdown complete"
    );
    Ok(())
}

/// Each stdin line counts as a user interaction. A line naming a kind
/// (`click`, `scroll`, ...) is forwarded as that kind.
async fn forward_stdin(interactions: InteractionSender) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let kind = line
                    .trim()
                    .parse::<InteractionKind>()
                    .unwrap_or(InteractionKind::Keydown);
                if !interactions.send(kind).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "Stopped reading stdin");
                break;
            }
        }
    }
}

fn handle_fatal_error(err: &anyhow::Error) {
    if let Some(core_err) = err.downcast_ref::<queuewatch_core::Error>() {
        eprintln!(
            "{}",
            queuewatch_core::error::format_error_with_remediation(core_err)
        );
    } else {
        eprintln!("Error: {err:#}");
    }
}
