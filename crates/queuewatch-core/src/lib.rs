//! queuewatch-core: Core library for queuewatch
//!
//! Watches a chat feed for announcements that a retail queue has opened and
//! raises a debounced audible alert.
//!
//! # Architecture
//!
//! ```text
//! MessageSource → NoveltyTracker → QueueClassifier → AlertScheduler
//!                                                         ↓
//!        SettingsStore ⇄ SurveillanceController → AudioUnlock → PlatformAudio
//!                                   ↓
//!                           NotificationSink
//! ```
//!
//! # Modules
//!
//! - `message_id`: Numeric message ids with numeric ordering
//! - `novelty`: High-watermark tracking of unseen messages
//! - `classifier`: Ordered queue rules with skip strings
//! - `scheduler`: Grace period, debounce and verbosity decisions
//! - `interaction`: One-shot user interaction listeners
//! - `platform`: Audio playback backends
//! - `audio`: Audio unlock state machine with queued alert replay
//! - `settings`: Persisted `enabled` / `audio_permission` flags
//! - `sink`: Status events and log lines for observers
//! - `source`: Message snapshots (in-memory, JSON-lines feed)
//! - `controller`: The surveillance loop
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod audio;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod interaction;
pub mod logging;
pub mod message_id;
pub mod novelty;
pub mod platform;
pub mod scheduler;
pub mod settings;
pub mod sink;
pub mod source;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
