//! Audio unlock state machine.
//!
//! Hosts with autoplay restrictions refuse audio until the user interacts.
//! [`AudioUnlock`] tracks whether sound is currently allowed, queues an alert
//! that could not be played, and replays it once after an interaction (or an
//! external permission grant) unlocks audio.
//!
//! ```text
//!            interaction             probe ok
//!   LOCKED ───────────────► UNLOCKING ────────► UNLOCKED (terminal)
//!     ▲                         │
//!     └──────── all fail ───────┘
//! ```
//!
//! A successful alert playback or a verified stored permission also moves
//! straight to UNLOCKED.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::Result;
use crate::error::{AudioError, ConfigError};
use crate::interaction::{InteractionKind, ListenerSet, Subscription};
use crate::logging::LogLevel;
use crate::platform::{PlatformAudio, ToneSpec};
use crate::settings::{SettingsStore, persist_audio_permission};
use crate::sink::{EventKind, NotificationSink, StatusEvent, emit_best_effort, log_best_effort};

const QUEUED_REASON: &str = "Audio policy blocking playback - waiting for user interaction";
const QUEUED_INSTRUCTIONS: &str = "Audio will play automatically after any interaction";

/// Audio configuration
///
/// ```toml
/// [audio]
/// asset_path = "~/sounds/alert.mp3"
/// alert_volume = 0.7
/// unlock_strategies = ["tone_probe", "asset_probe"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sound file played for alerts.
    pub asset_path: Option<PathBuf>,
    /// Volume for alert playback (0.0..=1.0).
    pub alert_volume: f32,
    /// Volume for the asset unlock probe (0.0..=1.0).
    pub probe_volume: f32,
    /// Delay before replaying a queued alert after an interaction unlock.
    pub interaction_replay_delay_ms: u64,
    /// Delay before replaying a queued alert after an external grant.
    pub permission_replay_delay_ms: u64,
    /// Interactions that attempt an unlock.
    pub interaction_kinds: Vec<InteractionKind>,
    /// Unlock attempts, in order.
    pub unlock_strategies: Vec<UnlockStrategy>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            asset_path: None,
            alert_volume: 0.7,
            probe_volume: 0.1,
            interaction_replay_delay_ms: 200,
            permission_replay_delay_ms: 500,
            interaction_kinds: InteractionKind::ALL.to_vec(),
            unlock_strategies: vec![UnlockStrategy::ToneProbe, UnlockStrategy::AssetProbe],
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, volume) in [
            ("alert_volume", self.alert_volume),
            ("probe_volume", self.probe_volume),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ConfigError::ValidationError(format!(
                    "audio.{name} must be between 0.0 and 1.0 (got {volume})"
                ))
                .into());
            }
        }
        if self.interaction_kinds.is_empty() {
            return Err(ConfigError::ValidationError(
                "audio.interaction_kinds must list at least one interaction".to_string(),
            )
            .into());
        }
        if self.unlock_strategies.is_empty() {
            return Err(ConfigError::ValidationError(
                "audio.unlock_strategies must list at least one strategy".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioState {
    Locked,
    Unlocking,
    Unlocked,
}

impl fmt::Display for AudioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Locked => "LOCKED",
            Self::Unlocking => "UNLOCKING",
            Self::Unlocked => "UNLOCKED",
        };
        f.write_str(s)
    }
}

/// One way of proving audio is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockStrategy {
    /// Near-silent synthesized tone.
    ToneProbe,
    /// Alert asset at probe volume.
    AssetProbe,
}

impl fmt::Display for UnlockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToneProbe => f.write_str("tone_probe"),
            Self::AssetProbe => f.write_str("asset_probe"),
        }
    }
}

/// Result of [`AudioUnlock::play_alert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The alert asset played.
    Played,
    /// The asset failed while unlocked; the beep fallback was used.
    Fallback { error: AudioError },
    /// Audio is locked; the alert waits for an interaction.
    Queued { error: AudioError },
}

/// Result of [`AudioUnlock::on_interaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// Not armed for this interaction.
    Ignored,
    Unlocked {
        strategy: UnlockStrategy,
        replay_scheduled: bool,
    },
    /// Every strategy failed; listeners are re-armed.
    Failed,
}

/// The unlock state machine. Lives for the whole controller lifetime.
pub struct AudioUnlock {
    config: AudioConfig,
    audio: Arc<dyn PlatformAudio>,
    settings: Arc<dyn SettingsStore>,
    sink: Arc<dyn NotificationSink>,
    state: AudioState,
    pending_alert: bool,
    listeners: ListenerSet,
    subscription: Option<Subscription>,
    replay_at_ms: Option<u64>,
}

impl fmt::Debug for AudioUnlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioUnlock")
            .field("backend", &self.audio.name())
            .field("state", &self.state)
            .field("pending_alert", &self.pending_alert)
            .field("listeners_armed", &self.listeners.is_armed())
            .field("replay_at_ms", &self.replay_at_ms)
            .finish_non_exhaustive()
    }
}

impl AudioUnlock {
    pub fn new(
        config: AudioConfig,
        audio: Arc<dyn PlatformAudio>,
        settings: Arc<dyn SettingsStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let listeners = ListenerSet::new(config.interaction_kinds.iter().copied());
        Self {
            config,
            audio,
            settings,
            sink,
            state: AudioState::Locked,
            pending_alert: false,
            listeners,
            subscription: None,
            replay_at_ms: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> AudioState {
        self.state
    }

    #[must_use]
    pub fn pending_alert(&self) -> bool {
        self.pending_alert
    }

    #[must_use]
    pub fn listeners_armed(&self) -> bool {
        self.listeners.is_armed()
    }

    /// Generation of the currently armed listener set, if any.
    #[must_use]
    pub fn listener_generation(&self) -> Option<u64> {
        self.subscription.map(|s| s.generation())
    }

    /// When the queued alert replay is due, if one is scheduled.
    #[must_use]
    pub fn replay_at_ms(&self) -> Option<u64> {
        self.replay_at_ms
    }

    #[must_use]
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Restore state from the stored permission flag.
    pub async fn initialize(&mut self, stored_permission: bool) {
        self.log(
            LogLevel::Debug,
            &format!("Stored audio permission: {stored_permission}"),
        );
        if !stored_permission {
            self.log(
                LogLevel::Info,
                "No audio permission yet - interact with the watcher to enable sound",
            );
            self.arm_listeners();
            return;
        }

        match self.audio.probe_active().await {
            Ok(()) => {
                self.transition(AudioState::Unlocked, "stored permission verified");
                self.release_listeners();
            }
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    &format!("Audio subsystem inactive - interaction required ({err})"),
                );
                self.transition(AudioState::Locked, "stored permission not usable");
                persist_audio_permission(self.settings.as_ref(), false);
                self.arm_listeners();
            }
        }
    }

    /// Play the alert, falling back or queueing as the state allows.
    pub async fn play_alert(&mut self, now_ms: u64) -> PlayOutcome {
        self.log(LogLevel::Info, "Attempting to play alert");
        match self.audio.play_asset(self.config.alert_volume).await {
            Ok(()) => {
                if self.state != AudioState::Unlocked {
                    self.transition(AudioState::Unlocked, "alert played");
                    self.release_listeners();
                }
                persist_audio_permission(self.settings.as_ref(), true);
                self.emit(EventKind::AlertPlayed, now_ms, json!({ "success": true }));
                PlayOutcome::Played
            }
            Err(err) if self.state == AudioState::Unlocked => {
                self.log(
                    LogLevel::Warn,
                    &format!("Alert audio failed, playing fallback beep: {err}"),
                );
                if let Err(beep_err) = self.audio.play_tone(ToneSpec::BEEP).await {
                    self.log(LogLevel::Error, &format!("Fallback beep failed: {beep_err}"));
                }
                self.emit(
                    EventKind::AlertPlayed,
                    now_ms,
                    json!({
                        "success": false,
                        "error": err.to_string(),
                        "fallback": "beep",
                    }),
                );
                PlayOutcome::Fallback { error: err }
            }
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    &format!("Queuing alert - audio locked ({err})"),
                );
                self.pending_alert = true;
                self.emit(
                    EventKind::AlertQueued,
                    now_ms,
                    json!({
                        "reason": QUEUED_REASON,
                        "instructions": QUEUED_INSTRUCTIONS,
                        "error": err.to_string(),
                    }),
                );
                self.arm_listeners();
                PlayOutcome::Queued { error: err }
            }
        }
    }

    /// Handle a user interaction forwarded by the host.
    pub async fn on_interaction(&mut self, kind: InteractionKind, now_ms: u64) -> UnlockOutcome {
        if self.state == AudioState::Unlocked {
            return UnlockOutcome::Ignored;
        }
        let Some(fired) = self.listeners.accept(kind) else {
            return UnlockOutcome::Ignored;
        };
        self.subscription = None;
        debug!(generation = fired.generation(), %kind, "Interaction listener fired");

        self.log(
            LogLevel::Info,
            &format!("User interaction detected: {kind} - unlocking audio"),
        );
        self.transition(AudioState::Unlocking, kind.as_str());

        let strategies = self.config.unlock_strategies.clone();
        for strategy in strategies {
            let attempt = match strategy {
                UnlockStrategy::ToneProbe => self.audio.play_tone(ToneSpec::PROBE).await,
                UnlockStrategy::AssetProbe => self.audio.play_asset(self.config.probe_volume).await,
            };
            match attempt {
                Ok(()) => {
                    self.transition(AudioState::Unlocked, &format!("{strategy} after {kind}"));
                    persist_audio_permission(self.settings.as_ref(), true);
                    let replay_scheduled =
                        self.schedule_replay(now_ms, self.config.interaction_replay_delay_ms);
                    return UnlockOutcome::Unlocked {
                        strategy,
                        replay_scheduled,
                    };
                }
                Err(err) => {
                    debug!(%strategy, error = %err, "Unlock strategy failed");
                    self.log(
                        LogLevel::Debug,
                        &format!("Unlock strategy {strategy} failed: {err}"),
                    );
                }
            }
        }

        self.log(LogLevel::Warn, "Audio unlock failed - waiting for next interaction");
        self.transition(AudioState::Locked, "all unlock strategies failed");
        self.arm_listeners();
        UnlockOutcome::Failed
    }

    /// Permission granted outside the interaction path (companion UI or
    /// settings edit). Returns whether a queued alert replay was scheduled.
    pub fn on_permission_granted(&mut self, now_ms: u64) -> bool {
        if self.state != AudioState::Unlocked {
            self.log(LogLevel::Info, "Audio permission granted externally");
            self.transition(AudioState::Unlocked, "permission granted");
            self.release_listeners();
        }
        self.schedule_replay(now_ms, self.config.permission_replay_delay_ms)
    }

    /// Consume the scheduled replay if it is due at `now_ms`.
    pub fn take_due_replay(&mut self, now_ms: u64) -> bool {
        match self.replay_at_ms {
            Some(due) if due <= now_ms => {
                self.replay_at_ms = None;
                true
            }
            _ => false,
        }
    }

    fn schedule_replay(&mut self, now_ms: u64, delay_ms: u64) -> bool {
        if !self.pending_alert {
            return false;
        }
        self.pending_alert = false;
        let due = now_ms.saturating_add(delay_ms);
        self.replay_at_ms = Some(due);
        self.log(LogLevel::Info, "Playing pending alert shortly");
        debug!(replay_at_ms = due, "Pending alert replay scheduled");
        true
    }

    fn arm_listeners(&mut self) {
        if self.listeners.is_armed() {
            return;
        }
        let kinds: Vec<&str> = self.listeners.kinds().map(InteractionKind::as_str).collect();
        self.subscription = Some(self.listeners.arm());
        self.log(
            LogLevel::Debug,
            &format!("Listening for interactions to unlock audio: {}", kinds.join(", ")),
        );
    }

    fn release_listeners(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.listeners.cancel(subscription);
        }
    }

    fn transition(&mut self, next: AudioState, cause: &str) {
        let previous = self.state;
        self.state = next;
        info!(
            audio_state = %next,
            previous = %previous,
            cause,
            "Audio state transition"
        );
        self.log(
            LogLevel::Info,
            &format!("Audio {previous} -> {next} ({cause})"),
        );
    }

    fn log(&self, level: LogLevel, message: &str) {
        log_best_effort(self.sink.as_ref(), level, message);
    }

    fn emit(&self, kind: EventKind, now_ms: u64, data: serde_json::Value) {
        emit_best_effort(self.sink.as_ref(), &StatusEvent::new(kind, now_ms, data));
    }
}
