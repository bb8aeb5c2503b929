//! Surveillance loop controller.
//!
//! Owns one [`Session`] (novelty tracker plus alert scheduler) at a time and
//! the long-lived [`AudioUnlock`] machine. Each tick runs the pipeline:
//!
//! ```text
//! source ─► NoveltyTracker ─► QueueClassifier ─► AlertScheduler ─► AudioUnlock
//!              (new ids)          (labels)          (FIRE?)          (play/queue)
//! ```
//!
//! [`SurveillanceController::run`] drives everything from a single task:
//! tick timer, settings changes, user interactions, queued alert replays and
//! shutdown are multiplexed with `tokio::select!`, so core state is never
//! shared across tasks.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::audio::{AudioConfig, AudioState, AudioUnlock, PlayOutcome, UnlockOutcome};
use crate::classifier::{QueueClassifier, QueueKind};
use crate::config::Config;
use crate::interaction::{InteractionKind, InteractionReceiver};
use crate::logging::LogLevel;
use crate::message_id::{DEFAULT_ID_PREFIX, MessageId};
use crate::novelty::{Candidate, NoveltyTracker};
use crate::platform::PlatformAudio;
use crate::scheduler::{
    AlertEvent, AlertScheduler, Decision, SchedulerConfig, SessionPhase, Verbosity,
};
use crate::settings::{Settings, SettingsStore, load_or_default};
use crate::sink::{EventKind, NotificationSink, StatusEvent, emit_best_effort, log_best_effort};
use crate::source::{MessageContent, MessageSource};

/// Controller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub check_interval_ms: u64,
    pub scheduler: SchedulerConfig,
    pub id_prefix: String,
    pub channel: String,
    pub audio: AudioConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            scheduler: SchedulerConfig::default(),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            channel: "default".to_string(),
            audio: AudioConfig::default(),
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        let mut audio = config.audio.clone();
        audio.asset_path = config.audio_asset_path();
        Self {
            check_interval_ms: config.surveillance.check_interval_ms,
            scheduler: config.surveillance.scheduler(),
            id_prefix: config.feed.id_prefix.clone(),
            channel: config.feed.channel.clone(),
            audio,
        }
    }
}

/// Collaborators injected into the controller.
pub struct ControllerDeps {
    pub source: Arc<dyn MessageSource>,
    pub settings: Arc<dyn SettingsStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub audio: Arc<dyn PlatformAudio>,
}

/// Wall-clock milliseconds derived from the tokio clock, so paused-time
/// tests advance it deterministically.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_epoch_ms: u64,
    base: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::starting_at(epoch_ms())
    }
}

impl Clock {
    #[must_use]
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            base_epoch_ms: epoch_ms,
            base: Instant::now(),
        }
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.base_epoch_ms
            .saturating_add(self.base.elapsed().as_millis() as u64)
    }

    /// The tokio instant corresponding to `epoch_ms`.
    #[must_use]
    pub fn instant_at(&self, epoch_ms: u64) -> Instant {
        self.base + Duration::from_millis(epoch_ms.saturating_sub(self.base_epoch_ms))
    }
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// State for one surveillance run (start to stop).
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    started_at_ms: u64,
    tracker: NoveltyTracker,
    scheduler: AlertScheduler,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    #[must_use]
    pub fn tracker(&self) -> &NoveltyTracker {
        &self.tracker
    }

    #[must_use]
    pub fn scheduler(&self) -> &AlertScheduler {
        &self.scheduler
    }
}

/// A classified message from one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub message_id: MessageId,
    pub kind: QueueKind,
    pub decision: Decision,
    pub matched_text: String,
    /// Playback result when the decision was `Fire`.
    pub playback: Option<PlayOutcome>,
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub at_ms: u64,
    pub new_messages: usize,
    pub detections: Vec<Detection>,
    pub phase: SessionPhase,
    /// Quiet phase with nothing new to report.
    pub silent: bool,
    pub heartbeat: bool,
}

/// Totals returned by [`SurveillanceController::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub sessions_started: u64,
    pub new_messages: u64,
    pub detections: u64,
    pub alerts_fired: u64,
    pub alerts_queued: u64,
    pub replays: u64,
    pub interactions: u64,
}

/// The surveillance loop controller.
pub struct SurveillanceController {
    config: ControllerConfig,
    classifier: QueueClassifier,
    source: Arc<dyn MessageSource>,
    settings: Arc<dyn SettingsStore>,
    sink: Arc<dyn NotificationSink>,
    audio: AudioUnlock,
    audio_initialized: bool,
    session: Option<Session>,
    running: bool,
    next_session_id: u64,
    last_settings: Option<Settings>,
    clock: Clock,
    summary: RunSummary,
}

impl std::fmt::Debug for SurveillanceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurveillanceController")
            .field("config", &self.config)
            .field("running", &self.running)
            .field("session", &self.session.as_ref().map(Session::id))
            .field("audio", &self.audio)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl SurveillanceController {
    pub fn new(config: ControllerConfig, classifier: QueueClassifier, deps: ControllerDeps) -> Self {
        let audio = AudioUnlock::new(
            config.audio.clone(),
            deps.audio,
            Arc::clone(&deps.settings),
            Arc::clone(&deps.sink),
        );
        Self {
            config,
            classifier,
            source: deps.source,
            settings: deps.settings,
            sink: deps.sink,
            audio,
            audio_initialized: false,
            session: None,
            running: false,
            next_session_id: 1,
            last_settings: None,
            clock: Clock::default(),
            summary: RunSummary::default(),
        }
    }

    /// Replace the clock used by [`Self::run`].
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn audio(&self) -> &AudioUnlock {
        &self.audio
    }

    #[must_use]
    pub fn classifier(&self) -> &QueueClassifier {
        &self.classifier
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Swap the rule set. Takes effect on the next tick.
    pub fn reload_classifier(&mut self, classifier: QueueClassifier) {
        let kinds: Vec<String> = classifier.kinds().map(ToString::to_string).collect();
        info!(rules = ?kinds, "Classifier reloaded");
        self.classifier = classifier;
        self.log(LogLevel::Info, &format!("Queue rules reloaded: {}", kinds.join(", ")));
    }

    /// Restore audio state from the stored permission (once per controller).
    pub async fn initialize_audio(&mut self, stored_permission: bool) {
        if self.audio_initialized {
            return;
        }
        self.audio_initialized = true;
        self.audio.initialize(stored_permission).await;
    }

    /// Begin a fresh session at `now_ms`, replacing any current one.
    ///
    /// Messages already visible are marked as seen without alerting.
    pub fn start(&mut self, now_ms: u64) {
        let id = self.next_session_id;
        self.next_session_id += 1;

        self.log(LogLevel::Info, "Starting surveillance");
        let mut tracker = NoveltyTracker::new(self.config.id_prefix.clone());
        let candidates = self.enumerate_source();
        let marked = tracker.initialize(candidates.iter().map(|c| c.external_id.as_str()));
        self.log(
            LogLevel::Info,
            &format!("Marking {marked} existing messages as seen"),
        );

        self.session = Some(Session {
            id,
            started_at_ms: now_ms,
            tracker,
            scheduler: AlertScheduler::new(self.config.scheduler.clone(), now_ms),
        });
        self.running = true;
        self.summary.sessions_started += 1;

        info!(
            session = id,
            channel = %self.config.channel,
            check_interval_ms = self.config.check_interval_ms,
            existing = marked,
            "Surveillance active"
        );
        self.log(
            LogLevel::Info,
            &format!(
                "Surveillance active - checking every {}s",
                self.config.check_interval_ms / 1000
            ),
        );
        self.emit(
            EventKind::SurveillanceActive,
            now_ms,
            json!({
                "channel": self.config.channel,
                "session": id,
                "check_interval_ms": self.config.check_interval_ms,
                "existing_messages": marked,
            }),
        );
    }

    /// Stop ticking. Session state is kept until the next start.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!(session = ?self.session.as_ref().map(Session::id), "Surveillance stopped");
            self.log(LogLevel::Info, "Surveillance stopped");
        }
    }

    /// Run one scan at `now_ms`. Returns `None` while stopped.
    pub async fn tick(&mut self, now_ms: u64) -> Option<TickReport> {
        if !self.running {
            return None;
        }
        let candidates = self.enumerate_source();
        let session = self.session.as_mut()?;
        let fresh = session.tracker.poll(candidates);
        let verbosity = session.scheduler.verbosity(now_ms);
        let phase = session.scheduler.phase(now_ms);

        let mut detections = Vec::new();
        for message in &fresh {
            let result = self.classifier.classify_segments(&message.payload.texts);
            let Some(kind) = result.classification.kind() else {
                continue;
            };
            let decision = session
                .scheduler
                .evaluate_event(&AlertEvent::new(kind.clone(), now_ms));
            detections.push(Detection {
                message_id: message.id.clone(),
                kind: kind.clone(),
                decision,
                matched_text: result.matched_text,
                playback: None,
            });
        }
        let heartbeat = session.scheduler.heartbeat_due(now_ms);

        self.summary.ticks += 1;
        self.summary.new_messages += fresh.len() as u64;
        if fresh.is_empty() {
            if verbosity == Verbosity::Verbose {
                self.log(LogLevel::Info, "Scanning... no new messages");
            }
        } else if verbosity == Verbosity::Verbose {
            self.log(
                LogLevel::Info,
                &format!("Found {} new message(s)", fresh.len()),
            );
        }
        if heartbeat {
            self.log(LogLevel::Info, "Surveillance active (heartbeat)");
        }

        for detection in &mut detections {
            self.summary.detections += 1;
            info!(
                message_id = %detection.message_id,
                classification = %detection.kind,
                decision = %detection.decision,
                "Queue detected"
            );
            // Quiet phase only reports alerts that actually fire.
            if verbosity == Verbosity::Verbose || detection.decision == Decision::Fire {
                self.log(
                    LogLevel::Info,
                    &format!(
                        "{} QUEUE DETECTED ({}) - {}",
                        detection.kind, detection.decision, detection.matched_text
                    ),
                );
            }
            self.emit(
                EventKind::Detected(detection.kind.clone()),
                now_ms,
                json!({
                    "message_id": detection.message_id.as_str(),
                    "type": detection.kind.as_str(),
                    "decision": detection.decision,
                    "text": detection.matched_text,
                }),
            );
            if detection.decision == Decision::Fire {
                let outcome = self.play_alert(now_ms).await;
                detection.playback = Some(outcome);
            }
        }

        let silent = phase == SessionPhase::Quiet && fresh.is_empty();
        self.emit(
            EventKind::ScanComplete,
            now_ms,
            json!({
                "channel": self.config.channel,
                "new_messages": fresh.len(),
                "silent": silent,
                "phase": phase,
            }),
        );

        Some(TickReport {
            at_ms: now_ms,
            new_messages: fresh.len(),
            detections,
            phase,
            silent,
            heartbeat,
        })
    }

    /// Forward a user interaction to the audio machine.
    pub async fn handle_interaction(&mut self, kind: InteractionKind, now_ms: u64) -> UnlockOutcome {
        let outcome = self.audio.on_interaction(kind, now_ms).await;
        if outcome != UnlockOutcome::Ignored {
            self.summary.interactions += 1;
        }
        outcome
    }

    /// React to a settings snapshot: `enabled` transitions start or stop
    /// surveillance, and a newly granted audio permission unlocks audio.
    pub fn apply_settings(&mut self, settings: Settings, now_ms: u64) {
        let previous = self.last_settings.replace(settings);
        let enabled_changed = previous.is_none_or(|p| p.enabled != settings.enabled);

        if enabled_changed {
            self.log(
                LogLevel::Info,
                &format!("Extension enabled: {}", settings.enabled),
            );
            if settings.enabled {
                self.start(now_ms);
                self.emit(
                    EventKind::ExtensionEnabled,
                    now_ms,
                    json!({ "channel": self.config.channel }),
                );
            } else {
                self.stop();
                self.emit(EventKind::ExtensionDisabled, now_ms, json!({}));
            }
        }

        // The first snapshot only records the stored flag; a grant is a
        // false -> true change seen afterwards.
        let granted = settings.audio_permission && previous.is_some_and(|p| !p.audio_permission);
        if granted && self.audio.state() != AudioState::Unlocked {
            self.audio.on_permission_granted(now_ms);
        }
    }

    /// Play the queued alert if its replay is due.
    pub async fn replay_if_due(&mut self, now_ms: u64) -> Option<PlayOutcome> {
        if !self.audio.take_due_replay(now_ms) {
            return None;
        }
        self.summary.replays += 1;
        self.log(LogLevel::Info, "Playing pending alert");
        Some(self.play_alert(now_ms).await)
    }

    /// Drive the controller until `shutdown` flips to true (or its sender
    /// is dropped).
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
        mut interactions: InteractionReceiver,
    ) -> RunSummary {
        let stored = load_or_default(self.settings.as_ref());
        self.initialize_audio(stored.audio_permission).await;

        // Initialization may have revoked the stored permission.
        let mut settings_rx = self.settings.subscribe();
        let initial = load_or_default(self.settings.as_ref());
        self.last_settings = None;
        self.apply_settings(initial, self.clock.now_ms());

        let mut ticker = None;
        let mut ticker_session = None;
        let mut settings_open = true;
        let mut interactions_open = true;

        loop {
            if !self.running {
                ticker = None;
            } else {
                let current = self.session.as_ref().map(Session::id);
                if ticker.is_none() || ticker_session != current {
                    ticker = Some(self.new_interval());
                    ticker_session = current;
                }
            }
            let replay_deadline = self
                .audio
                .replay_at_ms()
                .map(|ms| self.clock.instant_at(ms));

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Surveillance controller shutting down");
                        break;
                    }
                }
                () = next_tick(&mut ticker) => {
                    let now = self.clock.now_ms();
                    self.tick(now).await;
                }
                changed = settings_rx.changed(), if settings_open => {
                    if changed.is_ok() {
                        let settings = *settings_rx.borrow_and_update();
                        self.apply_settings(settings, self.clock.now_ms());
                    } else {
                        warn!("Settings store closed; keeping current state");
                        settings_open = false;
                    }
                }
                received = interactions.recv(), if interactions_open => {
                    match received {
                        Some(kind) => {
                            let now = self.clock.now_ms();
                            self.handle_interaction(kind, now).await;
                        }
                        None => {
                            debug!("Interaction channel closed");
                            interactions_open = false;
                        }
                    }
                }
                () = sleep_until_opt(replay_deadline) => {
                    let now = self.clock.now_ms();
                    self.replay_if_due(now).await;
                }
            }
        }

        self.stop();
        self.summary
    }

    async fn play_alert(&mut self, now_ms: u64) -> PlayOutcome {
        let outcome = self.audio.play_alert(now_ms).await;
        match outcome {
            PlayOutcome::Queued { .. } => self.summary.alerts_queued += 1,
            PlayOutcome::Played | PlayOutcome::Fallback { .. } => self.summary.alerts_fired += 1,
        }
        outcome
    }

    fn new_interval(&self) -> Interval {
        let period = Duration::from_millis(self.config.check_interval_ms.max(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn enumerate_source(&self) -> Vec<Candidate<MessageContent>> {
        match self.source.enumerate() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "Message source failed; scanning nothing this tick");
                Vec::new()
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        log_best_effort(self.sink.as_ref(), level, message);
    }

    fn emit(&self, kind: EventKind, now_ms: u64, data: serde_json::Value) {
        emit_best_effort(self.sink.as_ref(), &StatusEvent::new(kind, now_ms, data));
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
