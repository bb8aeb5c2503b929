//! Alert scheduling: grace period, debounce and log verbosity.
//!
//! The scheduler turns "a queue was detected at `now`" into a [`Decision`].
//! It owns no clock; every call takes the current epoch milliseconds so the
//! windows are deterministic under test.
//!
//! Windows, all measured from `session_start_ms`:
//! - `[0, grace)`: every detection is suppressed and nothing is recorded.
//! - after grace: at most one alert per debounce window per key, where the
//!   key is global or per classification ([`DebounceScope`]).
//! - `[0, verbose)`: detailed scan logging; afterwards quiet mode with a
//!   heartbeat at most once per pulse interval.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::QueueKind;

/// Timing windows and debounce scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Detections are ignored for this long after a session starts.
    pub grace_period_ms: u64,
    /// Minimum spacing between alerts sharing a debounce key.
    pub debounce_ms: u64,
    /// Detailed scan logging lasts this long after a session starts.
    pub verbose_logging_ms: u64,
    /// Minimum spacing between quiet-mode heartbeats.
    pub pulse_interval_ms: u64,
    /// Whether the debounce window is shared by all queue kinds.
    pub debounce_scope: DebounceScope,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 20_000,
            debounce_ms: 30_000,
            verbose_logging_ms: 60_000,
            pulse_interval_ms: 300_000,
            debounce_scope: DebounceScope::Global,
        }
    }
}

/// Key under which alert times are recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebounceScope {
    /// One window for every queue kind: a Costco alert silences a Target
    /// alert that follows within the window.
    #[default]
    Global,
    /// Independent window per queue kind.
    PerClassification,
}

/// Outcome of [`AlertScheduler::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Fire,
    SuppressGrace,
    SuppressDebounce,
}

impl Decision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fire => "FIRE",
            Self::SuppressGrace => "SUPPRESS_GRACE",
            Self::SuppressDebounce => "SUPPRESS_DEBOUNCE",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Verbose,
    Quiet,
}

/// Session phase derived from elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Grace,
    Verbose,
    Quiet,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Grace => "GRACE",
            Self::Verbose => "VERBOSE",
            Self::Quiet => "QUIET",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub fired: u64,
    pub suppressed_grace: u64,
    pub suppressed_debounce: u64,
    pub heartbeats: u64,
}

/// A detected queue, as handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub classification: QueueKind,
    pub first_seen_at_ms: u64,
}

impl AlertEvent {
    #[must_use]
    pub fn new(classification: QueueKind, first_seen_at_ms: u64) -> Self {
        Self {
            classification,
            first_seen_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DebounceKey {
    Global,
    Kind(QueueKind),
}

/// Per-session alert gate.
#[derive(Debug, Clone)]
pub struct AlertScheduler {
    config: SchedulerConfig,
    session_start_ms: u64,
    last_alert_at: HashMap<DebounceKey, u64>,
    last_heartbeat_at_ms: Option<u64>,
    stats: SchedulerStats,
}

impl AlertScheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig, session_start_ms: u64) -> Self {
        Self {
            config,
            session_start_ms,
            last_alert_at: HashMap::new(),
            last_heartbeat_at_ms: None,
            stats: SchedulerStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn session_start_ms(&self) -> u64 {
        self.session_start_ms
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Time of the last fired alert for `kind` under the configured scope.
    #[must_use]
    pub fn last_alert_at(&self, kind: &QueueKind) -> Option<u64> {
        self.last_alert_at.get(&self.key_for(kind)).copied()
    }

    /// Decide whether a detection of `kind` at `now_ms` should alert.
    ///
    /// Only `Fire` records state; suppressed detections are consumed.
    pub fn evaluate(&mut self, now_ms: u64, kind: &QueueKind) -> Decision {
        if self.elapsed(now_ms) < self.config.grace_period_ms {
            self.stats.suppressed_grace += 1;
            debug!(classification = %kind, "Alert suppressed during grace period");
            return Decision::SuppressGrace;
        }

        let key = self.key_for(kind);
        if let Some(&last) = self.last_alert_at.get(&key) {
            if now_ms.saturating_sub(last) < self.config.debounce_ms {
                self.stats.suppressed_debounce += 1;
                debug!(
                    classification = %kind,
                    since_last_ms = now_ms.saturating_sub(last),
                    "Alert suppressed by debounce"
                );
                return Decision::SuppressDebounce;
            }
        }

        self.last_alert_at.insert(key, now_ms);
        self.stats.fired += 1;
        Decision::Fire
    }

    /// [`Self::evaluate`] at the time the event was first seen.
    pub fn evaluate_event(&mut self, event: &AlertEvent) -> Decision {
        self.evaluate(event.first_seen_at_ms, &event.classification)
    }

    #[must_use]
    pub fn verbosity(&self, now_ms: u64) -> Verbosity {
        if self.elapsed(now_ms) < self.config.verbose_logging_ms {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    #[must_use]
    pub fn phase(&self, now_ms: u64) -> SessionPhase {
        let elapsed = self.elapsed(now_ms);
        if elapsed < self.config.grace_period_ms {
            SessionPhase::Grace
        } else if elapsed < self.config.verbose_logging_ms {
            SessionPhase::Verbose
        } else {
            SessionPhase::Quiet
        }
    }

    /// Whether a quiet-mode heartbeat should be emitted now. Records the
    /// heartbeat when it returns true.
    pub fn heartbeat_due(&mut self, now_ms: u64) -> bool {
        if self.verbosity(now_ms) != Verbosity::Quiet {
            return false;
        }
        let due = self
            .last_heartbeat_at_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.config.pulse_interval_ms);
        if due {
            self.last_heartbeat_at_ms = Some(now_ms);
            self.stats.heartbeats += 1;
        }
        due
    }

    fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.session_start_ms)
    }

    fn key_for(&self, kind: &QueueKind) -> DebounceKey {
        match self.config.debounce_scope {
            DebounceScope::Global => DebounceKey::Global,
            DebounceScope::PerClassification => DebounceKey::Kind(kind.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn costco() -> QueueKind {
        QueueKind::new("COSTCO")
    }

    fn target() -> QueueKind {
        QueueKind::new("TARGET")
    }

    #[test]
    fn grace_period_suppresses_without_recording() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        assert_eq!(s.evaluate(5_000, &costco()), Decision::SuppressGrace);
        assert_eq!(s.last_alert_at(&costco()), None);
        // The suppressed detection does not start a debounce window.
        assert_eq!(s.evaluate(20_000, &costco()), Decision::Fire);
    }

    #[test]
    fn debounce_window_is_half_open() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        assert_eq!(s.evaluate(25_000, &costco()), Decision::Fire);
        assert_eq!(s.evaluate(54_999, &costco()), Decision::SuppressDebounce);
        assert_eq!(s.evaluate(55_000, &costco()), Decision::Fire);
        let stats = s.stats();
        assert_eq!(stats.fired, 2);
        assert_eq!(stats.suppressed_debounce, 1);
    }

    #[test]
    fn alert_event_uses_first_seen_time() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        let early = AlertEvent::new(costco(), 19_999);
        assert_eq!(s.evaluate_event(&early), Decision::SuppressGrace);
        let late = AlertEvent::new(costco(), 20_000);
        assert_eq!(s.evaluate_event(&late), Decision::Fire);
        assert_eq!(s.last_alert_at(&costco()), Some(20_000));
    }

    #[test]
    fn suppressed_debounce_does_not_extend_window() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        s.evaluate(25_000, &costco());
        s.evaluate(40_000, &costco());
        assert_eq!(s.last_alert_at(&costco()), Some(25_000));
    }

    #[test]
    fn global_scope_shares_window_across_kinds() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        assert_eq!(s.evaluate(25_000, &costco()), Decision::Fire);
        assert_eq!(s.evaluate(30_000, &target()), Decision::SuppressDebounce);
    }

    #[test]
    fn per_classification_scope_keeps_independent_windows() {
        let config = SchedulerConfig {
            debounce_scope: DebounceScope::PerClassification,
            ..SchedulerConfig::default()
        };
        let mut s = AlertScheduler::new(config, 0);
        assert_eq!(s.evaluate(25_000, &costco()), Decision::Fire);
        assert_eq!(s.evaluate(30_000, &target()), Decision::Fire);
        assert_eq!(s.evaluate(31_000, &costco()), Decision::SuppressDebounce);
    }

    #[test]
    fn phases_follow_elapsed_time() {
        let s = AlertScheduler::new(SchedulerConfig::default(), 1_000);
        assert_eq!(s.phase(1_000), SessionPhase::Grace);
        assert_eq!(s.phase(21_000), SessionPhase::Verbose);
        assert_eq!(s.phase(61_000), SessionPhase::Quiet);
        assert_eq!(s.verbosity(60_999), Verbosity::Verbose);
        assert_eq!(s.verbosity(61_000), Verbosity::Quiet);
        // A clock reading before session start counts as zero elapsed.
        assert_eq!(s.phase(0), SessionPhase::Grace);
    }

    #[test]
    fn verbosity_never_changes_decisions() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        assert_eq!(s.evaluate(100_000, &costco()), Decision::Fire);
        assert_eq!(s.verbosity(100_000), Verbosity::Quiet);
    }

    #[test]
    fn heartbeat_only_in_quiet_at_pulse_interval() {
        let mut s = AlertScheduler::new(SchedulerConfig::default(), 0);
        assert!(!s.heartbeat_due(30_000));
        assert!(s.heartbeat_due(60_000));
        assert!(!s.heartbeat_due(65_000));
        assert!(!s.heartbeat_due(359_999));
        assert!(s.heartbeat_due(360_000));
        assert_eq!(s.stats().heartbeats, 2);
    }

    #[test]
    fn decision_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&Decision::SuppressDebounce).unwrap(),
            "\"SUPPRESS_DEBOUNCE\""
        );
        assert_eq!(Decision::Fire.to_string(), "FIRE");
    }

    #[test]
    fn config_parses_scope_from_toml() {
        let config: SchedulerConfig =
            toml::from_str("debounce_ms = 1000\ndebounce_scope = \"per_classification\"").unwrap();
        assert_eq!(config.debounce_ms, 1_000);
        assert_eq!(config.debounce_scope, DebounceScope::PerClassification);
        assert_eq!(config.grace_period_ms, 20_000);
    }
}
