//! Notification sink: status events and log lines leaving the pipeline.
//!
//! Delivery is best-effort. The core calls [`emit_best_effort`] and
//! [`log_best_effort`], which swallow sink failures after a `debug!` so a
//! broken consumer can never stall surveillance.

use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;

use crate::Result;
use crate::classifier::QueueKind;
use crate::logging::LogLevel;

/// Kind of status event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    SurveillanceActive,
    ScanComplete,
    /// A message classified as the given queue kind (`<KIND>_DETECTED`).
    Detected(QueueKind),
    AlertPlayed,
    AlertQueued,
    ExtensionEnabled,
    ExtensionDisabled,
}

impl EventKind {
    /// Wire name, e.g. `SCAN_COMPLETE` or `COSTCO_DETECTED`.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::SurveillanceActive => "SURVEILLANCE_ACTIVE".to_string(),
            Self::ScanComplete => "SCAN_COMPLETE".to_string(),
            Self::Detected(kind) => format!("{kind}_DETECTED"),
            Self::AlertPlayed => "ALERT_PLAYED".to_string(),
            Self::AlertQueued => "ALERT_QUEUED".to_string(),
            Self::ExtensionEnabled => "EXTENSION_ENABLED".to_string(),
            Self::ExtensionDisabled => "EXTENSION_DISABLED".to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// A status event with its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub kind: EventKind,
    pub timestamp_ms: u64,
    pub data: serde_json::Value,
}

impl StatusEvent {
    #[must_use]
    pub fn new(kind: EventKind, timestamp_ms: u64, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp_ms,
            data,
        }
    }

    /// RFC 3339 rendering of the event time.
    #[must_use]
    pub fn timestamp(&self) -> String {
        i64::try_from(self.timestamp_ms)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map_or_else(|| self.timestamp_ms.to_string(), |dt| dt.to_rfc3339())
    }
}

impl Serialize for StatusEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StatusEvent", 3)?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("timestamp", &self.timestamp())?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}

/// Consumer of status events and log lines.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: &StatusEvent) -> Result<()>;

    fn log(&self, level: LogLevel, message: &str) -> Result<()>;
}

/// Emit an event, swallowing sink failures.
pub fn emit_best_effort(sink: &dyn NotificationSink, event: &StatusEvent) {
    if let Err(err) = sink.emit(event) {
        tracing::debug!(event = %event.kind, error = %err, "Notification sink rejected event");
    }
}

/// Send a log line, swallowing sink failures.
pub fn log_best_effort(sink: &dyn NotificationSink, level: LogLevel, message: &str) {
    if let Err(err) = sink.log(level, message) {
        tracing::debug!(error = %err, "Notification sink rejected log line");
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&self, _event: &StatusEvent) -> Result<()> {
        Ok(())
    }

    fn log(&self, _level: LogLevel, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Forwards events and log lines to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, event: &StatusEvent) -> Result<()> {
        tracing::info!(
            target: "queuewatch::events",
            event = %event.kind,
            data = %event.data,
            "status event"
        );
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<()> {
        match level {
            LogLevel::Trace => tracing::trace!(target: "queuewatch::status", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "queuewatch::status", "{message}"),
            LogLevel::Info => tracing::info!(target: "queuewatch::status", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "queuewatch::status", "{message}"),
            LogLevel::Error => tracing::error!(target: "queuewatch::status", "{message}"),
        }
        Ok(())
    }
}

/// Record delivered by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkMessage {
    Event(StatusEvent),
    Log { level: LogLevel, message: String },
}

impl SinkMessage {
    #[must_use]
    pub fn as_event(&self) -> Option<&StatusEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Log { .. } => None,
        }
    }
}

/// Forwards records over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl ChannelSink {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, message: SinkMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| crate::Error::Runtime("notification channel closed".to_string()))
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, event: &StatusEvent) -> Result<()> {
        self.send(SinkMessage::Event(event.clone()))
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<()> {
        self.send(SinkMessage::Log {
            level,
            message: message.to_string(),
        })
    }
}

#[derive(Serialize)]
struct LogRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    level: LogLevel,
    message: &'a str,
}

/// Writes one JSON object per line to any writer.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> NotificationSink for JsonLinesSink<W> {
    fn emit(&self, event: &StatusEvent) -> Result<()> {
        self.write_line(event)
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<()> {
        self.write_line(&LogRecord {
            kind: "LOG",
            level,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn emit(&self, _event: &StatusEvent) -> Result<()> {
            Err(crate::Error::Runtime("down".to_string()))
        }

        fn log(&self, _level: LogLevel, _message: &str) -> Result<()> {
            Err(crate::Error::Runtime("down".to_string()))
        }
    }

    #[test]
    fn event_names_match_wire_format() {
        assert_eq!(EventKind::SurveillanceActive.name(), "SURVEILLANCE_ACTIVE");
        assert_eq!(
            EventKind::Detected(QueueKind::new("POKEMON_CENTER")).name(),
            "POKEMON_CENTER_DETECTED"
        );
        assert_eq!(EventKind::AlertQueued.to_string(), "ALERT_QUEUED");
    }

    #[test]
    fn status_event_serializes_type_timestamp_data() {
        let event = StatusEvent::new(EventKind::ScanComplete, 0, json!({"new_messages": 2}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "SCAN_COMPLETE");
        assert_eq!(value["timestamp"], "1970-01-01T00:00:00+00:00");
        assert_eq!(value["data"]["new_messages"], 2);
    }

    #[test]
    fn jsonl_sink_writes_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(&StatusEvent::new(EventKind::AlertPlayed, 5, json!({"success": true})))
            .unwrap();
        sink.log(LogLevel::Warn, "audio locked").unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "ALERT_PLAYED");
        assert_eq!(lines[1]["type"], "LOG");
        assert_eq!(lines[1]["level"], "warn");
        assert_eq!(lines[1]["message"], "audio locked");
    }

    #[test]
    fn channel_sink_forwards_and_reports_closed() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(&StatusEvent::new(EventKind::ExtensionEnabled, 1, json!({})))
            .unwrap();
        sink.log(LogLevel::Info, "hello").unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.as_event().unwrap().kind, EventKind::ExtensionEnabled);
        assert_eq!(
            rx.try_recv().unwrap(),
            SinkMessage::Log {
                level: LogLevel::Info,
                message: "hello".to_string()
            }
        );

        drop(rx);
        assert!(sink.log(LogLevel::Info, "gone").is_err());
    }

    #[test]
    fn best_effort_helpers_swallow_failures() {
        let event = StatusEvent::new(EventKind::ScanComplete, 1, json!({}));
        emit_best_effort(&FailingSink, &event);
        log_best_effort(&FailingSink, LogLevel::Error, "ignored");
        emit_best_effort(&NullSink, &event);
        emit_best_effort(&TracingSink, &event);
        log_best_effort(&TracingSink, LogLevel::Debug, "traced");
    }
}
