//! User settings shared with the host (enabled flag, audio permission).
//!
//! Stores publish every change on a `watch` channel so the controller can
//! react to toggles made elsewhere (another `qw` invocation editing the same
//! file, or a companion UI).

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;
use crate::error::SettingsError;

/// Persisted user settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Surveillance runs while true.
    pub enabled: bool,
    /// Audio has been unlocked before on this host.
    #[serde(alias = "audioPermission")]
    pub audio_permission: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            audio_permission: false,
        }
    }
}

/// Key-value settings backend.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings>;

    fn set_enabled(&self, enabled: bool) -> Result<()>;

    fn set_audio_permission(&self, granted: bool) -> Result<()>;

    /// Receiver that observes every published change.
    fn subscribe(&self) -> watch::Receiver<Settings>;
}

/// Load settings, falling back to defaults when the store fails.
pub fn load_or_default(store: &dyn SettingsStore) -> Settings {
    match store.load() {
        Ok(settings) => settings,
        Err(err) => {
            warn!(error = %err, "Settings unavailable; using defaults");
            Settings::default()
        }
    }
}

/// Persist the audio permission flag, logging failures.
pub fn persist_audio_permission(store: &dyn SettingsStore, granted: bool) {
    if let Err(err) = store.set_audio_permission(granted) {
        warn!(error = %err, granted, "Failed to persist audio permission");
    }
}

/// In-memory store.
#[derive(Debug)]
pub struct MemorySettingsStore {
    tx: watch::Sender<Settings>,
    unavailable: AtomicBool,
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new(initial: Settings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every read and write fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current value regardless of availability.
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        *self.tx.borrow()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SettingsError::Unavailable("memory store marked unavailable".to_string()).into());
        }
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        self.check_available()?;
        self.tx.send_if_modified(|settings| {
            let before = *settings;
            apply(settings);
            before != *settings
        });
        Ok(())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings> {
        self.check_available()?;
        Ok(self.snapshot())
    }

    fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.enabled = enabled)
    }

    fn set_audio_permission(&self, granted: bool) -> Result<()> {
        self.update(|s| s.audio_permission = granted)
    }

    fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

/// JSON file store with an optional polling refresher.
///
/// A missing file reads as defaults. Writes go through a temporary file and
/// a rename so a concurrent reader never sees a torn file.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    tx: watch::Sender<Settings>,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Open the store, reading the current file (defaults when missing or
    /// unreadable).
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match read_settings_file(&path) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Settings file unreadable; using defaults");
                Settings::default()
            }
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            path,
            tx,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish it if it changed. Returns whether a
    /// change was published.
    pub fn refresh(&self) -> Result<bool> {
        let current = read_settings_file(&self.path)?;
        Ok(self.tx.send_if_modified(|settings| {
            if *settings == current {
                false
            } else {
                *settings = current;
                true
            }
        }))
    }

    /// Poll the file every `interval` until `shutdown` flips to true.
    pub fn spawn_refresher(
        self: &std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.refresh() {
                            Ok(true) => debug!(path = %store.path.display(), "Settings changed on disk"),
                            Ok(false) => {}
                            Err(err) => debug!(error = %err, "Settings refresh failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    fn update(&self, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut settings = read_settings_file(&self.path).unwrap_or_else(|err| {
            warn!(error = %err, "Overwriting unreadable settings file");
            Settings::default()
        });
        apply(&mut settings);
        write_settings_file(&self.path, &settings)?;
        self.tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> Result<Settings> {
        read_settings_file(&self.path)
    }

    fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.enabled = enabled)
    }

    fn set_audio_permission(&self, granted: bool) -> Result<()> {
        self.update(|s| s.audio_permission = granted)
    }

    fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(err) => {
            return Err(SettingsError::Unavailable(format!("{}: {err}", path.display())).into());
        }
    };
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_json::from_str(&content).map_err(|e| {
        SettingsError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn write_settings_file(path: &Path, settings: &Settings) -> Result<()> {
    let write_failed = |reason: String| SettingsError::WriteFailed {
        path: path.display().to_string(),
        reason,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
        }
    }
    let json = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| write_failed(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| write_failed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn defaults_are_enabled_without_permission() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert!(!settings.audio_permission);
    }

    #[test]
    fn settings_accept_camel_case_permission() {
        let s: Settings = serde_json::from_str(r#"{"audioPermission": true}"#).unwrap();
        assert!(s.audio_permission);
        assert!(s.enabled);
    }

    #[test]
    fn memory_store_publishes_changes_only() {
        let store = MemorySettingsStore::default();
        let mut rx = store.subscribe();
        store.set_enabled(true).unwrap();
        assert!(!rx.has_changed().unwrap());
        store.set_enabled(false).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().enabled);
    }

    #[test]
    fn unavailable_store_falls_back_to_defaults() {
        let store = MemorySettingsStore::new(Settings {
            enabled: false,
            audio_permission: true,
        });
        store.set_unavailable(true);
        assert!(store.load().is_err());
        assert_eq!(load_or_default(&store), Settings::default());
        assert!(store.set_audio_permission(false).is_err());
        persist_audio_permission(&store, false);
        assert!(store.snapshot().audio_permission);
    }

    #[test]
    fn file_store_missing_file_reads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::open(dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn file_store_persists_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = FileSettingsStore::open(&path);
        store.set_audio_permission(true).unwrap();
        store.set_enabled(false).unwrap();

        let reopened = FileSettingsStore::open(&path);
        assert_eq!(
            reopened.load().unwrap(),
            Settings {
                enabled: false,
                audio_permission: true
            }
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSettingsStore::open(&path);
        assert!(matches!(
            store.load(),
            Err(crate::Error::Settings(SettingsError::Corrupt { .. }))
        ));
        assert_eq!(*store.subscribe().borrow(), Settings::default());
    }

    #[test]
    fn refresh_publishes_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = FileSettingsStore::open(&path);
        let mut rx = store.subscribe();

        std::fs::write(&path, r#"{"enabled": false}"#).unwrap();
        assert!(store.refresh().unwrap());
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().enabled);
        assert!(!store.refresh().unwrap());
    }

    #[tokio::test]
    async fn refresher_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSettingsStore::open(dir.path().join("settings.json")));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = store.spawn_refresher(Duration::from_millis(10), shutdown_rx);

        let mut rx = store.subscribe();
        std::fs::write(store.path(), r#"{"enabled": false}"#).unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!rx.borrow().enabled);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
