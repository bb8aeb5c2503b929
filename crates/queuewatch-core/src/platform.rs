//! Platform audio backends.
//!
//! [`PlatformAudio`] is the seam between the unlock state machine and
//! whatever actually makes sound. Every operation is an async future that
//! resolves once playback has started (or been refused).
//!
//! - [`CommandAudio`] plays the alert asset with the native player
//!   (`afplay` on macOS, `paplay` on Linux, PowerShell `SoundPlayer` on
//!   Windows) and renders tones as the terminal bell.
//! - [`ScriptedAudio`] is a programmable backend for tests and dry runs.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Future returned by every [`PlatformAudio`] operation.
pub type AudioFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AudioError>> + Send + 'a>>;

/// Synthesized tone parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSpec {
    pub frequency_hz: f32,
    pub gain: f32,
    pub duration_ms: u64,
}

impl ToneSpec {
    /// Near-silent tone used to probe whether audio is allowed.
    pub const PROBE: Self = Self {
        frequency_hz: 800.0,
        gain: 0.01,
        duration_ms: 100,
    };

    /// Audible beep used when the alert asset cannot be played.
    pub const BEEP: Self = Self {
        frequency_hz: 800.0,
        gain: 0.1,
        duration_ms: 200,
    };
}

/// Audio output capability of the host.
pub trait PlatformAudio: Send + Sync {
    /// Backend identifier used in logs.
    fn name(&self) -> &'static str;

    /// Play the configured alert asset at `volume` (0.0..=1.0).
    fn play_asset(&self, volume: f32) -> AudioFuture<'_>;

    /// Play a synthesized tone.
    fn play_tone(&self, tone: ToneSpec) -> AudioFuture<'_>;

    /// Check that the audio subsystem is running and usable.
    fn probe_active(&self) -> AudioFuture<'_>;
}

/// Native audio player selected for the current platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerBackend {
    /// macOS `afplay`
    Afplay,
    /// PulseAudio/PipeWire `paplay`
    Paplay,
    /// Windows PowerShell `Media.SoundPlayer`
    PowerShell,
    /// No supported player
    None,
}

impl PlayerBackend {
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self::Afplay
        } else if cfg!(target_os = "windows") {
            Self::PowerShell
        } else if cfg!(target_os = "linux") {
            Self::Paplay
        } else {
            Self::None
        }
    }

    #[must_use]
    pub const fn program(self) -> Option<&'static str> {
        match self {
            Self::Afplay => Some("afplay"),
            Self::Paplay => Some("paplay"),
            Self::PowerShell => Some("powershell"),
            Self::None => None,
        }
    }
}

impl std::fmt::Display for PlayerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Afplay => write!(f, "macos (afplay)"),
            Self::Paplay => write!(f, "linux (paplay)"),
            Self::PowerShell => write!(f, "windows (powershell)"),
            Self::None => write!(f, "none"),
        }
    }
}

/// A platform-specific player command ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Build the command that plays `asset` at `volume`.
#[must_use]
pub fn build_play_command(backend: PlayerBackend, asset: &Path, volume: f32) -> Option<PlayCommand> {
    let volume = volume.clamp(0.0, 1.0);
    let path = asset.display().to_string();
    match backend {
        PlayerBackend::Afplay => Some(PlayCommand {
            program: "afplay".to_string(),
            args: vec!["-v".to_string(), format!("{volume:.2}"), path],
        }),
        PlayerBackend::Paplay => {
            // paplay volume is linear with 65536 as 100%.
            let scaled = (f64::from(volume) * 65536.0).round() as u32;
            Some(PlayCommand {
                program: "paplay".to_string(),
                args: vec![format!("--volume={scaled}"), path],
            })
        }
        PlayerBackend::PowerShell => Some(PlayCommand {
            program: "powershell".to_string(),
            args: vec![
                "-NoProfile".to_string(),
                "-Command".to_string(),
                format!(
                    "(New-Object Media.SoundPlayer '{}').PlaySync()",
                    path.replace('\'', "''")
                ),
            ],
        }),
        PlayerBackend::None => None,
    }
}

fn program_on_path(program: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}

/// Audio through native player commands and the terminal bell.
#[derive(Debug, Clone)]
pub struct CommandAudio {
    backend: PlayerBackend,
    asset: Option<PathBuf>,
}

impl CommandAudio {
    /// Auto-detect the player backend.
    #[must_use]
    pub fn new(asset: Option<PathBuf>) -> Self {
        Self::with_backend(PlayerBackend::detect(), asset)
    }

    #[must_use]
    pub fn with_backend(backend: PlayerBackend, asset: Option<PathBuf>) -> Self {
        Self { backend, asset }
    }

    #[must_use]
    pub fn backend(&self) -> PlayerBackend {
        self.backend
    }

    async fn spawn_player(&self, volume: f32) -> Result<(), AudioError> {
        let asset = self
            .asset
            .as_deref()
            .ok_or_else(|| AudioError::PlaybackFailed("no alert asset configured".to_string()))?;
        if !asset.is_file() {
            return Err(AudioError::PlaybackFailed(format!(
                "alert asset not found: {}",
                asset.display()
            )));
        }
        let cmd = build_play_command(self.backend, asset, volume)
            .ok_or_else(|| AudioError::Inactive("no audio player for this platform".to_string()))?;

        tracing::debug!(
            backend = %self.backend,
            program = %cmd.program,
            volume,
            "starting audio player"
        );

        let mut child = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| AudioError::PlaybackFailed(format!("{} could not start: {e}", cmd.program)))?;

        // Playback has started; reap the player in the background.
        let program = cmd.program;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(%program, ?status, "audio player exited with failure"),
                Err(err) => tracing::warn!(%program, error = %err, "audio player wait failed"),
            }
        });
        Ok(())
    }
}

impl PlatformAudio for CommandAudio {
    fn name(&self) -> &'static str {
        "command"
    }

    fn play_asset(&self, volume: f32) -> AudioFuture<'_> {
        Box::pin(self.spawn_player(volume))
    }

    fn play_tone(&self, tone: ToneSpec) -> AudioFuture<'_> {
        Box::pin(async move {
            if tone.gain <= ToneSpec::PROBE.gain {
                // Probe-level tones are inaudible.
                return Ok(());
            }
            let mut stderr = std::io::stderr();
            stderr
                .write_all(b"\x07")
                .and_then(|()| stderr.flush())
                .map_err(|e| AudioError::PlaybackFailed(format!("terminal bell failed: {e}")))
        })
    }

    fn probe_active(&self) -> AudioFuture<'_> {
        Box::pin(async move {
            let program = self
                .backend
                .program()
                .ok_or_else(|| AudioError::Inactive("no audio player for this platform".to_string()))?;
            if program_on_path(program) {
                Ok(())
            } else {
                Err(AudioError::Inactive(format!("{program} not found on PATH")))
            }
        })
    }
}

/// One call observed by [`ScriptedAudio`].
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCall {
    Asset { volume: f32 },
    Tone(ToneSpec),
    Probe,
}

#[derive(Debug)]
struct ScriptState {
    asset_ok: bool,
    tone_ok: bool,
    probe_ok: bool,
    calls: Vec<AudioCall>,
}

/// Programmable audio backend. Clones share state, so a test can keep a
/// handle while the state machine owns another.
#[derive(Debug, Clone)]
pub struct ScriptedAudio {
    state: Arc<Mutex<ScriptState>>,
}

impl Default for ScriptedAudio {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ScriptedAudio {
    /// Every operation succeeds when `allowed`, otherwise every one fails
    /// as if blocked by an autoplay policy.
    #[must_use]
    pub fn new(allowed: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                asset_ok: allowed,
                tone_ok: allowed,
                probe_ok: allowed,
                calls: Vec::new(),
            })),
        }
    }

    /// Backend that refuses audio until [`Self::allow_all`] is called.
    #[must_use]
    pub fn blocked() -> Self {
        Self::new(false)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn allow_all(&self) {
        self.with_state(|s| {
            s.asset_ok = true;
            s.tone_ok = true;
            s.probe_ok = true;
        });
    }

    pub fn set_asset_ok(&self, ok: bool) {
        self.with_state(|s| s.asset_ok = ok);
    }

    pub fn set_tone_ok(&self, ok: bool) {
        self.with_state(|s| s.tone_ok = ok);
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.with_state(|s| s.probe_ok = ok);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<AudioCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Asset plays at or above `min_volume` (alerts rather than probes).
    #[must_use]
    pub fn alert_plays(&self, min_volume: f32) -> usize {
        self.with_state(|s| {
            s.calls
                .iter()
                .filter(|c| matches!(c, AudioCall::Asset { volume } if *volume >= min_volume))
                .count()
        })
    }

    fn record(&self, call: AudioCall) -> Result<(), AudioError> {
        self.with_state(|s| {
            let ok = match call {
                AudioCall::Asset { .. } => s.asset_ok,
                AudioCall::Tone(_) => s.tone_ok,
                AudioCall::Probe => s.probe_ok,
            };
            s.calls.push(call);
            if ok {
                Ok(())
            } else {
                Err(AudioError::Blocked(
                    "play() failed because the user didn't interact with the document first"
                        .to_string(),
                ))
            }
        })
    }
}

impl PlatformAudio for ScriptedAudio {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn play_asset(&self, volume: f32) -> AudioFuture<'_> {
        let result = self.record(AudioCall::Asset { volume });
        Box::pin(async move { result })
    }

    fn play_tone(&self, tone: ToneSpec) -> AudioFuture<'_> {
        let result = self.record(AudioCall::Tone(tone));
        Box::pin(async move { result })
    }

    fn probe_active(&self) -> AudioFuture<'_> {
        let result = self.record(AudioCall::Probe);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn afplay_command_includes_volume() {
        let cmd = build_play_command(PlayerBackend::Afplay, Path::new("/tmp/a.mp3"), 0.7).unwrap();
        assert_eq!(cmd.program, "afplay");
        assert_eq!(cmd.args, vec!["-v", "0.70", "/tmp/a.mp3"]);
    }

    #[test]
    fn paplay_volume_is_scaled_and_clamped() {
        let cmd = build_play_command(PlayerBackend::Paplay, Path::new("a.wav"), 0.5).unwrap();
        assert_eq!(cmd.args[0], "--volume=32768");
        let loud = build_play_command(PlayerBackend::Paplay, Path::new("a.wav"), 4.0).unwrap();
        assert_eq!(loud.args[0], "--volume=65536");
    }

    #[test]
    fn powershell_command_escapes_quotes() {
        let cmd =
            build_play_command(PlayerBackend::PowerShell, Path::new("C:/it's.wav"), 0.7).unwrap();
        assert!(cmd.args.last().unwrap().contains("it''s.wav"));
    }

    #[test]
    fn no_backend_builds_no_command() {
        assert!(build_play_command(PlayerBackend::None, Path::new("a.wav"), 0.7).is_none());
        assert!(PlayerBackend::None.program().is_none());
    }

    #[tokio::test]
    async fn command_audio_without_asset_fails() {
        let audio = CommandAudio::with_backend(PlayerBackend::Paplay, None);
        let err = audio.play_asset(0.7).await.unwrap_err();
        assert!(matches!(err, AudioError::PlaybackFailed(_)));
    }

    #[tokio::test]
    async fn command_audio_missing_asset_fails() {
        let audio = CommandAudio::with_backend(
            PlayerBackend::Paplay,
            Some(PathBuf::from("/definitely/not/here.wav")),
        );
        assert!(audio.play_asset(0.7).await.is_err());
    }

    #[tokio::test]
    async fn command_audio_without_backend_is_inactive() {
        let audio = CommandAudio::with_backend(PlayerBackend::None, None);
        assert!(matches!(
            audio.probe_active().await,
            Err(AudioError::Inactive(_))
        ));
        // Probe tones are silent and always succeed.
        assert!(audio.play_tone(ToneSpec::PROBE).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_audio_records_and_scripts_outcomes() {
        let audio = ScriptedAudio::blocked();
        assert!(audio.play_asset(0.7).await.is_err());
        audio.set_tone_ok(true);
        assert!(audio.play_tone(ToneSpec::BEEP).await.is_ok());
        audio.allow_all();
        assert!(audio.probe_active().await.is_ok());
        assert!(audio.play_asset(0.1).await.is_ok());

        assert_eq!(
            audio.calls(),
            vec![
                AudioCall::Asset { volume: 0.7 },
                AudioCall::Tone(ToneSpec::BEEP),
                AudioCall::Probe,
                AudioCall::Asset { volume: 0.1 },
            ]
        );
        assert_eq!(audio.alert_plays(0.5), 1);
    }

    #[test]
    fn scripted_audio_clones_share_state() {
        let a = ScriptedAudio::blocked();
        let b = a.clone();
        a.allow_all();
        assert!(b.with_state(|s| s.asset_ok));
    }
}
