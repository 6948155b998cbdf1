//! Recorder daemon.
//!
//! A long-lived process holding warm audio state so a hotkey press starts
//! capturing with no device-probe latency. State machine: idle →
//! recording → idle, driven by `start`/`stop`/`cancel`/`status` commands
//! over the JSON-line socket. One capture exists at a time; a second
//! `start` is refused.
//!
//! A watchdog timer auto-stops captures at the max-duration cap and hands
//! the artifact to the timeout handler, which transcribes in the
//! background and fills the replay buffer. Signals perform the same
//! cleanup as an explicit `cancel`.

use crate::audio::device::{
    parse_device_spec, resolve_device_spec, resolve_input_device, AudioSelection,
};
use crate::audio::wav::save_wav;
use crate::audio::{CaptureEngine, CaptureMode, DEFAULT_MAX_DURATION_SECS};
use crate::ipc::{IpcListener, IpcStream, MAX_RECORDER_RESPONSE_BYTES};
use crate::recording::preserve_audio;
use crate::session::{cleanup_session, create_session, RecordingSession};
use crate::transcribe::{transcribe_audio_file, TranscribeOptions};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ActiveRecording {
    capture: CaptureEngine,
    session: RecordingSession,
    /// None once the watchdog itself is driving the stop.
    watchdog: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Default)]
struct DaemonState {
    active: Option<ActiveRecording>,
}

type SharedState = Arc<Mutex<DaemonState>>;

fn capture_mode_from_env() -> CaptureMode {
    match std::env::var("VOICEPIPE_AUDIO_FORMAT")
        .unwrap_or_default()
        .trim()
        .to_lowercase()
        .as_str()
    {
        "mp3" => CaptureMode::Mp3,
        _ => CaptureMode::Wav,
    }
}

/// Max capture length; `0` disables the cap.
fn max_duration_from_env() -> Option<Duration> {
    match std::env::var("VOICEPIPE_MAX_DURATION_SECONDS") {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => Some(Duration::from_secs(DEFAULT_MAX_DURATION_SECS)),
        },
        Err(_) => Some(Duration::from_secs(DEFAULT_MAX_DURATION_SECS)),
    }
}

fn resolve_start_device(request_device: Option<&Value>) -> Result<AudioSelection, String> {
    if let Some(value) = request_device {
        let raw = if let Some(index) = value.as_u64() {
            index.to_string()
        } else if let Some(name) = value.as_str() {
            name.to_string()
        } else {
            return Err(format!("invalid device spec: {value}"));
        };
        let spec = parse_device_spec(&raw).ok_or_else(|| format!("invalid device spec: {raw}"))?;
        return resolve_device_spec(&spec, None, None).map_err(|e| e.to_string());
    }
    resolve_input_device(None, None)
        .map(|(selection, _)| selection)
        .map_err(|e| e.to_string())
}

fn start_recording(state: &SharedState, request_device: Option<&Value>) -> Value {
    let mut guard = state.lock().expect("daemon state");
    if guard.active.is_some() {
        return json!({"error": "Recording already in progress"});
    }

    let selection = match resolve_start_device(request_device) {
        Ok(selection) => selection,
        Err(e) => return json!({"error": e}),
    };

    let session = match create_session() {
        Ok(session) => session,
        Err(e) => return json!({"error": e.to_string()}),
    };

    let mode = capture_mode_from_env();
    let audio_path = match mode {
        CaptureMode::Wav => session.audio_file.clone(),
        CaptureMode::Mp3 => {
            // The registry pre-creates a .wav placeholder; swap the
            // extension so the encoder writes the real artifact.
            let mp3 = session.audio_file.with_extension("mp3");
            let _ = std::fs::remove_file(&session.audio_file);
            mp3
        }
    };

    let max_duration = max_duration_from_env();
    let capture = match CaptureEngine::start(selection, &audio_path, mode, max_duration) {
        Ok(capture) => capture,
        Err(e) => {
            cleanup_session(&session);
            let _ = std::fs::remove_file(&audio_path);
            return json!({"error": e.to_string()});
        }
    };

    let watchdog = spawn_watchdog(state.clone(), max_duration);

    let response = json!({
        "status": "recording",
        "audio_file": audio_path.display().to_string(),
        "pid": std::process::id(),
    });

    guard.active = Some(ActiveRecording {
        capture,
        session,
        watchdog: Some(watchdog),
    });
    response
}

/// Stop the active capture and finalize the artifact. Returns the audio
/// path, or an error string.
fn finish_capture(mut active: ActiveRecording, discard: bool) -> Result<PathBuf, String> {
    if let Some(watchdog) = active.watchdog.take() {
        watchdog.abort();
    }
    let audio_path = active.capture.output_path().to_path_buf();
    let selection = *active.capture.selection();
    let mode = active.capture.mode();

    let result = if discard {
        active.capture.cancel().map(|_| None)
    } else {
        active.capture.stop()
    };

    cleanup_session(&active.session);

    match result {
        Ok(Some(pcm)) => {
            if let Err(e) = save_wav(
                &audio_path,
                &pcm,
                selection.sample_rate_hz,
                selection.channel_count,
            ) {
                return Err(e.to_string());
            }
            Ok(audio_path)
        }
        Ok(None) if discard => Ok(audio_path),
        Ok(None) => match mode {
            // MP3 mode: the encoder already wrote the file.
            CaptureMode::Mp3 => Ok(audio_path),
            CaptureMode::Wav => Err("capture returned no audio".to_string()),
        },
        Err(e) => Err(e.to_string()),
    }
}

fn stop_recording(state: &SharedState) -> Value {
    let active = {
        let mut guard = state.lock().expect("daemon state");
        guard.active.take()
    };
    let Some(active) = active else {
        return json!({"error": "No recording in progress"});
    };

    match finish_capture(active, false) {
        Ok(audio_path) => json!({
            "status": "stopped",
            "audio_file": audio_path.display().to_string(),
        }),
        Err(e) => json!({"error": e}),
    }
}

fn cancel_recording(state: &SharedState) -> Value {
    let active = {
        let mut guard = state.lock().expect("daemon state");
        guard.active.take()
    };
    let Some(active) = active else {
        return json!({"error": "No recording in progress"});
    };

    let audio_path = active.capture.output_path().to_path_buf();
    match finish_capture(active, true) {
        Ok(_) => {
            let _ = std::fs::remove_file(&audio_path);
            json!({"status": "cancelled"})
        }
        Err(e) => {
            let _ = std::fs::remove_file(&audio_path);
            json!({"error": e})
        }
    }
}

fn daemon_status(state: &SharedState) -> Value {
    let guard = state.lock().expect("daemon state");
    match &guard.active {
        Some(active) => json!({
            "status": "recording",
            "pid": std::process::id(),
            "audio_file": active.capture.output_path().display().to_string(),
        }),
        None => json!({
            "status": "idle",
            "pid": std::process::id(),
            "audio_file": null,
        }),
    }
}

fn spawn_watchdog(
    state: SharedState,
    max_duration: Option<Duration>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(max) = max_duration else { return };
        tokio::time::sleep(max).await;

        tracing::warn!(
            "Recording timeout reached ({}s), auto-stopping",
            max.as_secs()
        );
        let active = {
            let mut guard = state.lock().expect("daemon state");
            guard.active.take()
        };
        let Some(mut active) = active else { return };
        // This task IS the watchdog; aborting it here would cancel the
        // handoff below.
        active.watchdog = None;

        let finished = tokio::task::spawn_blocking(move || finish_capture(active, false)).await;
        match finished {
            Ok(Ok(audio_path)) => {
                // Transcribe in the background and fill the replay buffer;
                // the hotkey press that would have stopped this recording
                // already missed its window.
                tokio::spawn(transcribe_timeout_audio(audio_path));
            }
            Ok(Err(e)) => tracing::error!("Timeout stop failed: {}", e),
            Err(e) => tracing::error!("Timeout stop task failed: {}", e),
        }
    })
}

/// Transcribe an auto-stopped recording. Success deletes the audio file;
/// any failure preserves it for a later retry.
pub async fn transcribe_timeout_audio(audio_path: PathBuf) {
    let model = crate::config::transcribe_model();
    let result =
        transcribe_audio_file(&audio_path, &model, &TranscribeOptions::default(), true).await;

    match result {
        Ok(text) if !text.trim().is_empty() => {
            let payload = json!({"source": "timeout", "audio_file": audio_path.display().to_string()});
            if let Err(e) = crate::replay::save_last_output(text.trim(), Some(payload)) {
                tracing::warn!("Failed to save timeout transcription: {}", e);
                preserve_audio(&audio_path);
                return;
            }
            tracing::info!("Timeout transcription saved to the replay buffer");
            let _ = std::fs::remove_file(&audio_path);
        }
        Ok(_) => {
            tracing::warn!("Timeout transcription was empty; preserving audio");
            preserve_audio(&audio_path);
        }
        Err(e) => {
            tracing::error!("Timeout transcription failed: {}", e);
            preserve_audio(&audio_path);
        }
    }
}

async fn handle_connection(conn: &mut IpcStream, state: &SharedState) {
    let request = match conn
        .read_json_line(MAX_RECORDER_RESPONSE_BYTES, Duration::from_secs(5))
        .await
    {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            let _ = conn.write_json_line(&json!({"error": e.to_string()})).await;
            return;
        }
    };

    let command = request.get("command").and_then(|c| c.as_str()).unwrap_or("");
    tracing::debug!("Recorder command: {}", command);

    let response = match command {
        "start" => {
            let state = state.clone();
            let device = request.get("device").cloned();
            tokio::task::spawn_blocking(move || start_recording(&state, device.as_ref()))
                .await
                .unwrap_or_else(|e| json!({"error": format!("start task failed: {e}")}))
        }
        "stop" => {
            let state = state.clone();
            tokio::task::spawn_blocking(move || stop_recording(&state))
                .await
                .unwrap_or_else(|e| json!({"error": format!("stop task failed: {e}")}))
        }
        "cancel" => {
            let state = state.clone();
            tokio::task::spawn_blocking(move || cancel_recording(&state))
                .await
                .unwrap_or_else(|e| json!({"error": format!("cancel task failed: {e}")}))
        }
        "status" => daemon_status(state),
        other => json!({"error": format!("Unknown command: {other}")}),
    };

    if let Err(e) = conn.write_json_line(&response).await {
        tracing::debug!("Client went away before the response: {}", e);
    }
}

fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    #[cfg(unix)]
    {
        Box::pin(async {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");
            let mut int = signal(SignalKind::interrupt()).expect("SIGINT handler");
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        })
    }
    #[cfg(not(unix))]
    {
        Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        })
    }
}

/// Run the recorder daemon until SIGTERM/SIGINT.
pub async fn run(socket_path: Option<&Path>) -> anyhow::Result<()> {
    let socket = socket_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| {
            crate::paths::runtime_app_dir(true);
            crate::paths::daemon_socket_path()
        });

    // Prewarm device resolution so the first `start` is fast. Best-effort:
    // a headless host can still serve `status`.
    match resolve_input_device(None, None) {
        Ok((selection, source)) => tracing::info!(
            "Audio ready: device {} @ {}Hz/{}ch ({:?})",
            selection.device_id,
            selection.sample_rate_hz,
            selection.channel_count,
            source
        ),
        Err(e) => tracing::warn!("Audio prewarm failed: {}", e),
    }

    let state: SharedState = Arc::new(Mutex::new(DaemonState::default()));
    let listener = IpcListener::bind(&socket)?;
    tracing::info!("Voicepipe daemon started. Socket: {:?}", socket);

    let mut shutdown = shutdown_signal();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down, cancelling any active recording");
                let response = cancel_recording(&state);
                if response.get("status").is_some() {
                    tracing::info!("Active recording cancelled");
                }
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(mut conn) => handle_connection(&mut conn, &state).await,
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                }
            }
        }
    }

    listener.cleanup();
    tracing::info!("Daemon shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_mode_default_is_wav() {
        // VOICEPIPE_AUDIO_FORMAT is unset in the test environment.
        assert_eq!(capture_mode_from_env(), CaptureMode::Wav);
    }

    #[test]
    fn test_max_duration_default() {
        assert_eq!(
            max_duration_from_env(),
            Some(Duration::from_secs(DEFAULT_MAX_DURATION_SECS))
        );
    }

    #[test]
    fn test_status_idle_shape() {
        let state: SharedState = Arc::new(Mutex::new(DaemonState::default()));
        let status = daemon_status(&state);
        assert_eq!(status["status"], "idle");
        assert_eq!(status["pid"], std::process::id());
        assert!(status["audio_file"].is_null());
    }

    #[test]
    fn test_invalid_device_spec_is_an_error() {
        let err = resolve_start_device(Some(&json!({"bogus": true}))).unwrap_err();
        assert!(err.contains("invalid device spec"));
    }
}
