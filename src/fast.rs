//! Fast toggle: the hotkey-to-output orchestration.
//!
//! One entry point drives the whole pipeline: if a recording is active,
//! stop it, transcribe, post-process, persist to the replay buffer, and
//! type the result into the window that was focused when the hotkey
//! fired; otherwise start a recording. Guarded by a single-instance lock
//! and a debounce window so key repeat and double-fires collapse into one
//! action.

use crate::config;
use crate::error::{Result, VoicepipeError};
use crate::locks::{LockError, PidFileLock};
use crate::paths::runtime_app_dir;
use crate::pipeline::postprocess_transcription;
use crate::recording::{preserve_audio, AutoRecorderBackend, StopResult};
use crate::replay::save_last_output;
use crate::transcribe::{transcribe_audio_file, TranscribeOptions};
use crate::triggers::LiveZwingli;
use crate::typing::{resolve_typing_delivery, NullDelivery, TypingDelivery};
use serde_json::json;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEBOUNCE_MS: u64 = 500;

fn lock_path(create_dir: bool) -> std::path::PathBuf {
    runtime_app_dir(create_dir).join("voicepipe-fast.lock")
}

fn debounce_path(create_dir: bool) -> std::path::PathBuf {
    runtime_app_dir(create_dir).join("voicepipe-fast.time")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Check whether enough time passed since the last invocation, recording
/// this one. Errors allow the action (a broken debounce file must never
/// wedge the hotkey).
pub fn check_debounce() -> bool {
    check_debounce_at(&debounce_path(true), now_ms())
}

pub fn check_debounce_at(path: &Path, current_ms: u64) -> bool {
    if let Ok(raw) = std::fs::read_to_string(path) {
        if let Ok(last_ms) = raw.trim().parse::<u64>() {
            if current_ms.saturating_sub(last_ms) < DEBOUNCE_MS {
                tracing::debug!(
                    "Debounced: {}ms since last toggle",
                    current_ms.saturating_sub(last_ms)
                );
                return false;
            }
        }
    }
    if let Err(e) = std::fs::write(path, current_ms.to_string()) {
        tracing::warn!("Cannot write debounce file {:?}: {}", path, e);
    }
    true
}

async fn transcribe_for_output(audio_file: &Path) -> String {
    let model = config::transcribe_model();
    match transcribe_audio_file(audio_file, &model, &TranscribeOptions::default(), true).await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Transcription failed: {}", e);
            String::new()
        }
    }
}

fn cleanup_after_stop(stop: &StopResult, success: bool) {
    if let Some(session) = &stop.session {
        crate::session::cleanup_session(session);
    }
    if success {
        if stop.audio_file.exists() {
            let _ = std::fs::remove_file(&stop.audio_file);
            tracing::debug!("Cleaned up audio file {:?}", stop.audio_file);
        }
    } else {
        preserve_audio(&stop.audio_file);
    }
}

async fn stop_and_deliver(backend: &AutoRecorderBackend) -> Result<()> {
    // Capture the focused window before anything else; hotkey invocations
    // sometimes steal focus and the text must land where the user was.
    let delivery: Box<dyn TypingDelivery> = match resolve_typing_delivery() {
        Ok(delivery) => delivery,
        Err(e) => {
            tracing::warn!("No typing backend ({}); printing instead", e);
            Box::new(NullDelivery)
        }
    };
    let target_window = if delivery.supports_window_id() {
        delivery.active_window_id().await
    } else {
        None
    };
    if let Some(window) = &target_window {
        tracing::debug!("Target window: {}", window);
    }

    let stop = backend.stop().await.map_err(VoicepipeError::Recording)?;
    tracing::info!("Stopped recording, audio file {:?}", stop.audio_file);

    if !stop.audio_file.exists()
        || std::fs::metadata(&stop.audio_file).map(|m| m.len()).unwrap_or(0) == 0
    {
        cleanup_after_stop(&stop, true);
        tracing::warn!("Recording produced no audio");
        return Ok(());
    }

    let text = transcribe_for_output(&stop.audio_file).await;
    if text.trim().is_empty() {
        tracing::warn!("No transcription returned");
        cleanup_after_stop(&stop, false);
        return Ok(());
    }

    let transcription = crate::transcribe::TranscriptionResult::new(
        text.trim_end(),
        &config::transcribe_backend(),
        &config::transcribe_model(),
        "hotkey-toggle",
    )
    .with_audio_path(&stop.audio_file);

    let commands = config::transcript_commands_config(true);
    let prefixes = config::wake_prefixes();
    let post = postprocess_transcription(
        &transcription,
        &commands,
        &prefixes,
        config::intent_routing_enabled(),
        &LiveZwingli,
    )
    .await;

    let Some(output_text) = post.output_text.clone().filter(|t| !t.is_empty()) else {
        tracing::error!(
            "Post-processing produced no output (stage {}): {}",
            post.stage,
            post.error.as_deref().unwrap_or("unknown")
        );
        cleanup_after_stop(&stop, false);
        return Ok(());
    };

    if let Err(e) = save_last_output(&output_text, Some(post.to_payload())) {
        tracing::warn!("Could not persist the replay buffer: {}", e);
    }

    match delivery
        .type_text(&output_text, target_window.as_deref())
        .await
    {
        Ok(()) => {}
        Err(e) => {
            // The transcript still exists in the replay buffer; report and
            // fall back to stdout so the text is not lost.
            tracing::warn!("Typing failed: {}", e);
            println!("{output_text}");
        }
    }

    cleanup_after_stop(&stop, true);
    Ok(())
}

/// Toggle body: stop-and-deliver when recording, start otherwise.
pub async fn execute_toggle() -> Result<()> {
    let backend = AutoRecorderBackend::new();
    let status = backend.status().await.map_err(VoicepipeError::Recording)?;
    tracing::info!("Toggle: current status {:?}:{}", status.mode, status.status);

    if status.status == "recording" {
        stop_and_deliver(&backend).await
    } else {
        backend
            .start(None)
            .await
            .map_err(VoicepipeError::Recording)?;
        tracing::info!("Recording started");
        Ok(())
    }
}

/// `fast toggle`: single-instance lock, debounce, then the toggle body.
/// A held lock or a debounced press exits silently.
pub async fn fast_toggle() -> Result<()> {
    let mut lock = PidFileLock::new(lock_path(true));
    match lock.acquire() {
        Ok(()) => {}
        Err(LockError::Held { .. }) => {
            tracing::debug!("Toggle lock already held, exiting");
            return Ok(());
        }
        Err(e) => {
            return Err(VoicepipeError::Io(std::io::Error::other(e.to_string())));
        }
    }

    // Debounce inside the lock so rapid presses cannot interleave.
    if !check_debounce() {
        return Ok(());
    }

    execute_toggle().await
}

/// `fast start`: begin recording; already-recording exits silently.
pub async fn fast_start() -> Result<()> {
    let backend = AutoRecorderBackend::new();
    let status = backend.status().await.map_err(VoicepipeError::Recording)?;
    if status.status == "recording" {
        return Ok(());
    }
    backend
        .start(None)
        .await
        .map_err(VoicepipeError::Recording)?;
    Ok(())
}

/// `fast stop`: stop, transcribe, print to stdout. Not-recording exits
/// silently.
pub async fn fast_stop() -> Result<()> {
    let backend = AutoRecorderBackend::new();
    let status = backend.status().await.map_err(VoicepipeError::Recording)?;
    if status.status != "recording" {
        return Ok(());
    }

    let stop = backend.stop().await.map_err(VoicepipeError::Recording)?;
    if !stop.audio_file.exists()
        || std::fs::metadata(&stop.audio_file).map(|m| m.len()).unwrap_or(0) == 0
    {
        cleanup_after_stop(&stop, true);
        return Ok(());
    }

    let text = transcribe_for_output(&stop.audio_file).await;
    if text.trim().is_empty() {
        cleanup_after_stop(&stop, false);
        return Ok(());
    }

    let trimmed = text.trim_end();
    let _ = save_last_output(trimmed, Some(json!({"source": "fast-stop"})));
    println!("{trimmed}");
    cleanup_after_stop(&stop, true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_blocks_rapid_second_call() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe-fast.time");

        assert!(check_debounce_at(&path, 10_000));
        assert!(!check_debounce_at(&path, 10_000 + DEBOUNCE_MS - 1));
        assert!(check_debounce_at(&path, 10_000 + DEBOUNCE_MS));
    }

    #[test]
    fn test_debounce_allows_on_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe-fast.time");
        std::fs::write(&path, "not a number").unwrap();
        assert!(check_debounce_at(&path, 5_000));
        // The corrupt content was replaced with the current stamp.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "5000");
    }

    #[test]
    fn test_debounce_updates_stamp_only_when_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe-fast.time");

        assert!(check_debounce_at(&path, 1_000));
        assert!(!check_debounce_at(&path, 1_100));
        // Second call was rejected but must not refresh the stamp, or a
        // stream of rapid presses would debounce forever.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1000");
    }
}
