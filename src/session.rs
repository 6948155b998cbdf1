//! Lightweight recording session tracking.
//!
//! A session is one recording instance, identified by a hex id and the pid
//! of the owning process. Sessions are persisted as pid-stamped JSON files
//! under the runtime dir so any voicepipe process can discover them; dead
//! rows (owner pid no longer running) are garbage-collected on discovery.
//!
//! This module intentionally does not touch audio backends so non-recording
//! commands work even when audio is unavailable.

use crate::error::RecordingError;
use crate::paths::{audio_tmp_dir, ensure_private_dir, ensure_private_file, session_state_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STATE_PREFIX: &str = "voicepipe-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingSession {
    pub pid: u32,
    pub audio_file: PathBuf,
    /// Reserved out-of-band cancel channel; written but currently unread.
    pub control_path: PathBuf,
    pub recording_id: String,
    pub started_at: String,
}

#[cfg(unix)]
pub fn pid_is_running(pid: u32) -> bool {
    // kill(pid, 0) probes liveness; EPERM still means the pid exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn pid_is_running(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&format!("\"{pid}\"")))
        .unwrap_or(true)
}

fn state_file_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("{STATE_PREFIX}{pid}.json"))
}

/// Whether a directory entry looks like a session row (`voicepipe-<pid>.json`).
///
/// The runtime dir also holds `voicepipe-last.json` and friends; only
/// all-digit stems are session files.
fn session_pid_from_name(name: &str) -> Option<u32> {
    let stem = name.strip_prefix(STATE_PREFIX)?.strip_suffix(".json")?;
    stem.parse().ok()
}

/// Find all live recording sessions in a given state dir, garbage
/// collecting rows whose owner pid is gone.
pub fn find_active_sessions_in(dir: &Path) -> Vec<RecordingSession> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut sessions = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if session_pid_from_name(name).is_none() {
            continue;
        }
        let path = entry.path();

        let parsed: Option<RecordingSession> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok());

        match parsed {
            Some(session) if pid_is_running(session.pid) => sessions.push(session),
            Some(session) => {
                let _ = std::fs::remove_file(&session.control_path);
                let _ = std::fs::remove_file(&path);
            }
            None => {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
    sessions
}

pub fn find_active_sessions() -> Vec<RecordingSession> {
    find_active_sessions_in(&session_state_dir(false))
}

/// Create a new recording session owned by the current process.
///
/// Fails while any live session exists: at most one recording per host.
pub fn create_session() -> std::result::Result<RecordingSession, RecordingError> {
    create_session_in(&session_state_dir(true), &audio_tmp_dir(true))
}

pub fn create_session_in(
    state_dir: &Path,
    tmp_dir: &Path,
) -> std::result::Result<RecordingSession, RecordingError> {
    let active = find_active_sessions_in(state_dir);
    if let Some(existing) = active.first() {
        return Err(RecordingError::AlreadyInProgress(existing.pid));
    }

    ensure_private_dir(state_dir);

    let audio_file = tempfile::Builder::new()
        .prefix("voicepipe_")
        .suffix(".wav")
        .tempfile_in(tmp_dir)
        .map_err(|e| RecordingError::StartFailed(format!("cannot create audio file: {e}")))?
        .into_temp_path()
        .keep()
        .map_err(|e| RecordingError::StartFailed(format!("cannot keep audio file: {e}")))?;

    let pid = std::process::id();
    let control_path = state_dir.join(format!("{STATE_PREFIX}{pid}.control"));
    let _ = std::fs::write(&control_path, "");

    let session = RecordingSession {
        pid,
        audio_file,
        control_path,
        recording_id: uuid::Uuid::new_v4().simple().to_string(),
        started_at: chrono::Local::now().to_rfc3339(),
    };

    let state_file = state_file_path(state_dir, pid);
    let body = serde_json::to_string(&session)
        .map_err(|e| RecordingError::StartFailed(format!("cannot serialize session: {e}")))?;
    std::fs::write(&state_file, body)
        .map_err(|e| RecordingError::StartFailed(format!("cannot write session file: {e}")))?;
    ensure_private_file(&state_file);

    Ok(session)
}

/// Return the current active session, or an error when none exists.
pub fn current_session() -> std::result::Result<RecordingSession, RecordingError> {
    find_active_sessions()
        .into_iter()
        .next()
        .ok_or(RecordingError::NoActiveSession)
}

/// Remove a session's state and control files.
pub fn cleanup_session(session: &RecordingSession) {
    cleanup_session_in(&session_state_dir(false), session);
}

pub fn cleanup_session_in(state_dir: &Path, session: &RecordingSession) {
    let _ = std::fs::remove_file(state_file_path(state_dir, session.pid));
    let _ = std::fs::remove_file(&session.control_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_name_filter() {
        assert_eq!(session_pid_from_name("voicepipe-1234.json"), Some(1234));
        assert_eq!(session_pid_from_name("voicepipe-last.json"), None);
        assert_eq!(session_pid_from_name("voicepipe-1234.control"), None);
        assert_eq!(session_pid_from_name("other-1234.json"), None);
    }

    #[test]
    fn test_create_session_then_second_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let state = tmp.path().join("state");
        let audio = tmp.path().join("audio");
        std::fs::create_dir_all(&state).unwrap();
        std::fs::create_dir_all(&audio).unwrap();

        let session = create_session_in(&state, &audio).unwrap();
        assert_eq!(session.pid, std::process::id());
        assert!(session.audio_file.exists());
        assert!(session.control_path.exists());
        assert_eq!(session.recording_id.len(), 32);

        // Our own pid is live, so a second create must fail.
        match create_session_in(&state, &audio) {
            Err(RecordingError::AlreadyInProgress(pid)) => {
                assert_eq!(pid, std::process::id())
            }
            other => panic!("expected AlreadyInProgress, got {:?}", other),
        }

        cleanup_session_in(&state, &session);
        assert!(find_active_sessions_in(&state).is_empty());
        let _ = std::fs::remove_file(&session.audio_file);
    }

    #[test]
    fn test_dead_sessions_are_garbage_collected() {
        let tmp = tempfile::tempdir().unwrap();
        let state = tmp.path().to_path_buf();

        let control = state.join("voicepipe-999999.control");
        std::fs::write(&control, "").unwrap();
        let dead = RecordingSession {
            pid: 999_999_999,
            audio_file: state.join("gone.wav"),
            control_path: control.clone(),
            recording_id: "deadbeef".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
        };
        let row = state.join("voicepipe-999999999.json");
        std::fs::write(&row, serde_json::to_string(&dead).unwrap()).unwrap();

        assert!(find_active_sessions_in(&state).is_empty());
        assert!(!row.exists());
        assert!(!control.exists());
    }

    #[test]
    fn test_corrupt_session_row_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let row = tmp.path().join("voicepipe-123.json");
        std::fs::write(&row, "{ not json").unwrap();
        assert!(find_active_sessions_in(tmp.path()).is_empty());
        assert!(!row.exists());
    }

    #[test]
    fn test_replay_buffer_file_is_not_a_session() {
        let tmp = tempfile::tempdir().unwrap();
        let last = tmp.path().join("voicepipe-last.json");
        std::fs::write(&last, r#"{"version":1,"created_ms":1,"text":"hi"}"#).unwrap();
        assert!(find_active_sessions_in(tmp.path()).is_empty());
        // Discovery must not eat the replay buffer.
        assert!(last.exists());
    }
}
