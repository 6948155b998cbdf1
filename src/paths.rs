//! Filesystem paths for voicepipe runtime artifacts.
//!
//! Transient artifacts (sockets, temp audio files, session markers, the
//! replay buffer) live in a per-user runtime directory:
//!
//! - Prefer `XDG_RUNTIME_DIR` when available (systemd user sessions).
//! - Fall back to `/run/user/$UID` when present.
//! - Finally fall back to the system temp directory with a per-user suffix
//!   to avoid cross-user collisions.
//!
//! Persistent state (preserved audio, device cache, logs) lives under the
//! platform state directory.

use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "voicepipe";

const SOCKET_ENV_VARS_DAEMON: &[&str] = &["VOICEPIPE_DAEMON_SOCKET", "VOICEPIPE_SOCKET_PATH"];
const SOCKET_ENV_VARS_TRANSCRIBER: &[&str] = &[
    "VOICEPIPE_TRANSCRIBER_SOCKET",
    "VOICEPIPE_TRANSCRIBER_SOCKET_PATH",
];

#[cfg(unix)]
fn current_uid() -> u32 {
    // Safety: getuid has no failure modes.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Best-effort chmod to 0700; ignored on filesystems that don't support it.
pub fn ensure_private_dir(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Best-effort chmod to 0600; ignored on filesystems that don't support it.
pub fn ensure_private_file(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    ensure_private_dir(path);
    Ok(())
}

/// Return the best-available per-user runtime base directory.
pub fn runtime_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(local) = std::env::var_os("LOCALAPPDATA").filter(|v| !v.is_empty()) {
            return PathBuf::from(local).join(APP_NAME).join("run");
        }
        return std::env::temp_dir().join(APP_NAME);
    }

    #[cfg(not(windows))]
    {
        if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
            if !xdg.is_empty() {
                let candidate = PathBuf::from(xdg);
                if candidate.exists() {
                    return candidate;
                }
            }
        }

        let run_user = PathBuf::from("/run/user").join(current_uid().to_string());
        if run_user.exists() {
            return run_user;
        }

        std::env::temp_dir()
    }
}

/// Return the per-user directory for voicepipe runtime artifacts.
///
/// When the base is the shared system temp dir the path gets a `-<uid>`
/// suffix so parallel users never collide.
pub fn runtime_app_dir(create: bool) -> PathBuf {
    let base = runtime_dir();
    let tmp = std::env::temp_dir();

    let path = if cfg!(windows) {
        // `runtime_dir()` already includes an app-specific suffix on Windows.
        base.clone()
    } else if base == tmp {
        tmp.join(format!("{}-{}", APP_NAME, current_uid()))
    } else {
        base.join(APP_NAME)
    };

    if !create {
        return path;
    }

    if create_private_dir(&path).is_ok() {
        return path;
    }

    // XDG_RUNTIME_DIR (or LOCALAPPDATA) is misconfigured or unwritable;
    // fall back to the temp dir.
    let fallback = if cfg!(windows) {
        tmp.join(APP_NAME)
    } else {
        tmp.join(format!("{}-{}", APP_NAME, current_uid()))
    };
    if let Err(e) = create_private_dir(&fallback) {
        tracing::warn!("Failed to create runtime dir fallback {:?}: {}", fallback, e);
    }
    fallback
}

pub fn daemon_socket_path() -> PathBuf {
    runtime_app_dir(false).join("voicepipe.sock")
}

pub fn transcriber_socket_path() -> PathBuf {
    runtime_app_dir(false).join("voicepipe_transcriber.sock")
}

fn env_socket_path(vars: &[&str]) -> Option<PathBuf> {
    for var in vars {
        if let Ok(raw) = std::env::var(var) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
    }
    None
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

/// Candidate socket paths for the recorder daemon.
///
/// Order matters: explicit env override first, then the canonical per-app
/// runtime dir, then legacy historical locations.
pub fn daemon_socket_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = env_socket_path(SOCKET_ENV_VARS_DAEMON) {
        paths.push(p);
    }
    paths.push(daemon_socket_path());

    // Legacy: socket directly under the runtime dir (no per-app subdir),
    // then older /tmp layouts.
    paths.push(runtime_dir().join("voicepipe.sock"));
    let tmp = std::env::temp_dir();
    paths.push(tmp.join("voicepipe.sock"));
    paths.push(tmp.join(APP_NAME).join("voicepipe.sock"));

    dedup_paths(paths)
}

/// Candidate socket paths for the transcriber daemon.
pub fn transcriber_socket_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = env_socket_path(SOCKET_ENV_VARS_TRANSCRIBER) {
        paths.push(p);
    }
    paths.push(transcriber_socket_path());

    paths.push(runtime_dir().join("voicepipe_transcriber.sock"));
    let tmp = std::env::temp_dir();
    paths.push(tmp.join("voicepipe_transcriber.sock"));
    paths.push(tmp.join(APP_NAME).join("voicepipe_transcriber.sock"));

    dedup_paths(paths)
}

pub fn find_existing_socket(paths: &[PathBuf]) -> Option<PathBuf> {
    paths.iter().find(|p| p.exists()).cloned()
}

/// Return a persistent per-user state directory.
pub fn state_dir(create: bool) -> PathBuf {
    let path = if cfg!(windows) {
        match std::env::var_os("LOCALAPPDATA").filter(|v| !v.is_empty()) {
            Some(local) => PathBuf::from(local).join(APP_NAME).join("state"),
            None => std::env::temp_dir().join(APP_NAME).join("state"),
        }
    } else if cfg!(target_os = "macos") {
        match dirs::home_dir() {
            Some(home) => home
                .join("Library")
                .join("Application Support")
                .join(APP_NAME)
                .join("state"),
            None => std::env::temp_dir().join(APP_NAME).join("state"),
        }
    } else {
        let base = std::env::var("XDG_STATE_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
            .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME));
        base.join(APP_NAME)
    };

    if create {
        if let Err(e) = create_private_dir(&path) {
            tracing::warn!("Failed to create state dir {:?}: {}", path, e);
        }
    }
    path
}

/// Return a persistent per-user logs directory.
pub fn logs_dir(create: bool) -> PathBuf {
    let path = if cfg!(windows) {
        match std::env::var_os("LOCALAPPDATA").filter(|v| !v.is_empty()) {
            Some(local) => PathBuf::from(local).join(APP_NAME).join("logs"),
            None => std::env::temp_dir().join(APP_NAME).join("logs"),
        }
    } else if cfg!(target_os = "macos") {
        match dirs::home_dir() {
            Some(home) => home.join("Library").join("Logs").join(APP_NAME),
            None => std::env::temp_dir().join(APP_NAME).join("logs"),
        }
    } else {
        state_dir(false).join("logs")
    };

    if create {
        if let Err(e) = create_private_dir(&path) {
            tracing::warn!("Failed to create logs dir {:?}: {}", path, e);
        }
    }
    path
}

/// Where audio files are kept when downstream processing fails.
pub fn preserved_audio_dir(create: bool) -> PathBuf {
    let path = state_dir(create).join("audio");
    if create {
        if let Err(e) = create_private_dir(&path) {
            tracing::warn!("Failed to create preserved audio dir {:?}: {}", path, e);
        }
    }
    path
}

/// Where diagnostic artifacts are kept.
pub fn doctor_artifacts_dir(create: bool) -> PathBuf {
    let path = state_dir(create).join("doctor");
    if create {
        if let Err(e) = create_private_dir(&path) {
            tracing::warn!("Failed to create doctor dir {:?}: {}", path, e);
        }
    }
    path
}

/// Session state files live next to the other runtime artifacts.
pub fn session_state_dir(create: bool) -> PathBuf {
    runtime_app_dir(create)
}

/// Temp audio files land in the runtime dir too.
pub fn audio_tmp_dir(create: bool) -> PathBuf {
    runtime_app_dir(create)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_paths_are_deduped_and_ordered() {
        let paths = daemon_socket_paths();
        assert!(!paths.is_empty());
        let unique: std::collections::HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
        // The canonical path must appear before the legacy /tmp entries.
        let canonical = daemon_socket_path();
        let canon_idx = paths.iter().position(|p| *p == canonical).unwrap();
        let tmp_legacy = std::env::temp_dir().join("voicepipe.sock");
        if let Some(tmp_idx) = paths.iter().position(|p| *p == tmp_legacy) {
            assert!(canon_idx < tmp_idx);
        }
    }

    #[test]
    fn test_transcriber_socket_differs_from_daemon_socket() {
        assert_ne!(daemon_socket_path(), transcriber_socket_path());
        assert!(transcriber_socket_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("transcriber"));
    }

    #[test]
    fn test_preserved_audio_dir_is_under_state() {
        let state = state_dir(false);
        let preserved = preserved_audio_dir(false);
        assert!(preserved.starts_with(&state));
        assert_eq!(preserved.file_name().unwrap(), "audio");
    }

    #[test]
    fn test_ensure_private_dir_sets_owner_only_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("rt-probe");
        std::fs::create_dir_all(&dir).unwrap();
        ensure_private_dir(&dir);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
