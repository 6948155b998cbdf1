//! Small cross-platform file lock helpers.
//!
//! Used by hotkey-style entrypoints (`voicepipe fast toggle`) to avoid
//! running multiple instances concurrently. The lock is OS-level advisory
//! locking (flock on POSIX, exclusive share mode on Windows), so a crashed
//! holder releases it automatically.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock is held: {path}{detail}")]
    Held { path: String, detail: String },

    #[error("could not open lock file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A tiny PID-file lock based on OS-level file locking.
///
/// The file descriptor stays open for the lifetime of the lock; the PID is
/// written into the file for debugging only.
#[derive(Debug)]
pub struct PidFileLock {
    path: PathBuf,
    file: Option<File>,
}

fn read_holder_detail(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(raw) => match raw.lines().next().map(str::trim) {
            Some(first) if !first.is_empty() => format!(" pid={first}"),
            _ => String::new(),
        },
        Err(_) => String::new(),
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::fd::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    // Exclusive share mode at open time already provides mutual exclusion.
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

fn open_lock_file(path: &PathBuf) -> std::io::Result<File> {
    let mut options = std::fs::OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        // No sharing: a second opener fails until the holder closes.
        options.share_mode(0);
    }
    options.open(path)
}

impl PidFileLock {
    pub fn new(path: PathBuf) -> Self {
        PidFileLock { path, file: None }
    }

    /// Acquire the lock non-blocking, creating the file as needed.
    pub fn acquire(&mut self) -> std::result::Result<(), LockError> {
        if self.file.is_some() {
            return Ok(());
        }

        let file = open_lock_file(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied
                || e.raw_os_error() == Some(32)
            {
                LockError::Held {
                    path: self.path.display().to_string(),
                    detail: read_holder_detail(&self.path),
                }
            } else {
                LockError::Io {
                    path: self.path.display().to_string(),
                    source: e,
                }
            }
        })?;

        if try_lock(&file).is_err() {
            return Err(LockError::Held {
                path: self.path.display().to_string(),
                detail: read_holder_detail(&self.path),
            });
        }

        crate::paths::ensure_private_file(&self.path);

        // Best-effort: store the PID for debugging.
        let mut file = file;
        let _ = file.set_len(0);
        let _ = write!(file, "{}\n", std::process::id());

        self.file = Some(file);
        Ok(())
    }

    /// Release the lock, close the descriptor, and remove the file.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            unlock(&file);
            drop(file);
        }
        let _ = std::fs::remove_file(&self.path);
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for PidFileLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe-fast.lock");

        let mut lock = PidFileLock::new(path.clone());
        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert!(path.exists());

        let pid_text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(pid_text.trim(), std::process::id().to_string());

        lock.release();
        assert!(!lock.is_held());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_second_acquire_fails_while_held() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe-fast.lock");

        let mut first = PidFileLock::new(path.clone());
        first.acquire().unwrap();

        let mut second = PidFileLock::new(path.clone());
        match second.acquire() {
            Err(LockError::Held { .. }) => {}
            other => panic!("expected LockError::Held, got {:?}", other),
        }

        first.release();
        second.acquire().unwrap();
        second.release();
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lock = PidFileLock::new(tmp.path().join("x.lock"));
        lock.acquire().unwrap();
        lock.acquire().unwrap();
        lock.release();
    }
}
