//! Persist and replay the last voicepipe output text.
//!
//! Supports "oops I typed into the wrong window" workflows by keeping the
//! final output text in a small local buffer so it can be re-delivered
//! without re-transcribing audio. Two sibling files are written: a plain
//! text copy for quick manual inspection and a JSON envelope with metadata.

use crate::paths::{ensure_private_file, runtime_app_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const LAST_TEXT_FILENAME: &str = "voicepipe-last.txt";
const LAST_JSON_FILENAME: &str = "voicepipe-last.json";
const LAST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastOutput {
    pub text: String,
    pub created_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    created_ms: u64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

pub fn last_output_text_path(create_dir: bool) -> PathBuf {
    runtime_app_dir(create_dir).join(LAST_TEXT_FILENAME)
}

pub fn last_output_json_path(create_dir: bool) -> PathBuf {
    runtime_app_dir(create_dir).join(LAST_JSON_FILENAME)
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp_path, content)?;
    match std::fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Save the last output text plus optional metadata payload.
pub fn save_last_output(
    text: &str,
    payload: Option<serde_json::Value>,
) -> std::io::Result<LastOutput> {
    save_last_output_in(&runtime_app_dir(true), text, payload)
}

pub fn save_last_output_in(
    dir: &Path,
    text: &str,
    payload: Option<serde_json::Value>,
) -> std::io::Result<LastOutput> {
    let entry = LastOutput {
        text: text.trim_end_matches('\n').to_string(),
        created_ms: now_ms(),
        payload,
    };

    let txt_path = dir.join(LAST_TEXT_FILENAME);
    atomic_write(&txt_path, &format!("{}\n", entry.text))?;
    ensure_private_file(&txt_path);

    let envelope = Envelope {
        version: LAST_VERSION,
        created_ms: entry.created_ms,
        text: entry.text.clone(),
        payload: entry.payload.clone(),
    };
    let json_path = dir.join(LAST_JSON_FILENAME);
    atomic_write(&json_path, &format!("{}\n", serde_json::to_string(&envelope)?))?;
    ensure_private_file(&json_path);

    Ok(entry)
}

/// Load the last output. Prefers the JSON envelope; falls back to the text
/// file (with its mtime as the timestamp) when the JSON is missing or
/// invalid.
pub fn load_last_output() -> Option<LastOutput> {
    load_last_output_in(&runtime_app_dir(false))
}

pub fn load_last_output_in(dir: &Path) -> Option<LastOutput> {
    let json_path = dir.join(LAST_JSON_FILENAME);
    if let Ok(raw) = std::fs::read_to_string(&json_path) {
        if let Ok(envelope) = serde_json::from_str::<Envelope>(raw.trim()) {
            if envelope.version == LAST_VERSION {
                return Some(LastOutput {
                    text: envelope.text,
                    created_ms: envelope.created_ms,
                    payload: envelope.payload,
                });
            }
        }
    }

    let txt_path = dir.join(LAST_TEXT_FILENAME);
    let raw = std::fs::read_to_string(&txt_path).ok()?;
    let created_ms = std::fs::metadata(&txt_path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Some(LastOutput {
        text: raw.trim_end_matches('\n').to_string(),
        created_ms,
        payload: None,
    })
}

/// Remove both replay buffer files, best-effort.
pub fn clear_last_output() {
    clear_last_output_in(&runtime_app_dir(false));
}

pub fn clear_last_output_in(dir: &Path) {
    let _ = std::fs::remove_file(dir.join(LAST_JSON_FILENAME));
    let _ = std::fs::remove_file(dir.join(LAST_TEXT_FILENAME));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_clear_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let payload = serde_json::json!({"source": "test"});

        let saved = save_last_output_in(tmp.path(), "hi there", Some(payload.clone())).unwrap();
        assert_eq!(saved.text, "hi there");

        let loaded = load_last_output_in(tmp.path()).unwrap();
        assert_eq!(loaded.text, "hi there");
        assert_eq!(loaded.payload, Some(payload));
        assert!(loaded.created_ms > 0);

        clear_last_output_in(tmp.path());
        assert!(load_last_output_in(tmp.path()).is_none());
    }

    #[test]
    fn test_trailing_newlines_are_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        save_last_output_in(tmp.path(), "line\n\n", None).unwrap();
        let loaded = load_last_output_in(tmp.path()).unwrap();
        assert_eq!(loaded.text, "line");

        let raw = std::fs::read_to_string(tmp.path().join(LAST_TEXT_FILENAME)).unwrap();
        assert_eq!(raw, "line\n");
    }

    #[test]
    fn test_falls_back_to_text_file_on_bad_json() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(LAST_JSON_FILENAME), "{ truncated").unwrap();
        std::fs::write(tmp.path().join(LAST_TEXT_FILENAME), "recovered\n").unwrap();

        let loaded = load_last_output_in(tmp.path()).unwrap();
        assert_eq!(loaded.text, "recovered");
        assert!(loaded.payload.is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        clear_last_output_in(tmp.path());
        clear_last_output_in(tmp.path());
    }

    #[test]
    fn test_readers_never_observe_torn_json() {
        // Writers rename into place, so a concurrent reader sees either the
        // old envelope or the new one, fully formed.
        let tmp = tempfile::tempdir().unwrap();
        save_last_output_in(tmp.path(), "first", None).unwrap();
        for i in 0..50 {
            save_last_output_in(tmp.path(), &format!("value {i}"), None).unwrap();
            let loaded = load_last_output_in(tmp.path()).unwrap();
            assert!(loaded.text.starts_with("value ") || loaded.text == "first");
        }
    }
}
