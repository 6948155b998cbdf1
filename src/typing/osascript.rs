//! AppleScript-based delivery for macOS.
//!
//! Drives System Events `keystroke` for text and `key code` for special
//! keys. Requires Accessibility permission for the invoking terminal.

use super::{canonical_key, KeyChord, TypingDelivery};
use crate::error::TypingError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

pub struct OsascriptDelivery;

const RETURN_KEY_CODE: u8 = 36;

fn key_code_for(key: &str) -> Result<u8, TypingError> {
    let canonical = canonical_key(key)?;
    let code = match canonical.as_str() {
        "enter" => 36,
        "tab" => 48,
        "space" => 49,
        "esc" => 53,
        "backspace" => 51,
        "delete" => 117,
        "home" => 115,
        "end" => 119,
        "pageup" => 116,
        "pagedown" => 121,
        "left" => 123,
        "right" => 124,
        "down" => 125,
        "up" => 126,
        "f1" => 122,
        "f2" => 120,
        "f3" => 99,
        "f4" => 118,
        "f5" => 96,
        "f6" => 97,
        "f7" => 98,
        "f8" => 100,
        "f9" => 101,
        "f10" => 109,
        "f11" => 103,
        "f12" => 111,
        "f13" => 105,
        "f14" => 107,
        "f15" => 113,
        "f16" => 106,
        "f17" => 64,
        "f18" => 79,
        "f19" => 80,
        "f20" => 90,
        other => {
            return Err(TypingError::UnknownKey(other.to_string()));
        }
    };
    Ok(code)
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn modifier_clause(chord: &KeyChord) -> String {
    let mut mods = Vec::new();
    if chord.meta {
        mods.push("command down");
    }
    if chord.ctrl {
        mods.push("control down");
    }
    if chord.alt {
        mods.push("option down");
    }
    if chord.shift {
        mods.push("shift down");
    }
    if mods.is_empty() {
        String::new()
    } else {
        format!(" using {{{}}}", mods.join(", "))
    }
}

async fn run_osascript(script: &str) -> Result<(), TypingError> {
    let output = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TypingError::ToolNotFound { tool: "osascript" }
            } else {
                TypingError::InjectionFailed(e.to_string())
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TypingError::InjectionFailed(format!(
            "osascript failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

#[async_trait]
impl TypingDelivery for OsascriptDelivery {
    async fn type_text(&self, text: &str, _window_id: Option<&str>) -> Result<(), TypingError> {
        if text.is_empty() {
            return Ok(());
        }

        let segments: Vec<&str> = text.split('\n').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !segment.is_empty() {
                let script = format!(
                    "tell application \"System Events\" to keystroke \"{}\"",
                    escape_applescript(segment)
                );
                run_osascript(&script).await?;
            }
            if i < last {
                self.press_enter(None).await?;
            }
        }
        Ok(())
    }

    async fn press_enter(&self, _window_id: Option<&str>) -> Result<(), TypingError> {
        run_osascript(&format!(
            "tell application \"System Events\" to key code {RETURN_KEY_CODE}"
        ))
        .await
    }

    async fn press_keys(
        &self,
        chords: &[KeyChord],
        _window_id: Option<&str>,
    ) -> Result<(), TypingError> {
        for chord in chords {
            let mods = modifier_clause(chord);
            let canonical = canonical_key(&chord.key)?;
            let script = if canonical.len() == 1 {
                format!(
                    "tell application \"System Events\" to keystroke \"{}\"{}",
                    escape_applescript(&canonical),
                    mods
                )
            } else {
                format!(
                    "tell application \"System Events\" to key code {}{}",
                    key_code_for(&canonical)?,
                    mods
                )
            };
            run_osascript(&script).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "osascript"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_applescript() {
        assert_eq!(escape_applescript(r#"say "hi"\now"#), r#"say \"hi\"\\now"#);
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(key_code_for("enter").unwrap(), 36);
        assert_eq!(key_code_for("esc").unwrap(), 53);
        assert_eq!(key_code_for("f5").unwrap(), 96);
        assert!(key_code_for("f21").is_err());
    }

    #[test]
    fn test_modifier_clause() {
        let chord = KeyChord {
            key: "a".into(),
            meta: true,
            shift: true,
            ..Default::default()
        };
        assert_eq!(modifier_clause(&chord), " using {command down, shift down}");
        assert_eq!(modifier_clause(&KeyChord::plain("a")), "");
    }
}
