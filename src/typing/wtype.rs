//! wtype-based delivery for Wayland.
//!
//! Preferred on Wayland: no daemon required and solid Unicode/CJK
//! support via the virtual-keyboard protocol.

use super::{canonical_key, tool_available, KeyChord, TypingDelivery};
use crate::error::TypingError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

pub struct WtypeDelivery;

fn wtype_key_name(key: &str) -> Result<String, TypingError> {
    let canonical = canonical_key(key)?;
    let name = match canonical.as_str() {
        "enter" => "Return".to_string(),
        "tab" => "Tab".to_string(),
        "esc" => "Escape".to_string(),
        "space" => "space".to_string(),
        "backspace" => "BackSpace".to_string(),
        "delete" => "Delete".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        "pageup" => "Page_Up".to_string(),
        "pagedown" => "Page_Down".to_string(),
        "up" => "Up".to_string(),
        "down" => "Down".to_string(),
        "left" => "Left".to_string(),
        "right" => "Right".to_string(),
        key if key.starts_with('f') && key.len() > 1 => key.to_uppercase(),
        key => key.to_string(),
    };
    Ok(name)
}

async fn run_wtype(args: &[String]) -> Result<(), TypingError> {
    let output = Command::new("wtype")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TypingError::ToolNotFound { tool: "wtype" }
            } else {
                TypingError::InjectionFailed(e.to_string())
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TypingError::InjectionFailed(format!(
            "wtype failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

#[async_trait]
impl TypingDelivery for WtypeDelivery {
    async fn type_text(&self, text: &str, _window_id: Option<&str>) -> Result<(), TypingError> {
        if text.is_empty() {
            return Ok(());
        }
        if !tool_available("wtype") {
            return Err(TypingError::ToolNotFound { tool: "wtype" });
        }

        // Newlines become Return presses; wtype would otherwise inject a
        // literal newline character.
        let segments: Vec<&str> = text.split('\n').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !segment.is_empty() {
                run_wtype(&["--".to_string(), segment.to_string()]).await?;
            }
            if i < last {
                self.press_enter(None).await?;
            }
        }
        Ok(())
    }

    async fn press_enter(&self, _window_id: Option<&str>) -> Result<(), TypingError> {
        run_wtype(&["-k".to_string(), "Return".to_string()]).await
    }

    async fn press_keys(
        &self,
        chords: &[KeyChord],
        _window_id: Option<&str>,
    ) -> Result<(), TypingError> {
        for chord in chords {
            let mut args: Vec<String> = Vec::new();
            let mut mods: Vec<&str> = Vec::new();
            if chord.ctrl {
                mods.push("ctrl");
            }
            if chord.shift {
                mods.push("shift");
            }
            if chord.alt {
                mods.push("alt");
            }
            if chord.meta {
                mods.push("logo");
            }
            for m in &mods {
                args.push("-M".to_string());
                args.push(m.to_string());
            }
            args.push("-k".to_string());
            args.push(wtype_key_name(&chord.key)?);
            for m in mods.iter().rev() {
                args.push("-m".to_string());
                args.push(m.to_string());
            }
            run_wtype(&args).await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "wtype"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wtype_key_names() {
        assert_eq!(wtype_key_name("enter").unwrap(), "Return");
        assert_eq!(wtype_key_name("esc").unwrap(), "Escape");
        assert_eq!(wtype_key_name("f5").unwrap(), "F5");
        assert_eq!(wtype_key_name("left").unwrap(), "Left");
        assert_eq!(wtype_key_name("a").unwrap(), "a");
        assert!(wtype_key_name("warp").is_err());
    }
}
