//! xdotool-based delivery for X11.
//!
//! The only backend that can target a specific window: the hotkey runner
//! captures the focused window id before any side effects and this
//! delivery re-activates it before typing, so the text lands where the
//! user was working even when the hotkey stole focus.

use super::{canonical_key, tool_available, KeyChord, TypingDelivery};
use crate::error::TypingError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

pub struct XdotoolDelivery;

fn xdotool_key_name(key: &str) -> Result<String, TypingError> {
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

async fn run_xdotool(args: &[String]) -> Result<String, TypingError> {
    let output = Command::new("xdotool")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TypingError::ToolNotFound { tool: "xdotool" }
            } else {
                TypingError::InjectionFailed(e.to_string())
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TypingError::InjectionFailed(format!(
            "xdotool failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn activate_window(window_id: &str) -> Result<(), TypingError> {
    run_xdotool(&[
        "windowactivate".to_string(),
        "--sync".to_string(),
        window_id.to_string(),
    ])
    .await
    .map(|_| ())
}

#[async_trait]
impl TypingDelivery for XdotoolDelivery {
    async fn type_text(&self, text: &str, window_id: Option<&str>) -> Result<(), TypingError> {
        if text.is_empty() {
            return Ok(());
        }
        if !tool_available("xdotool") {
            return Err(TypingError::ToolNotFound { tool: "xdotool" });
        }

        if let Some(window_id) = window_id {
            if let Err(e) = activate_window(window_id).await {
                tracing::warn!("Could not refocus window {}: {}", window_id, e);
            }
        }

        let segments: Vec<&str> = text.split('\n').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !segment.is_empty() {
                run_xdotool(&[
                    "type".to_string(),
                    "--clearmodifiers".to_string(),
                    "--".to_string(),
                    segment.to_string(),
                ])
                .await?;
            }
            if i < last {
                run_xdotool(&["key".to_string(), "Return".to_string()]).await?;
            }
        }
        Ok(())
    }

    async fn press_enter(&self, window_id: Option<&str>) -> Result<(), TypingError> {
        if let Some(window_id) = window_id {
            let _ = activate_window(window_id).await;
        }
        run_xdotool(&["key".to_string(), "Return".to_string()])
            .await
            .map(|_| ())
    }

    async fn press_keys(
        &self,
        chords: &[KeyChord],
        window_id: Option<&str>,
    ) -> Result<(), TypingError> {
        if let Some(window_id) = window_id {
            let _ = activate_window(window_id).await;
        }
        for chord in chords {
            let mut spec = String::new();
            if chord.ctrl {
                spec.push_str("ctrl+");
            }
            if chord.shift {
                spec.push_str("shift+");
            }
            if chord.alt {
                spec.push_str("alt+");
            }
            if chord.meta {
                spec.push_str("super+");
            }
            spec.push_str(&xdotool_key_name(&chord.key)?);
            run_xdotool(&["key".to_string(), spec]).await?;
        }
        Ok(())
    }

    async fn active_window_id(&self) -> Option<String> {
        let id = run_xdotool(&["getactivewindow".to_string()]).await.ok()?;
        let id = id.trim().to_string();
        (!id.is_empty()).then_some(id)
    }

    fn supports_window_id(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "xdotool"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xdotool_key_names() {
        assert_eq!(xdotool_key_name("enter").unwrap(), "Return");
        assert_eq!(xdotool_key_name("pageup").unwrap(), "Page_Up");
        assert_eq!(xdotool_key_name("f24").unwrap(), "F24");
        assert!(xdotool_key_name("f99").is_err());
    }
}
