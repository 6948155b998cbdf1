//! Global hotkey runner.
//!
//! Registers the configured hotkey (default Alt+F5) and fires the fast
//! toggle on each press. Every press goes through the single-instance
//! lock and the debounce window in `fast`, so key repeat, double-fires,
//! and concurrent runners collapse into one action. Audio device
//! resolution is prewarmed at startup so the first press starts
//! recording without probe latency.

use crate::error::HotkeyError;
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};

pub const DEFAULT_HOTKEY: &str = "alt+f5";

fn code_for(name: &str) -> Option<Code> {
    let code = match name {
        "a" => Code::KeyA,
        "b" => Code::KeyB,
        "c" => Code::KeyC,
        "d" => Code::KeyD,
        "e" => Code::KeyE,
        "f" => Code::KeyF,
        "g" => Code::KeyG,
        "h" => Code::KeyH,
        "i" => Code::KeyI,
        "j" => Code::KeyJ,
        "k" => Code::KeyK,
        "l" => Code::KeyL,
        "m" => Code::KeyM,
        "n" => Code::KeyN,
        "o" => Code::KeyO,
        "p" => Code::KeyP,
        "q" => Code::KeyQ,
        "r" => Code::KeyR,
        "s" => Code::KeyS,
        "t" => Code::KeyT,
        "u" => Code::KeyU,
        "v" => Code::KeyV,
        "w" => Code::KeyW,
        "x" => Code::KeyX,
        "y" => Code::KeyY,
        "z" => Code::KeyZ,
        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,
        "f1" => Code::F1,
        "f2" => Code::F2,
        "f3" => Code::F3,
        "f4" => Code::F4,
        "f5" => Code::F5,
        "f6" => Code::F6,
        "f7" => Code::F7,
        "f8" => Code::F8,
        "f9" => Code::F9,
        "f10" => Code::F10,
        "f11" => Code::F11,
        "f12" => Code::F12,
        "f13" => Code::F13,
        "f14" => Code::F14,
        "f15" => Code::F15,
        "f16" => Code::F16,
        "f17" => Code::F17,
        "f18" => Code::F18,
        "f19" => Code::F19,
        "f20" => Code::F20,
        "f21" => Code::F21,
        "f22" => Code::F22,
        "f23" => Code::F23,
        "f24" => Code::F24,
        "space" => Code::Space,
        "tab" => Code::Tab,
        "pause" => Code::Pause,
        "scrolllock" => Code::ScrollLock,
        "insert" => Code::Insert,
        "home" => Code::Home,
        "end" => Code::End,
        _ => return None,
    };
    Some(code)
}

/// Parse a hotkey spec like `alt+f5` or `ctrl+shift+r`.
pub fn parse_hotkey(spec: &str) -> std::result::Result<HotKey, HotkeyError> {
    let mut modifiers = Modifiers::empty();
    let mut code = None;

    for part in spec.split('+').map(|p| p.trim().to_lowercase()) {
        match part.as_str() {
            "" => return Err(HotkeyError::InvalidSpec(spec.to_string())),
            "ctrl" | "control" => modifiers |= Modifiers::CONTROL,
            "shift" => modifiers |= Modifiers::SHIFT,
            "alt" | "option" => modifiers |= Modifiers::ALT,
            "super" | "meta" | "win" | "cmd" => modifiers |= Modifiers::SUPER,
            key => {
                if code.is_some() {
                    return Err(HotkeyError::InvalidSpec(spec.to_string()));
                }
                code = Some(code_for(key).ok_or_else(|| HotkeyError::InvalidSpec(spec.to_string()))?);
            }
        }
    }

    let code = code.ok_or_else(|| HotkeyError::InvalidSpec(spec.to_string()))?;
    let modifiers = (!modifiers.is_empty()).then_some(modifiers);
    Ok(HotKey::new(modifiers, code))
}

fn configured_hotkey_spec() -> String {
    std::env::var("VOICEPIPE_HOTKEY")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_HOTKEY.to_string())
}

/// Run the hotkey listener until the process is killed.
pub async fn run() -> anyhow::Result<()> {
    let spec = configured_hotkey_spec();
    let hotkey = parse_hotkey(&spec)?;

    let manager = GlobalHotKeyManager::new()
        .map_err(|e| HotkeyError::EventLoop(format!("cannot create hotkey manager: {e}")))?;
    manager
        .register(hotkey)
        .map_err(|e| HotkeyError::RegisterFailed(spec.clone(), e.to_string()))?;
    tracing::info!("Hotkey registered: {}", spec);

    // Warm the device cache so the first press starts instantly.
    tokio::task::spawn_blocking(|| {
        match crate::audio::device::resolve_input_device(None, None) {
            Ok((selection, source)) => tracing::info!(
                "Audio prewarmed: device {} @ {}Hz ({:?})",
                selection.device_id,
                selection.sample_rate_hz,
                source
            ),
            Err(e) => tracing::warn!("Audio prewarm failed: {}", e),
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let hotkey_id = hotkey.id();
    std::thread::spawn(move || {
        let receiver = GlobalHotKeyEvent::receiver();
        while let Ok(event) = receiver.recv() {
            // Only the press edge triggers; firing on release as well
            // would toggle twice per keystroke.
            if event.id() == hotkey_id && event.state() == HotKeyState::Pressed {
                if tx.send(()).is_err() {
                    break;
                }
            }
        }
    });

    while rx.recv().await.is_some() {
        // Each press runs on its own task; the lock and debounce inside
        // fast_toggle reject overlap.
        tokio::spawn(async {
            if let Err(e) = crate::fast::fast_toggle().await {
                eprintln!("Error: {e}");
            }
        });
    }

    // Keep the manager alive for the life of the loop.
    drop(manager);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_hotkey() {
        let hotkey = parse_hotkey("alt+f5").unwrap();
        assert_eq!(hotkey, HotKey::new(Some(Modifiers::ALT), Code::F5));
    }

    #[test]
    fn test_parse_multi_modifier() {
        let hotkey = parse_hotkey("Ctrl+Shift+R").unwrap();
        assert_eq!(
            hotkey,
            HotKey::new(Some(Modifiers::CONTROL | Modifiers::SHIFT), Code::KeyR)
        );
    }

    #[test]
    fn test_parse_bare_key() {
        let hotkey = parse_hotkey("scrolllock").unwrap();
        assert_eq!(hotkey, HotKey::new(None, Code::ScrollLock));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_hotkey("").is_err());
        assert!(parse_hotkey("alt+").is_err());
        assert!(parse_hotkey("alt+f5+f6").is_err());
        assert!(parse_hotkey("alt+warp").is_err());
    }
}
