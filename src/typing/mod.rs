//! Typing delivery: inject text and key events into the focused window.
//!
//! The session type is detected once per process and picks a backend:
//! wtype on Wayland, xdotool on X11, osascript on macOS, synthetic input
//! on Windows. `VOICEPIPE_TYPE_BACKEND` bypasses detection entirely.
//!
//! Contract shared by every backend: `\n` in text produces a Return key
//! press, never a literal newline; Unicode (including surrogate-pair code
//! points) passes through intact; failures come back as error values that
//! callers report once and never retry.

pub mod osascript;
#[cfg(windows)]
pub mod sendinput;
pub mod wtype;
pub mod xdotool;

use crate::error::TypingError;
use async_trait::async_trait;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Wayland,
    X11,
    MacOs,
    Windows,
    Unknown,
}

/// Which delivery mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Wtype,
    Xdotool,
    Osascript,
    SendInput,
    None,
}

/// One key press with modifiers. `key` is a canonical name: a single
/// character, `enter`, `tab`, `esc`, `up`/`down`/`left`/`right`, or
/// `f1`..`f24`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyChord {
    pub key: String,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl KeyChord {
    pub fn plain(key: &str) -> Self {
        KeyChord {
            key: key.to_string(),
            ..Default::default()
        }
    }
}

/// One step of a mixed output stream (plugin and LLM outputs).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSequenceItem {
    Text(String),
    Key(KeyChord),
}

#[async_trait]
pub trait TypingDelivery: Send + Sync {
    async fn type_text(&self, text: &str, window_id: Option<&str>)
        -> Result<(), TypingError>;

    async fn press_enter(&self, window_id: Option<&str>) -> Result<(), TypingError>;

    async fn press_keys(
        &self,
        chords: &[KeyChord],
        window_id: Option<&str>,
    ) -> Result<(), TypingError>;

    /// Best-effort id of the currently focused window.
    async fn active_window_id(&self) -> Option<String> {
        None
    }

    fn supports_window_id(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// A backend that swallows everything; used for `none`/`disable` and for
/// print-only flows.
pub struct NullDelivery;

#[async_trait]
impl TypingDelivery for NullDelivery {
    async fn type_text(&self, _text: &str, _window_id: Option<&str>) -> Result<(), TypingError> {
        Ok(())
    }

    async fn press_enter(&self, _window_id: Option<&str>) -> Result<(), TypingError> {
        Ok(())
    }

    async fn press_keys(
        &self,
        _chords: &[KeyChord],
        _window_id: Option<&str>,
    ) -> Result<(), TypingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

fn detect_session_type_from_env() -> SessionType {
    if cfg!(windows) {
        return SessionType::Windows;
    }
    if cfg!(target_os = "macos") {
        return SessionType::MacOs;
    }
    let nonempty = |name: &str| {
        std::env::var(name)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    };
    if nonempty("WAYLAND_DISPLAY") {
        SessionType::Wayland
    } else if nonempty("DISPLAY") {
        SessionType::X11
    } else {
        SessionType::Unknown
    }
}

static SESSION_TYPE: OnceLock<SessionType> = OnceLock::new();

/// Session type, detected once per process.
pub fn detect_session_type() -> SessionType {
    *SESSION_TYPE.get_or_init(detect_session_type_from_env)
}

fn backend_for_session(session: SessionType) -> Result<BackendKind, TypingError> {
    match session {
        SessionType::Wayland => Ok(BackendKind::Wtype),
        SessionType::X11 => Ok(BackendKind::Xdotool),
        SessionType::MacOs => Ok(BackendKind::Osascript),
        SessionType::Windows => Ok(BackendKind::SendInput),
        SessionType::Unknown => Err(TypingError::NoBackend),
    }
}

/// Parse a `VOICEPIPE_TYPE_BACKEND` value.
pub fn parse_backend_override(raw: &str) -> Result<Option<BackendKind>, TypingError> {
    match raw.trim().to_lowercase().as_str() {
        "" | "auto" => Ok(None),
        "wayland" | "wtype" => Ok(Some(BackendKind::Wtype)),
        "x11" | "xdotool" => Ok(Some(BackendKind::Xdotool)),
        "osascript" => Ok(Some(BackendKind::Osascript)),
        "sendinput" => Ok(Some(BackendKind::SendInput)),
        "none" | "disable" => Ok(Some(BackendKind::None)),
        other => Err(TypingError::UnknownBackend(other.to_string())),
    }
}

/// Pick the backend kind: env override first, then session detection.
pub fn resolve_backend_kind() -> Result<BackendKind, TypingError> {
    if let Ok(raw) = std::env::var("VOICEPIPE_TYPE_BACKEND") {
        if let Some(kind) = parse_backend_override(&raw)? {
            return Ok(kind);
        }
    }
    backend_for_session(detect_session_type())
}

/// Construct the delivery for a backend kind.
pub fn create_delivery(kind: BackendKind) -> Box<dyn TypingDelivery> {
    match kind {
        BackendKind::Wtype => Box::new(wtype::WtypeDelivery),
        BackendKind::Xdotool => Box::new(xdotool::XdotoolDelivery),
        BackendKind::Osascript => Box::new(osascript::OsascriptDelivery),
        #[cfg(windows)]
        BackendKind::SendInput => Box::new(sendinput::SendInputDelivery),
        #[cfg(not(windows))]
        BackendKind::SendInput => Box::new(NullDelivery),
        BackendKind::None => Box::new(NullDelivery),
    }
}

/// Resolve the configured delivery in one step.
pub fn resolve_typing_delivery() -> Result<Box<dyn TypingDelivery>, TypingError> {
    resolve_backend_kind().map(create_delivery)
}

/// Run a mixed text/key stream through a delivery.
pub async fn perform_type_sequence(
    delivery: &dyn TypingDelivery,
    items: &[TypeSequenceItem],
    window_id: Option<&str>,
) -> Result<(), TypingError> {
    for item in items {
        match item {
            TypeSequenceItem::Text(text) => delivery.type_text(text, window_id).await?,
            TypeSequenceItem::Key(chord) => {
                delivery.press_keys(std::slice::from_ref(chord), window_id).await?
            }
        }
    }
    Ok(())
}

/// Canonicalize a key name shared by all backends. Errors on names no
/// backend understands.
pub(crate) fn canonical_key(name: &str) -> Result<String, TypingError> {
    let lower = name.trim().to_lowercase();
    let canonical = match lower.as_str() {
        "enter" | "return" => "enter",
        "tab" => "tab",
        "esc" | "escape" => "esc",
        "space" => "space",
        "backspace" => "backspace",
        "delete" | "del" => "delete",
        "home" => "home",
        "end" => "end",
        "pageup" | "page_up" => "pageup",
        "pagedown" | "page_down" => "pagedown",
        "up" | "down" | "left" | "right" => return Ok(lower),
        _ => {
            if lower.len() == 1 {
                return Ok(lower);
            }
            if let Some(num) = lower.strip_prefix('f') {
                if let Ok(n) = num.parse::<u8>() {
                    if (1..=24).contains(&n) {
                        return Ok(lower);
                    }
                }
            }
            return Err(TypingError::UnknownKey(name.to_string()));
        }
    };
    Ok(canonical.to_string())
}

/// Whether a tool exists on PATH; backends check before first use.
pub(crate) fn tool_available(tool: &str) -> bool {
    which::which(tool).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_override() {
        assert_eq!(parse_backend_override("auto").unwrap(), None);
        assert_eq!(
            parse_backend_override("wayland").unwrap(),
            Some(BackendKind::Wtype)
        );
        assert_eq!(
            parse_backend_override("xdotool").unwrap(),
            Some(BackendKind::Xdotool)
        );
        assert_eq!(
            parse_backend_override("disable").unwrap(),
            Some(BackendKind::None)
        );
        assert!(parse_backend_override("teleport").is_err());
    }

    #[test]
    fn test_canonical_key_names() {
        assert_eq!(canonical_key("Return").unwrap(), "enter");
        assert_eq!(canonical_key("ESC").unwrap(), "esc");
        assert_eq!(canonical_key("F13").unwrap(), "f13");
        assert_eq!(canonical_key("a").unwrap(), "a");
        assert_eq!(canonical_key("Left").unwrap(), "left");
        assert!(canonical_key("f25").is_err());
        assert!(canonical_key("hyperdrive").is_err());
    }

    #[tokio::test]
    async fn test_null_delivery_accepts_everything() {
        let delivery = NullDelivery;
        delivery.type_text("hello\nworld", None).await.unwrap();
        delivery.press_enter(None).await.unwrap();
        delivery
            .press_keys(&[KeyChord::plain("enter")], None)
            .await
            .unwrap();
        assert!(delivery.active_window_id().await.is_none());
    }

    #[tokio::test]
    async fn test_perform_type_sequence_on_null() {
        let delivery = NullDelivery;
        let items = vec![
            TypeSequenceItem::Text("hello".into()),
            TypeSequenceItem::Key(KeyChord::plain("tab")),
            TypeSequenceItem::Text("world".into()),
        ];
        perform_type_sequence(&delivery, &items, None).await.unwrap();
    }
}
