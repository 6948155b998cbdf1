//! Synthetic-input delivery for Windows, via enigo.
//!
//! Hotkey handlers often fire while Alt is still physically down, which
//! turns typed text into menu accelerators; stuck modifiers are released
//! before any text goes out. Text is emitted in bounded batches to keep
//! individual SendInput calls small.

use super::{canonical_key, KeyChord, TypingDelivery};
use crate::error::TypingError;
use async_trait::async_trait;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};

pub struct SendInputDelivery;

const TEXT_BATCH_CHARS: usize = 256;

fn new_enigo() -> Result<Enigo, TypingError> {
    Enigo::new(&Settings::default())
        .map_err(|e| TypingError::InjectionFailed(format!("enigo init failed: {e}")))
}

fn release_stuck_modifiers(enigo: &mut Enigo) {
    for key in [Key::Shift, Key::Control, Key::Alt, Key::Meta] {
        let _ = enigo.key(key, Direction::Release);
    }
}

fn enigo_key_for(key: &str) -> Result<Key, TypingError> {
    let canonical = canonical_key(key)?;
    let key = match canonical.as_str() {
        "enter" => Key::Return,
        "tab" => Key::Tab,
        "esc" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" => Key::Delete,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        other => {
            if let Some(ch) = other.chars().next().filter(|_| other.len() == 1) {
                Key::Unicode(ch)
            } else if let Some(n) = other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                match n {
                    1 => Key::F1,
                    2 => Key::F2,
                    3 => Key::F3,
                    4 => Key::F4,
                    5 => Key::F5,
                    6 => Key::F6,
                    7 => Key::F7,
                    8 => Key::F8,
                    9 => Key::F9,
                    10 => Key::F10,
                    11 => Key::F11,
                    12 => Key::F12,
                    13 => Key::F13,
                    14 => Key::F14,
                    15 => Key::F15,
                    16 => Key::F16,
                    17 => Key::F17,
                    18 => Key::F18,
                    19 => Key::F19,
                    20 => Key::F20,
                    21 => Key::F21,
                    22 => Key::F22,
                    23 => Key::F23,
                    24 => Key::F24,
                    _ => return Err(TypingError::UnknownKey(other.to_string())),
                }
            } else {
                return Err(TypingError::UnknownKey(other.to_string()));
            }
        }
    };
    Ok(key)
}

fn type_text_blocking(text: &str) -> Result<(), TypingError> {
    let mut enigo = new_enigo()?;
    release_stuck_modifiers(&mut enigo);

    let segments: Vec<&str> = text.split('\n').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        // Chunk on char boundaries so surrogate-pair code points survive.
        let chars: Vec<char> = segment.chars().collect();
        for batch in chars.chunks(TEXT_BATCH_CHARS) {
            let chunk: String = batch.iter().collect();
            enigo
                .text(&chunk)
                .map_err(|e| TypingError::InjectionFailed(e.to_string()))?;
        }
        if i < last {
            enigo
                .key(Key::Return, Direction::Click)
                .map_err(|e| TypingError::InjectionFailed(e.to_string()))?;
        }
    }
    Ok(())
}

fn press_keys_blocking(chords: &[KeyChord]) -> Result<(), TypingError> {
    let mut enigo = new_enigo()?;
    for chord in chords {
        let mut held = Vec::new();
        if chord.ctrl {
            held.push(Key::Control);
        }
        if chord.shift {
            held.push(Key::Shift);
        }
        if chord.alt {
            held.push(Key::Alt);
        }
        if chord.meta {
            held.push(Key::Meta);
        }
        for key in &held {
            enigo
                .key(*key, Direction::Press)
                .map_err(|e| TypingError::InjectionFailed(e.to_string()))?;
        }
        let result = enigo
            .key(enigo_key_for(&chord.key)?, Direction::Click)
            .map_err(|e| TypingError::InjectionFailed(e.to_string()));
        for key in held.iter().rev() {
            let _ = enigo.key(*key, Direction::Release);
        }
        result?;
    }
    Ok(())
}

#[async_trait]
impl TypingDelivery for SendInputDelivery {
    async fn type_text(&self, text: &str, _window_id: Option<&str>) -> Result<(), TypingError> {
        if text.is_empty() {
            return Ok(());
        }
        let text = text.to_string();
        tokio::task::spawn_blocking(move || type_text_blocking(&text))
            .await
            .map_err(|e| TypingError::InjectionFailed(e.to_string()))?
    }

    async fn press_enter(&self, _window_id: Option<&str>) -> Result<(), TypingError> {
        tokio::task::spawn_blocking(|| press_keys_blocking(&[KeyChord::plain("enter")]))
            .await
            .map_err(|e| TypingError::InjectionFailed(e.to_string()))?
    }

    async fn press_keys(
        &self,
        chords: &[KeyChord],
        _window_id: Option<&str>,
    ) -> Result<(), TypingError> {
        let chords = chords.to_vec();
        tokio::task::spawn_blocking(move || press_keys_blocking(&chords))
            .await
            .map_err(|e| TypingError::InjectionFailed(e.to_string()))?
    }

    fn name(&self) -> &'static str {
        "sendinput"
    }
}
