//! Intent routing: split a transcript into dictation vs command mode.
//!
//! A transcript that starts with a configured wake prefix ("zwingli, ...")
//! is a spoken command; everything else is plain dictation. This is purely
//! a string classification on the transcription output, not an audio wake
//! word, and it never transforms the text beyond stripping the prefix.

use crate::transcribe::TranscriptionResult;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentMode {
    Dictation,
    Command,
    Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntentResult {
    pub mode: IntentMode,
    pub dictation_text: Option<String>,
    pub command_text: Option<String>,
    pub reason: String,
}

impl IntentResult {
    pub fn dictation(text: &str, reason: &str) -> Self {
        IntentResult {
            mode: IntentMode::Dictation,
            dictation_text: Some(text.to_string()),
            command_text: None,
            reason: reason.to_string(),
        }
    }

    fn command(text: String, reason: String) -> Self {
        IntentResult {
            mode: IntentMode::Command,
            dictation_text: None,
            command_text: Some(text),
            reason,
        }
    }
}

const PREFIX_SEPARATORS: &[char] = &[' ', ',', ':', ';', '.'];

/// Classify a transcription as dictation or command.
pub fn route_intent(transcription: &TranscriptionResult, wake_prefixes: &[String]) -> IntentResult {
    let text = transcription.text.trim();
    if text.is_empty() {
        return IntentResult {
            mode: IntentMode::Unknown,
            dictation_text: Some(String::new()),
            command_text: None,
            reason: "empty".to_string(),
        };
    }

    let lowered = text.to_lowercase();
    for raw_prefix in wake_prefixes {
        let prefix = raw_prefix.trim().to_lowercase();
        if prefix.is_empty() {
            continue;
        }

        if lowered == prefix {
            return IntentResult::command(String::new(), format!("prefix:{prefix}"));
        }

        if let Some(rest) = lowered.strip_prefix(&prefix) {
            if rest.starts_with(PREFIX_SEPARATORS) {
                // Slice the original (non-lowered) text so casing survives.
                let mut remainder = &text[prefix.len()..];
                if remainder.starts_with([',', ':', ';', '.']) {
                    remainder = &remainder[1..];
                }
                return IntentResult::command(
                    remainder.trim_start().to_string(),
                    format!("prefix:{prefix}"),
                );
            }
        }
    }

    IntentResult::dictation(text, "default")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::TranscriptionResult;

    fn prefixes(items: &[&str]) -> Vec<String> {
        items.iter().map(|p| p.to_string()).collect()
    }

    fn result(text: &str) -> TranscriptionResult {
        TranscriptionResult::new(text, "openai", "gpt-4o-transcribe", "test")
    }

    #[test]
    fn test_empty_text_is_unknown() {
        let intent = route_intent(&result("   "), &prefixes(&["zwingli"]));
        assert_eq!(intent.mode, IntentMode::Unknown);
        assert_eq!(intent.reason, "empty");
    }

    #[test]
    fn test_plain_text_is_dictation() {
        let intent = route_intent(&result("  hello world  "), &prefixes(&["zwingli"]));
        assert_eq!(intent.mode, IntentMode::Dictation);
        assert_eq!(intent.dictation_text.as_deref(), Some("hello world"));
        assert_eq!(intent.reason, "default");
    }

    #[test]
    fn test_prefix_with_comma_routes_to_command() {
        let intent = route_intent(
            &result("Computer, open the browser"),
            &prefixes(&["zwingli", "zwingly", "computer"]),
        );
        assert_eq!(intent.mode, IntentMode::Command);
        assert_eq!(intent.command_text.as_deref(), Some("open the browser"));
        assert_eq!(intent.reason, "prefix:computer");
    }

    #[test]
    fn test_prefix_with_space_and_colon() {
        for text in ["zwingli do it", "zwingli: do it", "zwingli; do it", "zwingli. do it"] {
            let intent = route_intent(&result(text), &prefixes(&["zwingli"]));
            assert_eq!(intent.mode, IntentMode::Command, "text: {text}");
            assert_eq!(intent.command_text.as_deref(), Some("do it"), "text: {text}");
        }
    }

    #[test]
    fn test_bare_prefix_is_empty_command() {
        let intent = route_intent(&result("Zwingli"), &prefixes(&["zwingli"]));
        assert_eq!(intent.mode, IntentMode::Command);
        assert_eq!(intent.command_text.as_deref(), Some(""));
    }

    #[test]
    fn test_prefix_must_be_word_delimited() {
        let intent = route_intent(&result("zwinglification is real"), &prefixes(&["zwingli"]));
        assert_eq!(intent.mode, IntentMode::Dictation);
    }

    #[test]
    fn test_dictation_text_equals_trimmed_input() {
        // Idempotence contract: dictation passes the trimmed text through.
        let intent = route_intent(&result("\n keep THIS casing \n"), &prefixes(&["zwingli"]));
        assert_eq!(intent.dictation_text.as_deref(), Some("keep THIS casing"));
    }
}
