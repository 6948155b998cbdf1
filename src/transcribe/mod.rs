//! Speech-to-text: backend selection and shared transcription helpers.
//!
//! Two remote backends are supported, OpenAI and ElevenLabs. Callers go
//! through `transcribe_audio_file`, which prefers the long-lived
//! transcriber daemon (warm HTTP clients, no process startup cost) and
//! falls back to an in-process upload when the daemon is unreachable.

pub mod daemon;
pub mod elevenlabs;
pub mod openai;

use crate::error::TranscribeError;
use serde_json::{json, Value};
use std::path::Path;

/// Options forwarded to whichever backend handles the upload.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub temperature: f32,
}

/// A blocking speech-to-text client.
pub trait Transcriber: Send {
    fn transcribe(
        &self,
        audio_file: &Path,
        options: &TranscribeOptions,
        model: Option<&str>,
    ) -> std::result::Result<String, TranscribeError>;
}

impl std::fmt::Debug for dyn Transcriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dyn Transcriber>")
    }
}

/// The result of one transcription, immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub backend: String,
    pub model: String,
    pub audio_path: Option<String>,
    pub recording_id: Option<String>,
    /// Short tag identifying the caller ("dictate", "stop", "hotkey-toggle").
    pub source: String,
    pub warnings: Vec<String>,
}

impl TranscriptionResult {
    pub fn new(text: &str, backend: &str, model: &str, source: &str) -> Self {
        TranscriptionResult {
            text: text.to_string(),
            backend: backend.to_string(),
            model: model.to_string(),
            audio_path: None,
            recording_id: None,
            source: source.to_string(),
            warnings: Vec::new(),
        }
    }

    pub fn with_audio_path(mut self, path: &Path) -> Self {
        self.audio_path = Some(path.display().to_string());
        self
    }

    pub fn to_payload(&self) -> Value {
        json!({
            "text": self.text,
            "backend": self.backend,
            "model": self.model,
            "audio_file": self.audio_path,
            "recording_id": self.recording_id,
            "source": self.source,
            "warnings": self.warnings,
        })
    }
}

fn normalize_backend(value: &str) -> String {
    let raw = value.trim().to_lowercase();
    match raw.as_str() {
        "xi" | "eleven" | "eleven-labs" => "elevenlabs".to_string(),
        _ => raw,
    }
}

/// Resolve `(backend, model)` from an optional model string.
///
/// `"<backend>:<model>"` selects a per-call backend override; a bare model
/// keeps the default backend.
pub fn resolve_backend_and_model(
    model: Option<&str>,
    default_backend: &str,
    default_model: &str,
) -> (String, String) {
    if let Some(raw) = model.map(str::trim).filter(|m| !m.is_empty()) {
        if let Some((maybe_backend, rest)) = raw.split_once(':') {
            let backend = normalize_backend(maybe_backend);
            let model_id = rest.trim();
            if matches!(backend.as_str(), "openai" | "elevenlabs") && !model_id.is_empty() {
                return (backend, model_id.to_string());
            }
        }
        return (normalize_backend(default_backend), raw.to_string());
    }
    (normalize_backend(default_backend), default_model.to_string())
}

/// Instantiate a backend client.
pub fn build_transcriber(
    backend: &str,
    model: &str,
) -> std::result::Result<Box<dyn Transcriber>, TranscribeError> {
    match backend {
        "openai" => Ok(Box::new(openai::OpenAiTranscriber::new(model)?)),
        "elevenlabs" => Ok(Box::new(elevenlabs::ElevenLabsTranscriber::new(model)?)),
        other => Err(TranscribeError::UnsupportedBackend(other.to_string())),
    }
}

/// Transcribe an on-disk audio file, preferring the transcriber daemon.
pub async fn transcribe_audio_file(
    audio_file: &Path,
    model: &str,
    options: &TranscribeOptions,
    prefer_daemon: bool,
) -> std::result::Result<String, TranscribeError> {
    if prefer_daemon {
        match daemon::transcribe_via_daemon(audio_file, Some(model), options).await {
            Ok(text) => return Ok(text),
            Err(crate::error::IpcError::Unavailable(reason)) => {
                tracing::debug!("Transcriber daemon unavailable ({}), going direct", reason);
            }
            Err(e) => return Err(TranscribeError::Failed(e.to_string())),
        }
    }

    let (backend, model) = resolve_backend_and_model(
        Some(model),
        &crate::config::transcribe_backend(),
        &crate::config::transcribe_model(),
    );
    let audio_file = audio_file.to_path_buf();
    let options = options.clone();
    tokio::task::spawn_blocking(move || {
        let transcriber = build_transcriber(&backend, &model)?;
        transcriber.transcribe(&audio_file, &options, Some(&model))
    })
    .await
    .map_err(|e| TranscribeError::Failed(format!("transcription task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_backend_and_model_defaults() {
        let (backend, model) = resolve_backend_and_model(None, "openai", "gpt-4o-transcribe");
        assert_eq!(backend, "openai");
        assert_eq!(model, "gpt-4o-transcribe");
    }

    #[test]
    fn test_resolve_backend_and_model_override() {
        let (backend, model) =
            resolve_backend_and_model(Some("elevenlabs:scribe_v1"), "openai", "whisper-1");
        assert_eq!(backend, "elevenlabs");
        assert_eq!(model, "scribe_v1");
    }

    #[test]
    fn test_resolve_backend_aliases() {
        for alias in ["xi:scribe_v1", "eleven:scribe_v1", "eleven-labs:scribe_v1"] {
            let (backend, model) = resolve_backend_and_model(Some(alias), "openai", "whisper-1");
            assert_eq!(backend, "elevenlabs", "alias: {alias}");
            assert_eq!(model, "scribe_v1");
        }
    }

    #[test]
    fn test_bare_model_keeps_default_backend() {
        let (backend, model) = resolve_backend_and_model(Some("whisper-1"), "elevenlabs", "x");
        assert_eq!(backend, "elevenlabs");
        assert_eq!(model, "whisper-1");
    }

    #[test]
    fn test_unknown_prefix_is_treated_as_model_name() {
        // "gpt-4o:something" is not a known backend; the whole string is the
        // model.
        let (backend, model) =
            resolve_backend_and_model(Some("gpt-4o:custom"), "openai", "whisper-1");
        assert_eq!(backend, "openai");
        assert_eq!(model, "gpt-4o:custom");
    }

    #[test]
    fn test_build_transcriber_rejects_unknown_backend() {
        let err = build_transcriber("parakeet", "x").unwrap_err();
        assert!(err.to_string().contains("parakeet"));
    }

    #[test]
    fn test_transcription_result_payload() {
        let result = TranscriptionResult::new("hi", "openai", "whisper-1", "stop");
        let payload = result.to_payload();
        assert_eq!(payload["text"], "hi");
        assert_eq!(payload["backend"], "openai");
        assert_eq!(payload["source"], "stop");
        assert!(payload["warnings"].as_array().unwrap().is_empty());
    }
}
