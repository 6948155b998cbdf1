//! ElevenLabs speech-to-text client.
//!
//! Multipart POST to the speech-to-text endpoint; auth via the
//! `xi-api-key` header. The API takes `model_id` and an optional
//! `language_code`; prompt and temperature are not supported and are
//! ignored.

use super::{TranscribeOptions, Transcriber};
use crate::error::TranscribeError;
use std::path::Path;
use std::time::Duration;

const SPEECH_TO_TEXT_URL: &str = "https://api.elevenlabs.io/v1/speech-to-text";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct ElevenLabsTranscriber {
    api_key: String,
    model_id: String,
    base_url: String,
}

impl ElevenLabsTranscriber {
    pub fn new(model_id: &str) -> std::result::Result<Self, TranscribeError> {
        let model_id = if model_id.trim().is_empty() {
            crate::config::DEFAULT_ELEVENLABS_MODEL
        } else {
            model_id
        };
        Ok(ElevenLabsTranscriber {
            api_key: crate::config::elevenlabs_api_key()?,
            model_id: model_id.to_string(),
            base_url: SPEECH_TO_TEXT_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_parts(api_key: &str, model_id: &str, base_url: &str) -> Self {
        ElevenLabsTranscriber {
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            base_url: base_url.to_string(),
        }
    }
}

fn build_multipart_body(
    audio: &[u8],
    filename: &str,
    model_id: &str,
    language: Option<&str>,
) -> (String, Vec<u8>) {
    let boundary = format!("voicepipe-{}", uuid::Uuid::new_v4().simple());
    let mut body = Vec::new();

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"model_id\"\r\n\r\n{model_id}\r\n")
            .as_bytes(),
    );

    if let Some(language) = language {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"language_code\"\r\n\r\n{language}\r\n")
                .as_bytes(),
        );
    }

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(audio);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    (boundary, body)
}

impl Transcriber for ElevenLabsTranscriber {
    fn transcribe(
        &self,
        audio_file: &Path,
        options: &TranscribeOptions,
        model: Option<&str>,
    ) -> std::result::Result<String, TranscribeError> {
        let audio = std::fs::read(audio_file)
            .map_err(|_| TranscribeError::AudioNotFound(audio_file.display().to_string()))?;

        let model_id = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.model_id);
        let filename = audio_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let (boundary, body) =
            build_multipart_body(&audio, &filename, model_id, options.language.as_deref());

        let response = ureq::post(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .set("Accept", "application/json")
            .set("xi-api-key", &self.api_key)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body);

        let raw = match response {
            Ok(resp) => resp
                .into_string()
                .map_err(|e| TranscribeError::Failed(format!("cannot read response: {e}")))?,
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(TranscribeError::Remote {
                    status,
                    body: body.chars().take(300).collect(),
                });
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(TranscribeError::Network(t.to_string()))
            }
        };

        let payload: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|_| TranscribeError::BadResponse(raw.chars().take(200).collect()))?;
        payload
            .get("text")
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| {
                TranscribeError::Failed(format!("response missing text: {payload}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_body_fields() {
        let (boundary, body) = build_multipart_body(b"RIFF", "clip.wav", "scribe_v1", Some("en"));
        let body = String::from_utf8_lossy(&body);
        assert!(body.contains(&boundary));
        assert!(body.contains("name=\"model_id\""));
        assert!(body.contains("scribe_v1"));
        assert!(body.contains("name=\"language_code\""));
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("filename=\"clip.wav\""));
    }

    #[test]
    fn test_language_field_is_optional() {
        let (_, body) = build_multipart_body(b"RIFF", "clip.wav", "scribe_v1", None);
        let body = String::from_utf8_lossy(&body);
        assert!(!body.contains("language_code"));
    }

    #[test]
    fn test_missing_audio_file_errors() {
        let client = ElevenLabsTranscriber::with_parts("key", "scribe_v1", "http://localhost:1");
        let err = client
            .transcribe(
                Path::new("/no/such/file.wav"),
                &TranscribeOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TranscribeError::AudioNotFound(_)));
    }
}
