//! OpenAI speech-to-text client.
//!
//! Uploads audio to `audio/transcriptions` with `response_format=text` and
//! returns the plain-text body. When the caller supplies no prompt, a
//! model-family default is sent: dictation-style punctuation instructions
//! for the gpt-4o family, a quoting example for whisper-1.

use super::{TranscribeOptions, Transcriber};
use crate::error::TranscribeError;
use std::path::Path;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const WHISPER_PROMPT: &str = "She said, \"Hello, how are you?\" Then she asked, \"What's your name?\" I replied, \"My name is John.\"";

const GPT4_PROMPT: &str = "Please transcribe in dictation mode. When the speaker says punctuation commands, convert them to actual punctuation:
- \"open quote\" or \"quotation mark\" \u{2192} \"
- \"close quote\" or \"end quote\" \u{2192} \"
- \"comma\" \u{2192} ,
- \"period\" \u{2192} .
- \"question mark\" \u{2192} ?
- \"exclamation mark\" \u{2192} !

Example: If speaker says \"open quote hello close quote\", transcribe as: \"hello\"";

#[derive(Debug)]
pub struct OpenAiTranscriber {
    api_key: String,
    model: String,
    base_url: String,
}

fn guess_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

fn default_prompt_for(model: &str) -> Option<&'static str> {
    if model.starts_with("gpt-4") {
        Some(GPT4_PROMPT)
    } else if model == "whisper-1" {
        Some(WHISPER_PROMPT)
    } else {
        None
    }
}

struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

fn build_multipart_body(
    audio: &[u8],
    filename: &str,
    content_type: &str,
    fields: &[(&str, String)],
) -> MultipartBody {
    let boundary = format!("voicepipe-{}", uuid::Uuid::new_v4().simple());
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(audio);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    MultipartBody { boundary, body }
}

impl OpenAiTranscriber {
    pub fn new(model: &str) -> std::result::Result<Self, TranscribeError> {
        Ok(OpenAiTranscriber {
            api_key: crate::config::openai_api_key()?,
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    fn with_parts(api_key: &str, model: &str, base_url: &str) -> Self {
        OpenAiTranscriber {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.to_string(),
        }
    }
}

impl Transcriber for OpenAiTranscriber {
    fn transcribe(
        &self,
        audio_file: &Path,
        options: &TranscribeOptions,
        model: Option<&str>,
    ) -> std::result::Result<String, TranscribeError> {
        let audio = std::fs::read(audio_file)
            .map_err(|_| TranscribeError::AudioNotFound(audio_file.display().to_string()))?;

        let model = model.unwrap_or(&self.model);
        let filename = audio_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut fields: Vec<(&str, String)> = vec![
            ("model", model.to_string()),
            ("response_format", "text".to_string()),
            ("temperature", options.temperature.to_string()),
        ];
        if let Some(language) = &options.language {
            fields.push(("language", language.clone()));
        }
        let prompt = options
            .prompt
            .clone()
            .or_else(|| default_prompt_for(model).map(str::to_string));
        if let Some(prompt) = prompt {
            fields.push(("prompt", prompt));
        }

        let multipart =
            build_multipart_body(&audio, &filename, guess_content_type(audio_file), &fields);

        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let response = ureq::post(&url)
            .timeout(REQUEST_TIMEOUT)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", multipart.boundary),
            )
            .send_bytes(&multipart.body);

        match response {
            Ok(resp) => {
                let text = resp
                    .into_string()
                    .map_err(|e| TranscribeError::Failed(format!("cannot read response: {e}")))?;
                Ok(text.trim().to_string())
            }
            Err(ureq::Error::Status(status, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(TranscribeError::Remote {
                    status,
                    body: body.chars().take(300).collect(),
                })
            }
            Err(ureq::Error::Transport(t)) => Err(TranscribeError::Network(t.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompt_selection() {
        assert_eq!(default_prompt_for("gpt-4o-transcribe"), Some(GPT4_PROMPT));
        assert_eq!(default_prompt_for("whisper-1"), Some(WHISPER_PROMPT));
        assert_eq!(default_prompt_for("some-other-model"), None);
    }

    #[test]
    fn test_multipart_body_structure() {
        let fields = vec![
            ("model", "whisper-1".to_string()),
            ("response_format", "text".to_string()),
        ];
        let multipart = build_multipart_body(b"RIFFdata", "audio.wav", "audio/wav", &fields);
        let body = String::from_utf8_lossy(&multipart.body);

        assert!(body.contains(&multipart.boundary));
        assert!(body.contains("name=\"model\""));
        assert!(body.contains("whisper-1"));
        assert!(body.contains("name=\"file\""));
        assert!(body.contains("filename=\"audio.wav\""));
        assert!(body.contains("Content-Type: audio/wav"));
        assert!(body.ends_with(&format!("--{}--\r\n", multipart.boundary)));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a.wav")), "audio/wav");
        assert_eq!(guess_content_type(Path::new("a.MP3")), "audio/mpeg");
        assert_eq!(guess_content_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn test_missing_audio_file_errors() {
        let client = OpenAiTranscriber::with_parts("sk-test", "whisper-1", "http://localhost:1");
        let err = client
            .transcribe(
                Path::new("/definitely/not/here.wav"),
                &TranscribeOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TranscribeError::AudioNotFound(_)));
    }
}
