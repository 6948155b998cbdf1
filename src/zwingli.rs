//! Zwingli: LLM post-processing for spoken commands.
//!
//! A chat-completion call against an OpenAI-compatible endpoint. The
//! backend selector (`VOICEPIPE_ZWINGLI_BACKEND`) picks which API key and
//! default base URL to use; profiles and env vars can override the model,
//! temperature, and prompts per call.

use crate::config;
use crate::error::TriggerError;
use serde_json::{json, Value};
use std::time::Instant;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Per-call overrides; `None` falls through to env/config defaults.
#[derive(Debug, Clone, Default)]
pub struct ZwingliOverrides {
    pub backend: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub temperature: Option<f32>,
}

fn default_base_url(backend: &str) -> &'static str {
    match backend {
        "groq" => GROQ_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}

fn resolve_api_key(
    backend: &str,
    override_key: Option<String>,
) -> std::result::Result<String, TriggerError> {
    if let Some(key) = override_key {
        return Ok(key);
    }
    if let Some(key) = config::zwingli_api_key_override() {
        return Ok(key);
    }
    match backend {
        "groq" => config::groq_api_key().map_err(|e| TriggerError::Zwingli(e.to_string())),
        "openai" => config::openai_api_key().map_err(|e| TriggerError::Zwingli(e.to_string())),
        other => Err(TriggerError::Zwingli(format!(
            "Unsupported zwingli backend '{other}'. Set VOICEPIPE_ZWINGLI_BACKEND to one of: groq, openai"
        ))),
    }
}

/// Process a spoken prompt with an LLM and return `(text, metadata)`.
///
/// Blocking: run under `spawn_blocking` from async contexts.
pub fn process_zwingli_prompt(
    prompt: &str,
    overrides: &ZwingliOverrides,
) -> std::result::Result<(String, Value), TriggerError> {
    let backend = overrides
        .backend
        .clone()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(config::zwingli_backend);
    let model = overrides
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(config::zwingli_model);

    let cleaned = prompt.trim();
    if cleaned.is_empty() {
        return Ok((String::new(), json!({"backend": backend, "model": model})));
    }

    let temperature = overrides.temperature.unwrap_or_else(config::zwingli_temperature);
    let system_prompt = overrides
        .system_prompt
        .clone()
        .unwrap_or_else(config::zwingli_system_prompt);
    let user_prompt = overrides
        .user_prompt
        .clone()
        .or_else(config::zwingli_user_prompt)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let base_url = overrides
        .base_url
        .clone()
        .or_else(config::zwingli_base_url);

    let api_key = resolve_api_key(&backend, overrides.api_key.clone())?;

    let mut messages = vec![json!({"role": "system", "content": system_prompt})];
    if let Some(preamble) = &user_prompt {
        messages.push(json!({"role": "user", "content": preamble}));
    }
    messages.push(json!({"role": "user", "content": cleaned}));

    let effective_base = base_url
        .clone()
        .unwrap_or_else(|| default_base_url(&backend).to_string());
    let url = format!("{}/chat/completions", effective_base.trim_end_matches('/'));

    let started = Instant::now();
    let response = ureq::post(&url)
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .set("Authorization", &format!("Bearer {api_key}"))
        .send_json(json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        }));

    let body: Value = match response {
        Ok(resp) => resp
            .into_json()
            .map_err(|e| TriggerError::Zwingli(format!("invalid JSON from {backend}: {e}")))?,
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            let prefix: String = body.chars().take(300).collect();
            return Err(TriggerError::Zwingli(format!(
                "{backend} chat completion failed (HTTP {code}): {prefix}"
            )));
        }
        Err(ureq::Error::Transport(t)) => {
            return Err(TriggerError::Zwingli(format!("request failed: {t}")));
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let choice0 = body.get("choices").and_then(|c| c.get(0));
    let content = choice0
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if content.is_empty() {
        return Err(TriggerError::Zwingli(
            "Zwingli model returned empty output".to_string(),
        ));
    }

    let mut meta = json!({
        "backend": backend,
        "model": model,
        "temperature": temperature,
        "duration_ms": duration_ms,
    });

    let mut provider = serde_json::Map::new();
    if let Some(base) = base_url {
        provider.insert("base_url".to_string(), json!(base));
    }
    if let Some(id) = body.get("id").and_then(|i| i.as_str()) {
        provider.insert("request_id".to_string(), json!(id));
    }
    if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
        provider.insert("usage".to_string(), usage.clone());
    }
    if !provider.is_empty() {
        meta["provider"] = Value::Object(provider);
    }
    if let Some(finish) = choice0.and_then(|c| c.get("finish_reason")).filter(|f| !f.is_null()) {
        meta["finish_reason"] = finish.clone();
    }

    Ok((content, meta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prompt_short_circuits() {
        let overrides = ZwingliOverrides {
            backend: Some("openai".into()),
            model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        let (text, meta) = process_zwingli_prompt("   ", &overrides).unwrap();
        assert_eq!(text, "");
        assert_eq!(meta["backend"], "openai");
        assert_eq!(meta["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_unsupported_backend_errors() {
        let overrides = ZwingliOverrides {
            backend: Some("llamafile".into()),
            ..Default::default()
        };
        let err = process_zwingli_prompt("do it", &overrides).unwrap_err();
        assert!(err.to_string().contains("Unsupported zwingli backend"));
    }

    #[test]
    fn test_default_base_urls() {
        assert!(default_base_url("groq").contains("groq"));
        assert!(default_base_url("openai").contains("openai"));
        assert!(default_base_url("anything-else").contains("openai"));
    }
}
