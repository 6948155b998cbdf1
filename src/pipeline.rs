//! Transcript post-processing: intent routing plus trigger/Zwingli
//! handling, with a structured result for `--json` output and logging.
//!
//! This stage never types or prints; it only transforms text and reports
//! what happened.

use crate::config::CommandsConfig;
use crate::intent::{route_intent, IntentMode, IntentResult};
use crate::transcribe::TranscriptionResult;
use crate::triggers::{apply_transcript_triggers, ZwingliHandler};
use serde_json::{json, Value};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PostprocessResult {
    pub ok: bool,
    pub stage: String,
    pub error: Option<String>,
    pub transcription: TranscriptionResult,
    pub intent: IntentResult,
    pub output_text: Option<String>,
    pub zwingli: Option<Value>,
    pub trigger: Option<Value>,
    pub timing: Value,
}

impl PostprocessResult {
    pub fn to_payload(&self) -> Value {
        let mut payload = self.transcription.to_payload();
        payload["ok"] = json!(self.ok);
        payload["stage"] = json!(self.stage);
        payload["error"] = json!(self.error);
        payload["intent"] = serde_json::to_value(&self.intent).unwrap_or(Value::Null);
        payload["output_text"] = json!(self.output_text);
        if let Some(zwingli) = &self.zwingli {
            payload["zwingli"] = zwingli.clone();
        }
        if let Some(trigger) = &self.trigger {
            payload["trigger"] = trigger.clone();
        }
        payload["timing"] = self.timing.clone();
        payload
    }
}

fn strict_commands_enabled() -> bool {
    std::env::var("VOICEPIPE_COMMANDS_STRICT")
        .map(|v| v.trim() == "1")
        .unwrap_or(false)
}

/// Apply triggers and intent routing to a transcription.
///
/// A configured trigger match takes the whole transcript through the
/// trigger engine. Otherwise the intent router decides: command mode goes
/// to Zwingli with default prompts, dictation passes through.
pub async fn postprocess_transcription(
    transcription: &TranscriptionResult,
    commands: &CommandsConfig,
    wake_prefixes: &[String],
    routing_enabled: bool,
    zwingli: &dyn ZwingliHandler,
) -> PostprocessResult {
    let started = Instant::now();

    // Trigger engine first: triggers are an explicit user configuration and
    // win over the default wake-prefix routing.
    if !commands.triggers.is_empty() {
        let (output, meta) =
            apply_transcript_triggers(&transcription.text, commands, zwingli).await;
        if let Some(meta) = meta {
            let ok = meta["ok"].as_bool().unwrap_or(false);
            let trigger_ms = started.elapsed().as_millis() as u64;
            return PostprocessResult {
                ok,
                stage: if ok { "complete".into() } else { "trigger".into() },
                error: meta["error"].as_str().map(str::to_string),
                transcription: transcription.clone(),
                intent: IntentResult::dictation(transcription.text.trim(), "trigger"),
                output_text: Some(output),
                zwingli: None,
                trigger: Some(meta),
                timing: json!({"trigger_ms": trigger_ms}),
            };
        }
    }

    let intent = if routing_enabled {
        route_intent(transcription, wake_prefixes)
    } else {
        IntentResult::dictation(transcription.text.trim(), "disabled")
    };
    let intent_ms = started.elapsed().as_millis() as u64;

    if intent.mode == IntentMode::Command {
        if strict_commands_enabled() {
            let msg =
                "Zwingli-mode detected but VOICEPIPE_COMMANDS_STRICT=1; refusing to output.";
            return PostprocessResult {
                ok: false,
                stage: "strict".into(),
                error: Some(msg.to_string()),
                transcription: transcription.clone(),
                intent,
                output_text: None,
                zwingli: Some(json!({"error": msg})),
                trigger: None,
                timing: json!({"intent_ms": intent_ms}),
            };
        }

        let command_text = intent.command_text.clone().unwrap_or_default();
        return match zwingli.process(&command_text, None).await {
            Ok((output, meta)) => {
                let mut timing = json!({"intent_ms": intent_ms});
                if let Some(ms) = meta.get("duration_ms").and_then(|d| d.as_u64()) {
                    timing["zwingli_ms"] = json!(ms);
                }
                PostprocessResult {
                    ok: true,
                    stage: "complete".into(),
                    error: None,
                    transcription: transcription.clone(),
                    intent,
                    output_text: Some(output),
                    zwingli: Some(meta),
                    trigger: None,
                    timing,
                }
            }
            Err(e) => PostprocessResult {
                ok: false,
                stage: "zwingli".into(),
                error: Some(e.to_string()),
                transcription: transcription.clone(),
                intent,
                output_text: None,
                zwingli: Some(json!({"error": e.to_string()})),
                trigger: None,
                timing: json!({"intent_ms": intent_ms}),
            },
        };
    }

    let output_text = match intent.mode {
        IntentMode::Dictation => intent
            .dictation_text
            .clone()
            .unwrap_or_else(|| transcription.text.clone()),
        _ => transcription.text.clone(),
    };

    PostprocessResult {
        ok: true,
        stage: "complete".into(),
        error: None,
        transcription: transcription.clone(),
        intent,
        output_text: Some(output_text),
        zwingli: None,
        trigger: None,
        timing: json!({"intent_ms": intent_ms}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandsConfig;
    use crate::error::TriggerError;
    use crate::triggers::LiveZwingli;
    use async_trait::async_trait;

    struct FakeZwingli(String);

    #[async_trait]
    impl ZwingliHandler for FakeZwingli {
        async fn process(
            &self,
            _prompt: &str,
            _profile: Option<&crate::config::LlmProfile>,
        ) -> std::result::Result<(String, Value), TriggerError> {
            Ok((self.0.clone(), json!({"duration_ms": 7})))
        }
    }

    fn transcription(text: &str) -> TranscriptionResult {
        TranscriptionResult::new(text, "openai", "gpt-4o-transcribe", "test")
    }

    fn prefixes() -> Vec<String> {
        vec!["zwingli".to_string(), "zwingly".to_string()]
    }

    #[tokio::test]
    async fn test_dictation_passes_through() {
        let result = postprocess_transcription(
            &transcription("  just some words  "),
            &CommandsConfig::default(),
            &prefixes(),
            true,
            &LiveZwingli,
        )
        .await;
        assert!(result.ok);
        assert_eq!(result.stage, "complete");
        assert_eq!(result.output_text.as_deref(), Some("just some words"));
        assert!(result.zwingli.is_none());
    }

    #[tokio::test]
    async fn test_command_mode_goes_through_zwingli() {
        let result = postprocess_transcription(
            &transcription("zwingli write a haiku"),
            &CommandsConfig::default(),
            &prefixes(),
            true,
            &FakeZwingli("a haiku".into()),
        )
        .await;
        assert!(result.ok);
        assert_eq!(result.intent.mode, IntentMode::Command);
        assert_eq!(result.output_text.as_deref(), Some("a haiku"));
        assert_eq!(result.timing["zwingli_ms"], 7);
    }

    #[tokio::test]
    async fn test_trigger_match_wins_over_routing() {
        let commands = CommandsConfig::from_triggers([("zwingli", "strip")]);
        let result = postprocess_transcription(
            &transcription("zwingli keep these words"),
            &commands,
            &prefixes(),
            true,
            &LiveZwingli,
        )
        .await;
        assert!(result.ok);
        assert_eq!(result.output_text.as_deref(), Some("keep these words"));
        let trigger = result.trigger.unwrap();
        assert_eq!(trigger["action"], "strip");
    }

    #[tokio::test]
    async fn test_routing_disabled_passes_text() {
        let result = postprocess_transcription(
            &transcription("zwingli would be a command"),
            &CommandsConfig::default(),
            &prefixes(),
            false,
            &LiveZwingli,
        )
        .await;
        assert!(result.ok);
        assert_eq!(
            result.output_text.as_deref(),
            Some("zwingli would be a command")
        );
        assert_eq!(result.intent.reason, "disabled");
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let result = postprocess_transcription(
            &transcription("hello"),
            &CommandsConfig::default(),
            &prefixes(),
            true,
            &LiveZwingli,
        )
        .await;
        let payload = result.to_payload();
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["text"], "hello");
        assert_eq!(payload["intent"]["mode"], "dictation");
        assert_eq!(payload["output_text"], "hello");
    }
}
