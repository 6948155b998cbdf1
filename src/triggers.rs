//! Transcript trigger engine.
//!
//! Matches a configured trigger word at the start of a transcript and runs
//! the associated action: strip the trigger, hand the remainder to the
//! Zwingli LLM, dispatch on a spoken verb, run a shell command, or call a
//! user plugin. Triggers operate purely on transcription output; they are
//! not audio wake words.
//!
//! The engine never loses user text: any handler failure returns the
//! pre-action remainder together with `{ok: false, error}` metadata.

use crate::config::{CommandsConfig, LlmProfile, VerbConfig};
use crate::error::TriggerError;
use crate::zwingli::{process_zwingli_prompt, ZwingliOverrides};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const DEFAULT_SHELL_TIMEOUT_SECS: f64 = 10.0;
const DISPATCH_SEPARATORS: &[char] = &[',', ':', ';', '.'];

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMatch {
    pub trigger: String,
    pub action: String,
    pub remainder: String,
    pub reason: String,
}

/// Hook for the LLM-backed actions so tests can run without a network.
#[async_trait]
pub trait ZwingliHandler: Send + Sync {
    async fn process(
        &self,
        prompt: &str,
        profile: Option<&LlmProfile>,
    ) -> std::result::Result<(String, Value), TriggerError>;
}

/// Production handler: blocking HTTP moved off the async runtime.
pub struct LiveZwingli;

#[async_trait]
impl ZwingliHandler for LiveZwingli {
    async fn process(
        &self,
        prompt: &str,
        profile: Option<&LlmProfile>,
    ) -> std::result::Result<(String, Value), TriggerError> {
        let prompt = prompt.to_string();
        let overrides = match profile {
            Some(profile) => ZwingliOverrides {
                model: Some(profile.model.clone()),
                temperature: Some(profile.temperature),
                system_prompt: Some(profile.system_prompt.clone()),
                ..Default::default()
            },
            None => ZwingliOverrides::default(),
        };
        tokio::task::spawn_blocking(move || process_zwingli_prompt(&prompt, &overrides))
            .await
            .map_err(|e| TriggerError::Zwingli(format!("zwingli task failed: {e}")))?
    }
}

/// Match a configured trigger prefix against transcript text.
///
/// Iteration follows the configured map's insertion order; the first match
/// wins. A trigger matches the whole text, or the text followed by a space
/// or one of `, : ; .`.
pub fn match_transcript_trigger(
    text: &str,
    triggers: &[(String, String)],
) -> Option<TriggerMatch> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return None;
    }
    let lowered = cleaned.to_lowercase();

    for (raw_trigger, raw_action) in triggers {
        let trigger = raw_trigger.trim().to_lowercase();
        if trigger.is_empty() {
            continue;
        }
        let action = {
            let a = raw_action.trim().to_lowercase();
            if a.is_empty() {
                "strip".to_string()
            } else {
                a
            }
        };

        if lowered == trigger {
            return Some(TriggerMatch {
                trigger,
                action,
                remainder: String::new(),
                reason: "exact".to_string(),
            });
        }

        if lowered.starts_with(&format!("{trigger} ")) {
            return Some(TriggerMatch {
                remainder: cleaned[trigger.len()..].trim_start().to_string(),
                trigger,
                action,
                reason: "prefix:space".to_string(),
            });
        }

        for sep in DISPATCH_SEPARATORS {
            if lowered.starts_with(&format!("{trigger}{sep}")) {
                return Some(TriggerMatch {
                    remainder: cleaned[trigger.len() + 1..].trim_start().to_string(),
                    trigger,
                    action,
                    reason: format!("prefix:{sep}"),
                });
            }
        }
    }

    None
}

fn action_strip(prompt: &str) -> (String, Value) {
    (prompt.trim().to_string(), json!({}))
}

/// Substitute `{{text}}` in an LLM profile's user prompt template. A
/// template without the placeholder is prepended with a blank line before
/// the text.
pub fn render_user_prompt_template(template: &str, text: &str) -> String {
    let cleaned_template = template.trim();
    let cleaned_text = text.trim();
    if cleaned_template.is_empty() {
        return cleaned_text.to_string();
    }
    if cleaned_template.contains("{{text}}") {
        return cleaned_template.replace("{{text}}", cleaned_text);
    }
    if cleaned_text.is_empty() {
        return cleaned_template.to_string();
    }
    format!("{}\n\n{}", cleaned_template.trim_end(), cleaned_text)
}

fn resolve_shell_timeout(timeout_seconds: Option<f64>) -> f64 {
    let from_env = || {
        std::env::var("VOICEPIPE_SHELL_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
    };
    let resolved = timeout_seconds.or_else(from_env).unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS);
    if resolved > 0.0 {
        resolved
    } else {
        DEFAULT_SHELL_TIMEOUT_SECS
    }
}

fn shell_allowed() -> bool {
    std::env::var("VOICEPIPE_SHELL_ALLOW")
        .map(|v| v.trim() == "1")
        .unwrap_or(false)
}

fn plugins_allowed() -> bool {
    std::env::var("VOICEPIPE_PLUGIN_ALLOW")
        .map(|v| v.trim() == "1")
        .unwrap_or(false)
}

async fn read_pipe_to_string<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    use tokio::io::AsyncReadExt;
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Run the remainder as a verbatim shell command. Opt-in via
/// `VOICEPIPE_SHELL_ALLOW=1`; stdout wins, stderr is the fallback when
/// stdout is blank; a timeout yields whatever was captured so far.
async fn action_shell(
    prompt: &str,
    timeout_seconds: Option<f64>,
) -> std::result::Result<(String, Value), TriggerError> {
    let cleaned = prompt.trim();
    if cleaned.is_empty() {
        return Ok((String::new(), json!({"returncode": 0, "duration_ms": 0})));
    }
    if !shell_allowed() {
        return Err(TriggerError::ShellDisabled);
    }

    let timeout_s = resolve_shell_timeout(timeout_seconds);

    let mut command = if cfg!(windows) {
        let mut c = tokio::process::Command::new("cmd");
        c.arg("/C").arg(cleaned);
        c
    } else {
        let mut c = tokio::process::Command::new("sh");
        c.arg("-c").arg(cleaned);
        c
    };
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| TriggerError::Handler(format!("failed to spawn shell: {e}")))?;

    let stdout_task = tokio::spawn(read_pipe_to_string(child.stdout.take()));
    let stderr_task = tokio::spawn(read_pipe_to_string(child.stderr.take()));

    let waited = tokio::time::timeout(Duration::from_secs_f64(timeout_s), child.wait()).await;

    match waited {
        Ok(status) => {
            let status =
                status.map_err(|e| TriggerError::Handler(format!("shell wait failed: {e}")))?;
            let duration_ms = started.elapsed().as_millis() as u64;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            let output = if stdout.trim().is_empty() { stderr } else { stdout };
            let output = output.trim_end_matches('\n').to_string();

            let returncode = status.code();
            let mut meta = json!({
                "returncode": returncode,
                "duration_ms": duration_ms,
                "timeout_seconds": timeout_s,
            });
            if returncode != Some(0) {
                meta["error"] = json!("nonzero-exit");
            }
            Ok((output, meta))
        }
        Err(_) => {
            let _ = child.kill().await;
            let duration_ms = started.elapsed().as_millis() as u64;
            // Killing the child closes the pipes, so the readers finish.
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            let output = if stdout.trim().is_empty() { stderr } else { stdout };
            let output = output.trim_end_matches('\n').to_string();
            let meta = json!({
                "returncode": null,
                "duration_ms": duration_ms,
                "timeout_seconds": timeout_s,
                "error": "timeout",
            });
            Ok((output, meta))
        }
    }
}

/// Resolve a plugin path to an executable inside the config dir. Relative
/// paths resolve against the config dir; the canonicalized result must stay
/// inside it.
fn resolve_plugin_path(path: &str) -> std::result::Result<std::path::PathBuf, TriggerError> {
    let base = crate::config::config_dir(false)
        .canonicalize()
        .map_err(|e| TriggerError::Plugin(format!("config dir unavailable: {e}")))?;
    let raw = std::path::Path::new(path);
    let candidate = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    let resolved = candidate
        .canonicalize()
        .map_err(|e| TriggerError::Plugin(format!("plugin not found: {}: {e}", candidate.display())))?;
    if !resolved.starts_with(&base) {
        return Err(TriggerError::PluginOutsideConfig(base.display().to_string()));
    }
    Ok(resolved)
}

/// Compile-time registered plugin handlers, addressed by `plugin.module`.
fn builtin_plugin(
    module: &str,
    args: &str,
) -> std::result::Result<(String, Value), TriggerError> {
    match module {
        "echo" => Ok((args.to_string(), json!({}))),
        other => Err(TriggerError::Plugin(format!(
            "unknown plugin module '{other}'"
        ))),
    }
}

fn normalize_plugin_stdout(stdout: &str) -> (String, Value) {
    // A plugin may answer with a `{text, meta}` JSON object or plain text.
    if let Ok(parsed) = serde_json::from_str::<Value>(stdout.trim()) {
        if let Some(obj) = parsed.as_object() {
            if let Some(text) = obj.get("text").and_then(|t| t.as_str()) {
                let meta = obj.get("meta").cloned().unwrap_or(json!({}));
                return (text.to_string(), meta);
            }
        }
    }
    (stdout.trim_end_matches('\n').to_string(), json!({}))
}

/// Run a plugin verb. Opt-in via `VOICEPIPE_PLUGIN_ALLOW=1`. Path plugins
/// are executables inside the config dir invoked with the args text on
/// stdin; module plugins are compile-time registered handlers.
async fn action_plugin(
    args: &str,
    verb_cfg: &VerbConfig,
) -> std::result::Result<(String, Value), TriggerError> {
    let plugin = verb_cfg
        .plugin
        .as_ref()
        .ok_or_else(|| TriggerError::Plugin("plugin verb is missing plugin={...}".to_string()))?;

    if !plugins_allowed() {
        return Err(TriggerError::PluginDisabled);
    }

    let cleaned = args.trim().to_string();
    let started = Instant::now();

    let (out_text, plugin_meta) = if let Some(module) = plugin.module.as_deref() {
        builtin_plugin(module, &cleaned)?
    } else if let Some(path) = plugin.path.as_deref() {
        let resolved = resolve_plugin_path(path)?;
        let timeout_s = resolve_shell_timeout(verb_cfg.timeout_seconds);

        let mut child = tokio::process::Command::new(&resolved)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| TriggerError::Plugin(format!("failed to run {}: {e}", resolved.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(cleaned.as_bytes()).await;
            drop(stdin);
        }

        let output = tokio::time::timeout(
            Duration::from_secs_f64(timeout_s),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| TriggerError::Plugin(format!("plugin timed out after {timeout_s}s")))?
        .map_err(|e| TriggerError::Plugin(format!("plugin failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TriggerError::Plugin(format!(
                "plugin exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        normalize_plugin_stdout(&String::from_utf8_lossy(&output.stdout))
    } else {
        return Err(TriggerError::Plugin(
            "plugin verb must set either plugin.module or plugin.path".to_string(),
        ));
    };

    let mut meta = json!({"duration_ms": started.elapsed().as_millis() as u64});
    if plugin_meta != json!({}) {
        meta["plugin_meta"] = plugin_meta;
    }
    Ok((out_text, meta))
}

/// Split a dispatch remainder into `(verb, args)`. The verb is the first
/// token up to whitespace or a separator, lowercased; one separator plus
/// surrounding whitespace is consumed.
pub fn split_dispatch_verb(prompt: &str) -> (String, String) {
    let cleaned = prompt.trim();
    if cleaned.is_empty() {
        return (String::new(), String::new());
    }

    let mut verb_end = cleaned.len();
    for (idx, ch) in cleaned.char_indices() {
        if ch.is_whitespace() || DISPATCH_SEPARATORS.contains(&ch) {
            verb_end = idx;
            break;
        }
    }

    let verb = cleaned[..verb_end].trim().to_lowercase();
    let mut rest = &cleaned[verb_end..];
    if let Some(first) = rest.chars().next() {
        if DISPATCH_SEPARATORS.contains(&first) {
            rest = &rest[first.len_utf8()..];
        }
    }
    (verb, rest.trim_start().to_string())
}

enum VerbKind<'a> {
    Builtin(&'a str),
    Llm,
    Shell,
    Plugin,
}

fn classify_verb(cfg: &VerbConfig) -> VerbKind<'_> {
    let action = cfg.action.as_deref().unwrap_or("").trim();
    match cfg.verb_type.trim().to_lowercase().as_str() {
        "llm" => VerbKind::Llm,
        "execute" | "shell" => VerbKind::Shell,
        "plugin" => VerbKind::Plugin,
        _ => match action.to_lowercase().as_str() {
            "shell" => VerbKind::Shell,
            "plugin" => VerbKind::Plugin,
            _ => VerbKind::Builtin(if action.is_empty() { "strip" } else { action }),
        },
    }
}

async fn run_builtin_action(
    action: &str,
    args: &str,
    zwingli: &dyn ZwingliHandler,
) -> std::result::Result<(String, Value), TriggerError> {
    match action.to_lowercase().as_str() {
        "strip" => Ok(action_strip(args)),
        "zwingli" => zwingli.process(args, None).await,
        other => Err(TriggerError::UnknownAction(other.to_string())),
    }
}

async fn dispatch_prompt(
    prompt: &str,
    commands: &CommandsConfig,
    zwingli: &dyn ZwingliHandler,
) -> std::result::Result<(String, Value), TriggerError> {
    let cleaned = prompt.trim();
    let (verb, args) = split_dispatch_verb(cleaned);
    let verb_cfg = if verb.is_empty() { None } else { commands.verb(&verb) };

    if let Some(cfg) = verb_cfg.filter(|c| c.enabled) {
        let mut template_applied = false;
        let mut profile_found = false;
        let action_label: String;

        let (out_text, handler_meta) = match classify_verb(cfg) {
            VerbKind::Llm => {
                action_label = "zwingli".to_string();
                let profile_name = cfg.profile.as_deref().unwrap_or("").trim().to_lowercase();
                let profile = if profile_name.is_empty() {
                    None
                } else {
                    commands.profile(&profile_name)
                };
                profile_found = profile.is_some();
                match profile {
                    Some(profile) => {
                        let rendered = match &profile.user_prompt_template {
                            Some(template) => {
                                template_applied = true;
                                render_user_prompt_template(template, &args)
                            }
                            None => args.clone(),
                        };
                        zwingli.process(&rendered, Some(profile)).await?
                    }
                    None => zwingli.process(&args, None).await?,
                }
            }
            VerbKind::Shell => {
                action_label = "shell".to_string();
                action_shell(&args, cfg.timeout_seconds).await?
            }
            VerbKind::Plugin => {
                action_label = "plugin".to_string();
                action_plugin(&args, cfg).await?
            }
            VerbKind::Builtin(action) => {
                action_label = action.to_lowercase();
                run_builtin_action(action, &args, zwingli).await?
            }
        };

        let mut meta = json!({
            "mode": "verb",
            "verb": verb,
            "verb_type": cfg.verb_type,
            "action": action_label,
        });
        if let Some(profile) = &cfg.profile {
            meta["profile"] = json!(profile);
            if action_label == "zwingli" {
                meta["profile_found"] = json!(profile_found);
            }
            if template_applied {
                meta["template_applied"] = json!(true);
            }
        }
        if let Some(timeout) = cfg.timeout_seconds {
            meta["timeout_seconds"] = json!(timeout);
        }
        if let Some(plugin) = &cfg.plugin {
            meta["plugin"] = json!({
                "module": plugin.module,
                "path": plugin.path,
                "callable": plugin.callable,
            });
        }
        if handler_meta != json!({}) {
            meta["handler_meta"] = handler_meta;
        }
        return Ok((out_text, meta));
    }

    // Unknown or disabled verb: fall through to dispatch.unknown_verb on
    // the full remainder.
    let unknown_action = commands
        .dispatch
        .unknown_verb
        .as_deref()
        .unwrap_or("strip")
        .trim()
        .to_lowercase();
    let (out_text, handler_meta) =
        run_builtin_action(&unknown_action, cleaned, zwingli).await?;

    let mut meta = json!({
        "mode": "unknown-verb",
        "verb": verb,
        "action": unknown_action,
    });
    if verb_cfg.map(|c| !c.enabled).unwrap_or(false) {
        meta["disabled_verb"] = json!(verb);
    }
    if handler_meta != json!({}) {
        meta["handler_meta"] = handler_meta;
    }
    Ok((out_text, meta))
}

fn failure_payload(m: &TriggerMatch, error: &TriggerError) -> Value {
    json!({
        "ok": false,
        "trigger": m.trigger,
        "action": m.action,
        "reason": m.reason,
        "error": error.to_string(),
    })
}

fn success_payload(m: &TriggerMatch, meta: Value) -> Value {
    let mut payload = json!({
        "ok": true,
        "trigger": m.trigger,
        "action": m.action,
        "reason": m.reason,
    });
    if meta != json!({}) {
        payload["meta"] = meta;
    }
    payload
}

/// Apply a configured transcript trigger, returning `(output_text, meta)`.
///
/// No matching trigger returns the original text and `None`. The function
/// is deterministic for fixed inputs and environment.
pub async fn apply_transcript_triggers(
    text: &str,
    commands: &CommandsConfig,
    zwingli: &dyn ZwingliHandler,
) -> (String, Option<Value>) {
    let Some(m) = match_transcript_trigger(text, &commands.triggers) else {
        return (text.to_string(), None);
    };

    let handled = match m.action.as_str() {
        "dispatch" => dispatch_prompt(&m.remainder, commands, zwingli).await,
        "strip" => Ok(action_strip(&m.remainder)),
        "zwingli" => zwingli.process(&m.remainder, None).await,
        "shell" => action_shell(&m.remainder, None).await,
        other => Err(TriggerError::UnknownAction(other.to_string())),
    };

    match handled {
        Ok((output, meta)) => (output, Some(success_payload(&m, meta))),
        Err(e) => (m.remainder.clone(), Some(failure_payload(&m, &e))),
    }
}
