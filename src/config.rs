//! Configuration and environment loading for voicepipe.
//!
//! Voicepipe runs both interactively and as a user service, and user
//! services generally do not load shell init files, so configuration must
//! come from a file a service manager can read. The canonical config file
//! is a dotenv-style env file:
//!
//!   `~/.config/voicepipe/voicepipe.env`
//!
//! Precedence: process environment > env file > legacy key files.
//!
//! Transcript command triggers live in a sibling JSON file,
//! `~/.config/voicepipe/triggers.json`, optionally overridden by the
//! `VOICEPIPE_TRANSCRIPT_TRIGGERS` env var.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Once;

use crate::paths::{ensure_private_dir, ensure_private_file, APP_NAME};

pub const DEFAULT_TRANSCRIBE_MODEL: &str = "gpt-4o-transcribe";
pub const DEFAULT_TRANSCRIBE_BACKEND: &str = "openai";
pub const DEFAULT_ELEVENLABS_MODEL: &str = "scribe_v1";
pub const DEFAULT_ZWINGLI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ZWINGLI_TEMPERATURE: f32 = 0.2;

pub const DEFAULT_ZWINGLI_SYSTEM_PROMPT: &str = "You are Zwingli, a dictation assistant. The user dictated an instruction; \
carry it out and reply with only the text that should be typed into their \
focused window. No preamble, no markdown fences, no commentary.";

pub const DEFAULT_WAKE_PREFIXES: &[&str] = &["zwingli", "zwingly"];

static ENV_LOADED: Once = Once::new();

pub fn config_home() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg);
        }
    }
    dirs::home_dir()
        .map(|h| h.join(".config"))
        .unwrap_or_else(|| std::env::temp_dir().join(".config"))
}

pub fn config_dir(create: bool) -> PathBuf {
    let path = config_home().join(APP_NAME);
    if create {
        let _ = std::fs::create_dir_all(&path);
    }
    path
}

pub fn env_file_path() -> PathBuf {
    config_dir(false).join(format!("{APP_NAME}.env"))
}

pub fn triggers_file_path() -> PathBuf {
    config_dir(false).join("triggers.json")
}

fn legacy_api_key_paths() -> Vec<PathBuf> {
    let mut paths = vec![config_dir(false).join("api_key")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".voicepipe_api_key"));
    }
    paths
}

/// Load voicepipe configuration into environment variables.
///
/// Existing process env always wins; then the canonical env file; then an
/// optional local `.env` for developer convenience. Idempotent: re-entry in
/// the same process is a no-op.
pub fn load_environment(load_cwd_dotenv: bool) {
    ENV_LOADED.call_once(|| {
        let env_path = env_file_path();
        if env_path.exists() {
            if let Err(e) = dotenvy::from_path(&env_path) {
                tracing::warn!("Failed to load env file {:?}: {}", env_path, e);
            }
        }
        if load_cwd_dotenv {
            let _ = dotenvy::dotenv();
        }
    });
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Best-effort parse of a dotenv-style file (no interpolation).
///
/// Intentionally simple: only the subset voicepipe writes is supported.
pub fn read_env_file(path: Option<&Path>) -> HashMap<String, String> {
    let env_path = path.map(Path::to_path_buf).unwrap_or_else(env_file_path);
    let mut out = HashMap::new();

    let raw = match std::fs::read_to_string(&env_path) {
        Ok(raw) => raw,
        Err(_) => return out,
    };
    // Tolerate a UTF-8 BOM from Windows editors.
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    for raw_line in raw.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim_start();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'\'' || bytes[0] == b'"') && bytes[0] == bytes[value.len() - 1] {
                value = &value[1..value.len() - 1];
            }
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp_path, content)?;
    match std::fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn is_env_line_for(raw_line: &str, name: &str) -> bool {
    let mut stripped = raw_line.trim_start();
    if stripped.is_empty() || stripped.starts_with('#') {
        return false;
    }
    if let Some(rest) = stripped.strip_prefix("export ") {
        stripped = rest.trim_start();
    }
    match stripped.split_once('=') {
        Some((key, _)) => key.trim() == name,
        None => false,
    }
}

/// Set or update an env var in the canonical env file; returns the path.
///
/// Replaces the matching line in place (all other content is preserved
/// byte-for-byte) or appends, writes via tmp + rename, and enforces 0600.
pub fn upsert_env_var(
    name: &str,
    value: &str,
    path: Option<&Path>,
) -> std::result::Result<PathBuf, ConfigError> {
    if value.contains('\n') || value.contains('\r') {
        return Err(ConfigError::MultilineValue {
            name: name.to_string(),
        });
    }

    let env_path = path.map(Path::to_path_buf).unwrap_or_else(env_file_path);
    if let Some(parent) = env_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Other(format!("cannot create {:?}: {}", parent, e)))?;
        ensure_private_dir(parent);
    }

    let existing = std::fs::read_to_string(&env_path).unwrap_or_default();
    let rendered = format!("{name}={value}\n");

    let mut found = false;
    let mut new_lines: Vec<String> = Vec::new();
    for raw_line in existing.split_inclusive('\n') {
        if is_env_line_for(raw_line, name) {
            new_lines.push(rendered.clone());
            found = true;
        } else {
            new_lines.push(raw_line.to_string());
        }
    }

    if !found {
        if let Some(last) = new_lines.last_mut() {
            if !last.ends_with('\n') {
                last.push('\n');
            }
        }
        // Separate from content with a blank line when appending to a
        // non-empty file.
        if new_lines.last().map(|l| !l.trim().is_empty()).unwrap_or(false) {
            new_lines.push("\n".to_string());
        }
        new_lines.push(rendered);
    }

    atomic_write(&env_path, &new_lines.concat())
        .map_err(|e| ConfigError::Other(format!("cannot write {:?}: {}", env_path, e)))?;
    ensure_private_file(&env_path);
    Ok(env_path)
}

/// Whether the env file is private (0600). None when the file is missing.
pub fn env_file_permissions_ok(path: Option<&Path>) -> Option<bool> {
    let env_path = path.map(Path::to_path_buf).unwrap_or_else(env_file_path);
    let meta = std::fs::metadata(&env_path).ok()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode() & 0o777 == 0o600)
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        Some(true)
    }
}

// --- Typed getters -------------------------------------------------------

pub fn transcribe_model() -> String {
    env_nonempty("VOICEPIPE_TRANSCRIBE_MODEL")
        .or_else(|| env_nonempty("VOICEPIPE_MODEL"))
        .unwrap_or_else(|| DEFAULT_TRANSCRIBE_MODEL.to_string())
}

pub fn transcribe_backend() -> String {
    env_nonempty("VOICEPIPE_TRANSCRIBE_BACKEND")
        .map(|v| v.to_lowercase())
        .unwrap_or_else(|| DEFAULT_TRANSCRIBE_BACKEND.to_string())
}

fn key_from_credentials_dir(names: &[&str]) -> Option<String> {
    let cred_dir = env_nonempty("CREDENTIALS_DIRECTORY")?;
    for name in names {
        let path = Path::new(&cred_dir).join(name);
        if let Ok(raw) = std::fs::read_to_string(&path) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub fn openai_api_key() -> std::result::Result<String, ConfigError> {
    if let Some(key) = env_nonempty("OPENAI_API_KEY") {
        return Ok(key);
    }

    // systemd `LoadCredential=` exposes secrets as files under
    // $CREDENTIALS_DIRECTORY.
    if let Some(key) = key_from_credentials_dir(&["openai_api_key", "OPENAI_API_KEY"]) {
        return Ok(key);
    }

    for path in legacy_api_key_paths() {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    Err(ConfigError::MissingOpenAiKey {
        env_file: env_file_path().display().to_string(),
    })
}

pub fn elevenlabs_api_key() -> std::result::Result<String, ConfigError> {
    env_nonempty("ELEVENLABS_API_KEY")
        .or_else(|| env_nonempty("XI_API_KEY"))
        .ok_or_else(|| ConfigError::MissingElevenLabsKey {
            env_file: env_file_path().display().to_string(),
        })
}

pub fn groq_api_key() -> std::result::Result<String, ConfigError> {
    env_nonempty("GROQ_API_KEY").ok_or_else(|| ConfigError::MissingGroqKey {
        env_file: env_file_path().display().to_string(),
    })
}

pub fn zwingli_backend() -> String {
    env_nonempty("VOICEPIPE_ZWINGLI_BACKEND")
        .map(|v| v.to_lowercase())
        .unwrap_or_else(|| "openai".to_string())
}

pub fn zwingli_model() -> String {
    env_nonempty("VOICEPIPE_ZWINGLI_MODEL").unwrap_or_else(|| DEFAULT_ZWINGLI_MODEL.to_string())
}

pub fn zwingli_base_url() -> Option<String> {
    env_nonempty("VOICEPIPE_ZWINGLI_BASE_URL")
}

pub fn zwingli_api_key_override() -> Option<String> {
    env_nonempty("VOICEPIPE_ZWINGLI_API_KEY")
}

pub fn zwingli_temperature() -> f32 {
    env_nonempty("VOICEPIPE_ZWINGLI_TEMPERATURE")
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|t| (0.0..=2.0).contains(t))
        .unwrap_or(DEFAULT_ZWINGLI_TEMPERATURE)
}

pub fn zwingli_system_prompt() -> String {
    env_nonempty("VOICEPIPE_ZWINGLI_SYSTEM_PROMPT")
        .unwrap_or_else(|| DEFAULT_ZWINGLI_SYSTEM_PROMPT.to_string())
}

pub fn zwingli_user_prompt() -> Option<String> {
    env_nonempty("VOICEPIPE_ZWINGLI_USER_PROMPT")
}

pub fn intent_routing_enabled() -> bool {
    match env_nonempty("VOICEPIPE_INTENT_ROUTING").as_deref() {
        Some("0") | Some("false") | Some("off") => false,
        _ => true,
    }
}

pub fn wake_prefixes() -> Vec<String> {
    match env_nonempty("VOICEPIPE_WAKE_PREFIXES") {
        Some(raw) => raw
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect(),
        None => DEFAULT_WAKE_PREFIXES.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn audio_sample_rate_hint() -> Option<u32> {
    env_nonempty("VOICEPIPE_AUDIO_SAMPLE_RATE").and_then(|v| v.parse().ok())
}

pub fn audio_channels_hint() -> Option<u16> {
    env_nonempty("VOICEPIPE_AUDIO_CHANNELS").and_then(|v| v.parse().ok())
}

/// Preferred device spec from env or legacy config files.
pub fn device_preference() -> Option<String> {
    if let Some(value) = env_nonempty("VOICEPIPE_DEVICE") {
        return Some(value);
    }
    let mut candidates = vec![config_dir(false).join("device")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".voicepipe_device"));
    }
    for path in candidates {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Preferred Pulse/PipeWire source name.
///
/// The global `PULSE_SOURCE` env var is intentionally not treated as a
/// voicepipe preference; only `VOICEPIPE_PULSE_SOURCE` (or config files)
/// pin the source, so the daemon never inherits a stale one.
pub fn pulse_source_preference() -> Option<String> {
    if let Some(value) = env_nonempty("VOICEPIPE_PULSE_SOURCE") {
        return Some(value);
    }
    let mut candidates = vec![config_dir(false).join("pulse_source")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".voicepipe_pulse_source"));
    }
    for path in candidates {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

// --- Transcript command configuration ------------------------------------

/// One verb definition from the triggers file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VerbConfig {
    #[serde(rename = "type", default)]
    pub verb_type: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub plugin: Option<PluginConfig>,
    #[serde(default)]
    pub destination: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Plugin reference for plugin-typed verbs. Exactly one of `module` (a
/// compile-time registered handler name) or `path` (an executable inside
/// the config dir) is expected.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PluginConfig {
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub callable: Option<String>,
}

/// LLM configuration bundle referenced by llm-typed verbs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LlmProfile {
    pub model: String,
    #[serde(default = "default_profile_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt_template: Option<String>,
}

fn default_profile_temperature() -> f32 {
    DEFAULT_ZWINGLI_TEMPERATURE
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchConfig {
    pub unknown_verb: Option<String>,
}

/// Parsed transcript command configuration.
///
/// Trigger iteration order is the file's insertion order; all keys are
/// normalized to lowercase on load.
#[derive(Debug, Clone, Default)]
pub struct CommandsConfig {
    pub triggers: Vec<(String, String)>,
    pub dispatch: DispatchConfig,
    pub verbs: HashMap<String, VerbConfig>,
    pub llm_profiles: HashMap<String, LlmProfile>,
}

impl CommandsConfig {
    pub fn from_triggers<I, K, V>(triggers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        CommandsConfig {
            triggers: triggers
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v.into().to_lowercase()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn verb(&self, name: &str) -> Option<&VerbConfig> {
        self.verbs.get(&name.to_lowercase())
    }

    pub fn profile(&self, name: &str) -> Option<&LlmProfile> {
        self.llm_profiles.get(&name.to_lowercase())
    }
}

fn trigger_action_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("action")
            .and_then(|a| a.as_str())
            .map(|a| a.to_string()),
        _ => None,
    }
}

/// Build a `CommandsConfig` from a parsed triggers-file value.
pub fn commands_config_from_value(value: &serde_json::Value) -> CommandsConfig {
    let mut config = CommandsConfig::default();
    let Some(root) = value.as_object() else {
        return config;
    };

    if let Some(triggers) = root.get("triggers").and_then(|t| t.as_object()) {
        for (key, raw_action) in triggers {
            let trigger = key.trim().to_lowercase();
            if trigger.is_empty() {
                continue;
            }
            if let Some(action) = trigger_action_from_value(raw_action) {
                config.triggers.push((trigger, action.trim().to_lowercase()));
            }
        }
    }

    if let Some(dispatch) = root.get("dispatch").and_then(|d| d.as_object()) {
        config.dispatch.unknown_verb = dispatch
            .get("unknown_verb")
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_lowercase());
    }

    if let Some(verbs) = root.get("verbs").and_then(|v| v.as_object()) {
        for (name, raw) in verbs {
            match serde_json::from_value::<VerbConfig>(raw.clone()) {
                Ok(verb) => {
                    config.verbs.insert(name.trim().to_lowercase(), verb);
                }
                Err(e) => tracing::warn!("Ignoring malformed verb '{}': {}", name, e),
            }
        }
    }

    if let Some(profiles) = root.get("llm_profiles").and_then(|p| p.as_object()) {
        for (name, raw) in profiles {
            match serde_json::from_value::<LlmProfile>(raw.clone()) {
                Ok(profile) => {
                    config.llm_profiles.insert(name.trim().to_lowercase(), profile);
                }
                Err(e) => tracing::warn!("Ignoring malformed llm profile '{}': {}", name, e),
            }
        }
    }

    config
}

/// Parse the inline `VOICEPIPE_TRANSCRIPT_TRIGGERS="a=x,b=strip"` format.
/// An empty string disables triggering entirely.
pub fn parse_inline_triggers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, action) = entry.split_once('=')?;
            let key = key.trim().to_lowercase();
            let action = action.trim().to_lowercase();
            if key.is_empty() || action.is_empty() {
                None
            } else {
                Some((key, action))
            }
        })
        .collect()
}

/// Load the commands config from an explicit triggers file path.
///
/// Parse errors never propagate into the pipeline: a malformed file yields
/// an empty triggers map (triggering is disabled until fixed).
pub fn load_commands_config_from(path: &Path) -> CommandsConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return CommandsConfig::default(),
    };
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => commands_config_from_value(&value),
        Err(e) => {
            tracing::warn!("Malformed triggers file {:?}: {} (triggers disabled)", path, e);
            CommandsConfig::default()
        }
    }
}

/// Resolve the effective transcript command configuration.
pub fn transcript_commands_config(load_env: bool) -> CommandsConfig {
    if load_env {
        load_environment(false);
    }

    if let Ok(raw) = std::env::var("VOICEPIPE_TRANSCRIPT_TRIGGERS") {
        let mut config = load_commands_config_from(&triggers_file_path());
        config.triggers = parse_inline_triggers(&raw);
        return config;
    }

    load_commands_config_from(&triggers_file_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_env_file_basic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe.env");
        std::fs::write(
            &path,
            "# comment\n\nOPENAI_API_KEY=sk-abc\nexport VOICEPIPE_MODEL=whisper-1\nQUOTED='hello world'\nDOUBLE=\"two words\"\nNOEQ\n",
        )
        .unwrap();

        let parsed = read_env_file(Some(&path));
        assert_eq!(parsed.get("OPENAI_API_KEY").unwrap(), "sk-abc");
        assert_eq!(parsed.get("VOICEPIPE_MODEL").unwrap(), "whisper-1");
        assert_eq!(parsed.get("QUOTED").unwrap(), "hello world");
        assert_eq!(parsed.get("DOUBLE").unwrap(), "two words");
        assert!(!parsed.contains_key("NOEQ"));
        assert!(!parsed.contains_key("# comment"));
    }

    #[test]
    fn test_read_env_file_tolerates_bom() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe.env");
        std::fs::write(&path, "\u{feff}KEY=value\n").unwrap();
        let parsed = read_env_file(Some(&path));
        assert_eq!(parsed.get("KEY").unwrap(), "value");
    }

    #[test]
    fn test_upsert_env_var_appends_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe.env");
        std::fs::write(&path, "# voicepipe config\nOTHER=keepme\n").unwrap();

        upsert_env_var("OPENAI_API_KEY", "sk-one", Some(&path)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("# voicepipe config\n"));
        assert!(content.contains("OTHER=keepme\n"));
        assert!(content.contains("OPENAI_API_KEY=sk-one\n"));

        upsert_env_var("OPENAI_API_KEY", "sk-two", Some(&path)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("OPENAI_API_KEY=").count(), 1);
        assert!(content.contains("OPENAI_API_KEY=sk-two\n"));
        assert!(content.contains("OTHER=keepme\n"));
    }

    #[test]
    fn test_upsert_env_var_replaces_export_form() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe.env");
        std::fs::write(&path, "export KEY=old\nTAIL=1\n").unwrap();

        upsert_env_var("KEY", "new", Some(&path)).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("KEY=new\n"));
        assert!(!content.contains("old"));
        assert!(content.contains("TAIL=1\n"));
    }

    #[test]
    fn test_upsert_env_var_rejects_newlines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe.env");
        let err = upsert_env_var("KEY", "bad\nvalue", Some(&path)).unwrap_err();
        assert!(err.to_string().contains("single line"));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_upsert_env_var_sets_private_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("voicepipe.env");
        upsert_env_var("KEY", "value", Some(&path)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(env_file_permissions_ok(Some(&path)), Some(true));
    }

    #[test]
    fn test_parse_inline_triggers() {
        let triggers = parse_inline_triggers("a=x, b=strip ,bad,=oops");
        assert_eq!(
            triggers,
            vec![
                ("a".to_string(), "x".to_string()),
                ("b".to_string(), "strip".to_string()),
            ]
        );
        assert!(parse_inline_triggers("").is_empty());
    }

    #[test]
    fn test_commands_config_from_value_normalizes_keys() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{
                "version": 1,
                "triggers": {"Zwingli": "dispatch", "Note": {"action": "Strip"}},
                "dispatch": {"unknown_verb": "strip"},
                "verbs": {
                    "Strip": {"type": "builtin", "action": "strip", "enabled": true},
                    "Run": {"type": "execute", "action": "shell", "timeout_seconds": 3.5}
                },
                "llm_profiles": {
                    "Polish": {"model": "gpt-4o-mini", "temperature": 0.3,
                               "system_prompt": "clean this up",
                               "user_prompt_template": "Fix: {{text}}"}
                }
            }"#,
        )
        .unwrap();

        let config = commands_config_from_value(&value);
        assert_eq!(
            config.triggers,
            vec![
                ("zwingli".to_string(), "dispatch".to_string()),
                ("note".to_string(), "strip".to_string()),
            ]
        );
        assert_eq!(config.dispatch.unknown_verb.as_deref(), Some("strip"));
        assert!(config.verb("STRIP").is_some());
        assert_eq!(config.verb("run").unwrap().timeout_seconds, Some(3.5));
        let profile = config.profile("polish").unwrap();
        assert_eq!(profile.model, "gpt-4o-mini");
        assert_eq!(profile.user_prompt_template.as_deref(), Some("Fix: {{text}}"));
    }

    #[test]
    fn test_malformed_triggers_file_disables_triggers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("triggers.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = load_commands_config_from(&path);
        assert!(config.triggers.is_empty());
        assert!(config.verbs.is_empty());
    }

    #[test]
    fn test_missing_triggers_file_yields_empty_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_commands_config_from(&tmp.path().join("absent.json"));
        assert!(config.triggers.is_empty());
    }

    #[test]
    fn test_verb_config_defaults_enabled() {
        let verb: VerbConfig =
            serde_json::from_str(r#"{"type": "builtin", "action": "strip"}"#).unwrap();
        assert!(verb.enabled);
        assert!(verb.profile.is_none());
    }
}
