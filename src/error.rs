//! Error types for voicepipe
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the voicepipe application
#[derive(Error, Debug)]
pub enum VoicepipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Transcription error: {0}")]
    Transcribe(#[from] TranscribeError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Typing error: {0}")]
    Typing(#[from] TypingError),

    #[error("Hotkey error: {0}")]
    Hotkey(#[from] HotkeyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to configuration loading and the env file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("OpenAI API key not found.\n  Save it in: {env_file}\n  Example line: OPENAI_API_KEY=sk-...\n  Or set OPENAI_API_KEY in the current environment.")]
    MissingOpenAiKey { env_file: String },

    #[error("ElevenLabs API key not found.\n  Save it in: {env_file}\n  Example line: ELEVENLABS_API_KEY=...\n  Or set ELEVENLABS_API_KEY / XI_API_KEY in the current environment.")]
    MissingElevenLabsKey { env_file: String },

    #[error("Groq API key not found.\n  Save it in: {env_file}\n  Example line: GROQ_API_KEY=gsk_...\n  Or set GROQ_API_KEY in the current environment.")]
    MissingGroqKey { env_file: String },

    #[error("invalid value for {name}: must be a single line")]
    MultilineValue { name: String },

    #[error("Config error: {0}")]
    Other(String),
}

/// Errors related to audio device selection and capture
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device not found: '{0}'. List sources with: pactl list sources short")]
    DeviceNotFound(String),

    #[error("Audio device index {0} does not exist ({1} input devices available)")]
    DeviceIndexOutOfRange(usize, usize),

    #[error("No working audio input device found. Check your microphone.")]
    NoWorkingDevice,

    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("No audio was captured. Check your microphone.")]
    EmptyRecording,

    #[error("Audio encoder exited unexpectedly: {0}")]
    EncoderDied(String),

    #[error("WAV error: {0}")]
    Wav(String),
}

/// Errors from the recording lifecycle and backends
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording already in progress (PID: {0})")]
    AlreadyInProgress(u32),

    #[error("No active recording session found")]
    NoActiveSession,

    #[error("Error starting recording: {0}")]
    StartFailed(String),

    #[error("Recording error: {0}")]
    Backend(String),
}

/// Errors from the JSON-line IPC layer.
///
/// `Unavailable` means the daemon cannot be reached at all (socket missing
/// or connection refused) and callers may fall back to an in-process
/// backend. Everything else means a daemon was reached but the exchange
/// failed and must be surfaced, not retried elsewhere.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Daemon unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out waiting for daemon response: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors related to speech-to-text transcription
#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("Audio file not found: {0}")]
    AudioNotFound(String),

    #[error("Unsupported transcription backend '{0}'. Set VOICEPIPE_TRANSCRIBE_BACKEND to openai or elevenlabs.")]
    UnsupportedBackend(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote server error (HTTP {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Transcription returned non-JSON: {0}")]
    BadResponse(String),

    #[error("Transcription failed: {0}")]
    Failed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for TranscribeError {
    fn from(e: ConfigError) -> Self {
        TranscribeError::Config(e.to_string())
    }
}

/// Errors from the transcript trigger engine
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Shell trigger action is disabled. Set VOICEPIPE_SHELL_ALLOW=1 to enable.")]
    ShellDisabled,

    #[error("Plugin verbs are disabled. Set VOICEPIPE_PLUGIN_ALLOW=1 to enable.")]
    PluginDisabled,

    #[error("Plugin path must be inside the config dir: {0}")]
    PluginOutsideConfig(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Unknown trigger action: '{0}'")]
    UnknownAction(String),

    #[error("Zwingli error: {0}")]
    Zwingli(String),

    #[error("Trigger handler error: {0}")]
    Handler(String),
}

/// Errors related to text output delivery
#[derive(Error, Debug)]
pub enum TypingError {
    #[error("Unknown typing backend: '{0}'. Valid values: auto, wayland, x11, wtype, xdotool, osascript, sendinput, none, disable")]
    UnknownBackend(String),

    #[error("{tool} not found in PATH. Install it via your package manager.")]
    ToolNotFound { tool: &'static str },

    #[error("No typing backend available for this session (set VOICEPIPE_TYPE_BACKEND to override)")]
    NoBackend,

    #[error("Text injection failed: {0}")]
    InjectionFailed(String),

    #[error("Unknown key name: '{0}'")]
    UnknownKey(String),
}

/// Errors from the hotkey runner
#[derive(Error, Debug)]
pub enum HotkeyError {
    #[error("Invalid hotkey spec '{0}'. Example: alt+f5")]
    InvalidSpec(String),

    #[error("Failed to register hotkey '{0}': {1}. Another application may already own it.")]
    RegisterFailed(String, String),

    #[error("Hotkey event loop error: {0}")]
    EventLoop(String),
}

/// Result type alias using VoicepipeError
pub type Result<T> = std::result::Result<T, VoicepipeError>;
