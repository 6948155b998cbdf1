//! Voicepipe: push-to-talk dictation that types what you say
//!
//! This library provides the core functionality for:
//! - Capturing audio via cpal into bounded WAV/MP3 artifacts
//! - Driving a long-lived recorder daemon over JSON-line IPC
//! - Transcribing speech through remote STT providers (OpenAI, ElevenLabs)
//! - Routing transcripts between dictation and spoken-command mode
//! - Running transcript triggers (strip/dispatch/Zwingli/shell/plugin)
//! - Typing the result into the focused window (wtype/xdotool/osascript)
//!
//! # Architecture
//!
//! ```text
//!   Hotkey ──▶ Fast toggle ──▶ Recording backend chooser
//!                                    │
//!                     ┌──────────────┴───────────────┐
//!                     ▼                              ▼
//!              Recorder daemon                Capture child
//!              (socket IPC)                   (signals)
//!                     │                              │
//!                     └────────── WAV file ──────────┘
//!                                    │
//!                                    ▼
//!                          Transcriber daemon ──▶ STT client
//!                                    │
//!                                    ▼ raw text
//!                      Intent router / Trigger engine
//!                                    │
//!                                    ▼ output text
//!                    Replay buffer + Typing delivery
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fast;
pub mod hotkey;
pub mod intent;
pub mod ipc;
pub mod locks;
pub mod paths;
pub mod pipeline;
pub mod recording;
pub mod replay;
pub mod session;
pub mod transcribe;
pub mod triggers;
pub mod typing;
pub mod zwingli;

pub use cli::{Cli, Commands, ConfigAction, FastAction, RecordAction};
pub use error::{Result, VoicepipeError};
