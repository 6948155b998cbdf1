// Command-line interface definitions for voicepipe
//
// This module only declares the clap surface; main.rs dispatches.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "voicepipe")]
#[command(author, version, about = "Push-to-talk dictation that types what you say")]
#[command(long_about = "
Voicepipe is a push-to-talk dictation tool. A hotkey press starts
microphone capture; a second press stops it, sends the audio to a remote
speech-to-text provider, optionally runs the transcript through the
trigger/Zwingli command pipeline, then types the result into the focused
window.

COMMANDS:
  voicepipe daemon          Run the recorder daemon (warm audio, IPC control)
  voicepipe transcriber     Run the transcriber daemon (warm STT clients)
  voicepipe hotkey          Register the global hotkey and toggle on press
  voicepipe fast toggle     One hotkey-style toggle (for WM keybindings)
  voicepipe record start    Start recording
  voicepipe record stop     Stop recording, transcribe, print
  voicepipe record status   Show recording state
  voicepipe transcribe F    Transcribe an audio file
  voicepipe replay          Re-deliver the last output
  voicepipe config show     Show resolved configuration

EXAMPLES:
  voicepipe config set OPENAI_API_KEY sk-...
  VOICEPIPE_HOTKEY=ctrl+alt+d voicepipe hotkey
  voicepipe transcribe note.wav --model elevenlabs:scribe_v1

See 'voicepipe <command> --help' for more info on a command.
")]
pub struct Cli {
    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the recorder daemon
    Daemon,

    /// Run the transcriber daemon
    Transcriber,

    /// Control recording (start/stop/cancel/status/toggle)
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Hotkey-optimized control (single-instance lock + debounce)
    Fast {
        #[command(subcommand)]
        action: FastAction,
    },

    /// Register the global hotkey and run until killed
    Hotkey,

    /// Transcribe an audio file and print the text
    Transcribe {
        /// Audio file (WAV or MP3)
        file: PathBuf,

        /// Model, optionally backend-prefixed (e.g. elevenlabs:scribe_v1)
        #[arg(long)]
        model: Option<String>,

        /// Language code hint (e.g. en)
        #[arg(long)]
        language: Option<String>,

        /// Print the full JSON payload instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Show, re-type, or clear the last output
    Replay {
        /// Type the last output into the focused window again
        #[arg(long = "type")]
        type_text: bool,

        /// Remove the stored last output
        #[arg(long)]
        clear: bool,

        /// Print the JSON envelope instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Inspect or update the env-file configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Internal: capture child spawned by the subprocess backend
    #[command(hide = true, name = "capture-child")]
    CaptureChild,
}

#[derive(Subcommand)]
pub enum RecordAction {
    /// Start recording
    Start {
        /// Device index, name, or pulse:<source>
        #[arg(long)]
        device: Option<String>,
    },
    /// Stop recording, transcribe, and print the text
    Stop,
    /// Cancel recording and discard the audio
    Cancel,
    /// Show recording status
    Status,
    /// Toggle recording (start, or stop+transcribe+deliver)
    Toggle,
}

#[derive(Subcommand)]
pub enum FastAction {
    /// Start recording (silent when already recording)
    Start,
    /// Stop, transcribe, print (silent when idle)
    Stop,
    /// Toggle with single-instance lock and debounce
    Toggle,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show resolved configuration and paths
    Show,
    /// Set a key in the canonical env file
    Set {
        /// Variable name, e.g. OPENAI_API_KEY
        name: String,
        /// Value (single line)
        value: String,
    },
}
