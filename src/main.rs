//! Voicepipe - push-to-talk dictation
//!
//! Run `voicepipe daemon` and `voicepipe transcriber` as user services,
//! then bind `voicepipe fast toggle` to a hotkey (or run `voicepipe
//! hotkey` for the built-in global hotkey).

use clap::Parser;
use tracing_subscriber::EnvFilter;
use voicepipe::cli::{Cli, Commands, ConfigAction, FastAction, RecordAction};
use voicepipe::recording::AutoRecorderBackend;
use voicepipe::transcribe::{transcribe_audio_file, TranscribeOptions};
use voicepipe::{config, paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voicepipe={log_level},warn"))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Hotkey-style entrypoints must not pick up a random cwd `.env` from
    // whatever directory the window manager launched us in.
    let load_cwd_dotenv = !matches!(
        cli.command,
        Commands::Fast { .. } | Commands::Hotkey | Commands::CaptureChild
    );
    config::load_environment(load_cwd_dotenv);

    match cli.command {
        Commands::Daemon => {
            voicepipe::daemon::run(None).await?;
        }

        Commands::Transcriber => {
            voicepipe::transcribe::daemon::serve(
                &config::transcribe_backend(),
                &config::transcribe_model(),
                None,
            )
            .await?;
        }

        Commands::Record { action } => {
            run_record(action).await?;
        }

        Commands::Fast { action } => match action {
            FastAction::Start => voicepipe::fast::fast_start().await?,
            FastAction::Stop => voicepipe::fast::fast_stop().await?,
            FastAction::Toggle => voicepipe::fast::fast_toggle().await?,
        },

        Commands::Hotkey => {
            voicepipe::hotkey::run().await?;
        }

        Commands::Transcribe {
            file,
            model,
            language,
            json,
        } => {
            let model = model.unwrap_or_else(config::transcribe_model);
            let options = TranscribeOptions {
                language,
                ..Default::default()
            };
            let text = transcribe_audio_file(&file, &model, &options, true).await?;
            if json {
                let result = voicepipe::transcribe::TranscriptionResult::new(
                    text.trim(),
                    &config::transcribe_backend(),
                    &model,
                    "transcribe-file",
                )
                .with_audio_path(&file);
                println!("{}", serde_json::to_string_pretty(&result.to_payload())?);
            } else {
                println!("{}", text.trim());
            }
        }

        Commands::Replay {
            type_text,
            clear,
            json,
        } => {
            run_replay(type_text, clear, json).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => show_config(),
            ConfigAction::Set { name, value } => {
                let path = config::upsert_env_var(&name, &value, None)?;
                println!("Updated {} in {}", name, path.display());
            }
        },

        Commands::CaptureChild => {
            voicepipe::recording::run_capture_child().await?;
        }
    }

    Ok(())
}

async fn run_record(action: RecordAction) -> anyhow::Result<()> {
    let backend = AutoRecorderBackend::new();
    match action {
        RecordAction::Start { device } => {
            let result = backend.start(device.as_deref()).await?;
            match result.audio_file {
                Some(audio_file) => {
                    println!("Recording started ({})", audio_file.display())
                }
                None => println!("Recording started"),
            }
        }
        RecordAction::Stop => {
            let status = backend.status().await?;
            if status.status != "recording" {
                eprintln!("Error: no recording in progress");
                std::process::exit(1);
            }
            voicepipe::fast::fast_stop().await?;
        }
        RecordAction::Cancel => {
            backend.cancel().await?;
            println!("Recording cancelled");
        }
        RecordAction::Status => {
            let status = backend.status().await?;
            match status.pid {
                Some(pid) => println!("{} (pid {}, {:?})", status.status, pid, status.mode),
                None => println!("{}", status.status),
            }
        }
        RecordAction::Toggle => {
            voicepipe::fast::fast_toggle().await?;
        }
    }
    Ok(())
}

async fn run_replay(type_text: bool, clear: bool, json: bool) -> anyhow::Result<()> {
    if clear {
        voicepipe::replay::clear_last_output();
        println!("Cleared last output");
        return Ok(());
    }

    let Some(last) = voicepipe::replay::load_last_output() else {
        eprintln!("No last output stored");
        std::process::exit(1);
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "version": 1,
                "created_ms": last.created_ms,
                "text": last.text,
                "payload": last.payload,
            }))?
        );
        return Ok(());
    }

    if type_text {
        let delivery = voicepipe::typing::resolve_typing_delivery()?;
        let window = if delivery.supports_window_id() {
            delivery.active_window_id().await
        } else {
            None
        };
        delivery.type_text(&last.text, window.as_deref()).await?;
    } else {
        println!("{}", last.text);
    }
    Ok(())
}

fn show_config() {
    println!("env file:            {}", config::env_file_path().display());
    println!(
        "env file private:    {}",
        match config::env_file_permissions_ok(None) {
            Some(true) => "yes",
            Some(false) => "no (run: chmod 600)",
            None => "missing",
        }
    );
    println!("triggers file:       {}", config::triggers_file_path().display());
    println!("transcribe backend:  {}", config::transcribe_backend());
    println!("transcribe model:    {}", config::transcribe_model());
    println!("zwingli backend:     {}", config::zwingli_backend());
    println!("zwingli model:       {}", config::zwingli_model());
    println!("wake prefixes:       {}", config::wake_prefixes().join(", "));
    println!("runtime dir:         {}", paths::runtime_app_dir(false).display());
    println!("state dir:           {}", paths::state_dir(false).display());
    println!("recorder socket:     {}", paths::daemon_socket_path().display());
    println!(
        "transcriber socket:  {}",
        paths::transcriber_socket_path().display()
    );

    let commands = config::transcript_commands_config(false);
    if commands.triggers.is_empty() {
        println!("triggers:            (none)");
    } else {
        let rendered: Vec<String> = commands
            .triggers
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!("triggers:            {}", rendered.join(", "));
    }
}
