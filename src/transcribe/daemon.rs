//! Persistent transcriber daemon and its client.
//!
//! The daemon keeps warm HTTP clients so a hotkey stop never pays client
//! construction cost. Protocol: the client sends one JSON request line,
//! the daemon answers with a stream of `{"type":"transcription"}` lines
//! followed by exactly one `{"type":"complete"}` or
//! `{"type":"error","message":...}` terminator.
//!
//! Requests carry either `audio_file` (a path the daemon can read) or
//! `audio` (hex-encoded bytes, written to a runtime-dir temp file that is
//! deleted in all paths). A `"backend:model"` model string selects a
//! per-request backend; clients are built lazily, one per backend.

use crate::error::IpcError;
use crate::ipc::{
    IpcListener, IpcStream, MAX_TRANSCRIBER_LINE_BYTES, TRANSCRIBE_READ_TIMEOUT,
};
use crate::transcribe::{
    build_transcriber, resolve_backend_and_model, TranscribeOptions, Transcriber,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type ClientPool = Arc<Mutex<HashMap<String, Box<dyn Transcriber>>>>;

fn decode_hex(raw: &str) -> std::result::Result<Vec<u8>, String> {
    let cleaned = raw.trim();
    if cleaned.len() % 2 != 0 {
        return Err("odd-length hex audio".to_string());
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16).map_err(|e| format!("bad hex audio: {e}"))
        })
        .collect()
}

async fn stream_text(conn: &mut IpcStream, text: &str) -> std::io::Result<()> {
    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        conn.write_json_line(&json!({
            "type": "transcription",
            "text": format!("{line}\n"),
        }))
        .await?;
    }
    conn.write_json_line(&json!({"type": "complete"})).await
}

async fn send_error(conn: &mut IpcStream, message: &str) {
    let _ = conn
        .write_json_line(&json!({"type": "error", "message": message}))
        .await;
}

fn run_transcription(
    pool: &ClientPool,
    backend: &str,
    model: &str,
    audio_file: &Path,
    options: &TranscribeOptions,
) -> std::result::Result<String, String> {
    let mut clients = pool.lock().map_err(|_| "client pool poisoned".to_string())?;
    if !clients.contains_key(backend) {
        let client = build_transcriber(backend, model).map_err(|e| e.to_string())?;
        clients.insert(backend.to_string(), client);
    }
    let client = clients.get(backend).expect("client just inserted");
    client
        .transcribe(audio_file, options, Some(model))
        .map_err(|e| e.to_string())
}

struct Request {
    audio_file: Option<PathBuf>,
    audio_hex: Option<String>,
    suffix: String,
    model: Option<String>,
    options: TranscribeOptions,
}

fn parse_request(value: &Value) -> Request {
    let str_field = |name: &str| -> Option<String> {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut suffix = str_field("suffix")
        .or_else(|| str_field("format"))
        .unwrap_or_else(|| ".wav".to_string());
    if !suffix.starts_with('.') {
        suffix = format!(".{suffix}");
    }

    Request {
        audio_file: str_field("audio_file").map(PathBuf::from),
        audio_hex: str_field("audio"),
        suffix,
        model: str_field("model"),
        options: TranscribeOptions {
            language: str_field("language"),
            prompt: str_field("prompt"),
            temperature: value
                .get("temperature")
                .and_then(|t| t.as_f64())
                .unwrap_or(0.0) as f32,
        },
    }
}

async fn handle_connection(
    conn: &mut IpcStream,
    pool: &ClientPool,
    default_backend: &str,
    default_model: &str,
    tmp_dir: &Path,
) {
    let request = match conn
        .read_json_line(MAX_TRANSCRIBER_LINE_BYTES, TRANSCRIBE_READ_TIMEOUT)
        .await
    {
        Ok(Some(value)) => parse_request(&value),
        Ok(None) => return,
        Err(e) => {
            send_error(conn, &e.to_string()).await;
            return;
        }
    };

    let (backend, model) = resolve_backend_and_model(
        request.model.as_deref(),
        default_backend,
        default_model,
    );

    // Hex audio goes through a temp file that is removed no matter what.
    let (audio_path, temp_guard): (PathBuf, Option<PathBuf>) =
        if let Some(hex) = &request.audio_hex {
            let bytes = match decode_hex(hex) {
                Ok(bytes) => bytes,
                Err(e) => {
                    send_error(conn, &e).await;
                    return;
                }
            };
            let temp = tempfile::Builder::new()
                .prefix("voicepipe_rx_")
                .suffix(&request.suffix)
                .tempfile_in(tmp_dir)
                .and_then(|f| {
                    std::fs::write(f.path(), &bytes)?;
                    f.into_temp_path()
                        .keep()
                        .map_err(|e| std::io::Error::other(e.to_string()))
                });
            match temp {
                Ok(path) => (path.clone(), Some(path)),
                Err(e) => {
                    send_error(conn, &format!("cannot stage audio: {e}")).await;
                    return;
                }
            }
        } else if let Some(path) = &request.audio_file {
            if !path.exists() {
                send_error(conn, "Audio file not found").await;
                return;
            }
            (path.clone(), None)
        } else {
            send_error(conn, "Audio file not found").await;
            return;
        };

    let started = std::time::Instant::now();
    let result = {
        let pool = pool.clone();
        let backend = backend.clone();
        let model = model.clone();
        let audio = audio_path.clone();
        let options = request.options.clone();
        tokio::task::spawn_blocking(move || {
            run_transcription(&pool, &backend, &model, &audio, &options)
        })
        .await
        .unwrap_or_else(|e| Err(format!("transcription task failed: {e}")))
    };

    if let Some(temp) = temp_guard {
        let _ = std::fs::remove_file(temp);
    }

    match result {
        Ok(text) => {
            tracing::info!(
                "Transcribed {:?} in {:.2}s (backend={} model={})",
                audio_path,
                started.elapsed().as_secs_f32(),
                backend,
                model
            );
            if let Err(e) = stream_text(conn, &text).await {
                tracing::warn!("Failed to stream transcription: {}", e);
            }
        }
        Err(message) => {
            tracing::error!("Transcription request failed: {}", message);
            send_error(conn, &message).await;
        }
    }
}

/// Run the transcriber daemon until SIGTERM/SIGINT.
pub async fn serve(
    backend: &str,
    model: &str,
    socket_path: Option<&Path>,
) -> anyhow::Result<()> {
    let socket = socket_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| {
            crate::paths::runtime_app_dir(true);
            crate::paths::transcriber_socket_path()
        });
    let tmp_dir = crate::paths::runtime_app_dir(true);

    let (default_backend, default_model) =
        resolve_backend_and_model(Some(model), backend, model);

    let pool: ClientPool = Arc::new(Mutex::new(HashMap::new()));
    {
        // Build the default client eagerly so a broken key fails at startup,
        // not on the first hotkey press.
        let mut clients = pool.lock().expect("fresh pool");
        clients.insert(
            default_backend.clone(),
            build_transcriber(&default_backend, &default_model)
                .map_err(|e| anyhow::anyhow!("{e}"))?,
        );
    }
    tracing::info!(
        "Transcriber ready (backend={} model={})",
        default_backend,
        default_model
    );

    let listener = IpcListener::bind(&socket)?;
    tracing::info!("Transcriber daemon listening on {:?}", socket);

    let mut shutdown = shutdown_signal();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Transcriber daemon shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(mut conn) => {
                        handle_connection(
                            &mut conn,
                            &pool,
                            &default_backend,
                            &default_model,
                            &tmp_dir,
                        )
                        .await;
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                }
            }
        }
    }

    listener.cleanup();
    Ok(())
}

fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    #[cfg(unix)]
    {
        Box::pin(async {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");
            let mut int = signal(SignalKind::interrupt()).expect("SIGINT handler");
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
        })
    }
    #[cfg(not(unix))]
    {
        Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        })
    }
}

/// Transcribe through the daemon, concatenating the streamed lines.
pub async fn transcribe_via_daemon(
    audio_file: &Path,
    model: Option<&str>,
    options: &TranscribeOptions,
) -> std::result::Result<String, IpcError> {
    let candidates = crate::paths::transcriber_socket_paths();
    let socket = crate::paths::find_existing_socket(&candidates).ok_or_else(|| {
        IpcError::Unavailable(format!(
            "transcriber socket not found (tried: {})",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    transcribe_via_daemon_at(&socket, audio_file, model, options).await
}

/// Like `transcribe_via_daemon` but against an explicit socket path.
pub async fn transcribe_via_daemon_at(
    socket: &Path,
    audio_file: &Path,
    model: Option<&str>,
    options: &TranscribeOptions,
) -> std::result::Result<String, IpcError> {
    let mut stream = IpcStream::connect(socket).await?;

    let mut request = json!({
        "audio_file": audio_file.display().to_string(),
        "temperature": options.temperature,
    });
    if let Some(model) = model {
        request["model"] = json!(model);
    }
    if let Some(language) = &options.language {
        request["language"] = json!(language);
    }
    if let Some(prompt) = &options.prompt {
        request["prompt"] = json!(prompt);
    }

    stream
        .write_json_line(&request)
        .await
        .map_err(|e| IpcError::Protocol(format!("send failed: {e}")))?;

    let mut full_text = String::new();
    loop {
        let line = stream
            .read_json_line(MAX_TRANSCRIBER_LINE_BYTES, TRANSCRIBE_READ_TIMEOUT)
            .await?;
        let Some(line) = line else {
            // Peer closed without a terminator; keep what we have.
            return Ok(full_text);
        };
        match line.get("type").and_then(|t| t.as_str()) {
            Some("transcription") => {
                if let Some(text) = line.get("text").and_then(|t| t.as_str()) {
                    full_text.push_str(text);
                }
            }
            Some("complete") => return Ok(full_text),
            Some("error") => {
                let message = line
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                return Err(IpcError::Protocol(message.to_string()));
            }
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("52494646").unwrap(), b"RIFF");
        assert_eq!(decode_hex(""), Ok(Vec::new()));
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn test_parse_request_defaults() {
        let request = parse_request(&json!({"audio_file": "/tmp/a.wav"}));
        assert_eq!(request.audio_file.as_deref(), Some(Path::new("/tmp/a.wav")));
        assert_eq!(request.suffix, ".wav");
        assert!(request.model.is_none());
        assert_eq!(request.options.temperature, 0.0);
    }

    #[test]
    fn test_parse_request_suffix_normalization() {
        let request = parse_request(&json!({"audio": "00", "suffix": "mp3"}));
        assert_eq!(request.suffix, ".mp3");
        let request = parse_request(&json!({"audio": "00", "format": ".ogg"}));
        assert_eq!(request.suffix, ".ogg");
    }

    #[test]
    fn test_parse_request_blank_fields_are_none() {
        let request = parse_request(&json!({
            "audio_file": "/tmp/a.wav",
            "language": "  ",
            "prompt": "",
            "model": "elevenlabs:scribe_v1",
            "temperature": 0.25,
        }));
        assert!(request.options.language.is_none());
        assert!(request.options.prompt.is_none());
        assert_eq!(request.model.as_deref(), Some("elevenlabs:scribe_v1"));
        assert!((request.options.temperature - 0.25).abs() < 1e-6);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_concatenates_streamed_lines() {
        // A fake daemon that answers any request with two lines + complete.
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("voicepipe_transcriber.sock");
        let listener = IpcListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let request = conn
                .read_json_line(MAX_TRANSCRIBER_LINE_BYTES, std::time::Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            assert!(request["audio_file"].as_str().is_some());
            conn.write_json_line(&json!({"type": "transcription", "text": "hello "}))
                .await
                .unwrap();
            conn.write_json_line(&json!({"type": "transcription", "text": "world"}))
                .await
                .unwrap();
            conn.write_json_line(&json!({"type": "complete"})).await.unwrap();
        });

        let text = transcribe_via_daemon_at(
            &socket,
            Path::new("/tmp/clip.wav"),
            Some("gpt-4o-transcribe"),
            &TranscribeOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(text, "hello world");
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_surfaces_daemon_error() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("err.sock");
        let listener = IpcListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let _ = conn
                .read_json_line(MAX_TRANSCRIBER_LINE_BYTES, std::time::Duration::from_secs(1))
                .await;
            send_error(&mut conn, "Audio file not found").await;
        });

        let err = transcribe_via_daemon_at(
            &socket,
            Path::new("/tmp/absent.wav"),
            None,
            &TranscribeOptions::default(),
        )
        .await
        .unwrap_err();

        match err {
            IpcError::Protocol(message) => assert_eq!(message, "Audio file not found"),
            other => panic!("expected protocol error, got {other:?}"),
        }
        server.await.unwrap();
    }
}
