//! Newline-delimited JSON IPC over per-user stream sockets.
//!
//! Every message is one UTF-8 JSON object terminated by a single `\n`, no
//! length prefix. Readers accumulate arbitrary chunking into a buffer and
//! enforce a byte cap; overflow is a protocol error, not a truncation.
//!
//! On Unix the transport is an `AF_UNIX` stream socket. On Windows a
//! loopback TCP listener stands in, with the bound port written to a
//! `<socket>.port` discovery file; the framing is identical.
//!
//! "Socket missing / connection refused" is reported as
//! `IpcError::Unavailable` so callers can fall back to in-process
//! execution; anything after a successful connect is a real error.

use crate::error::IpcError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const MAX_RECORDER_RESPONSE_BYTES: usize = 65_536;
pub const MAX_TRANSCRIBER_LINE_BYTES: usize = 256_000;

pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
pub const STATUS_READ_TIMEOUT: Duration = Duration::from_millis(500);
pub const COMMAND_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const TRANSCRIBE_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Read timeout appropriate for a recorder command.
pub fn default_read_timeout(command: &str) -> Duration {
    if command == "status" {
        STATUS_READ_TIMEOUT
    } else {
        COMMAND_READ_TIMEOUT
    }
}

#[cfg(windows)]
fn discovery_path(socket_path: &Path) -> PathBuf {
    let name = socket_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "voicepipe.sock".to_string());
    socket_path.with_file_name(format!("{name}.port"))
}

/// Whether a daemon appears to be listening at this socket path.
pub fn socket_present(socket_path: &Path) -> bool {
    #[cfg(unix)]
    {
        socket_path.exists()
    }
    #[cfg(windows)]
    {
        discovery_path(socket_path).exists()
    }
}

enum ListenerInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
    #[cfg(windows)]
    Tcp(tokio::net::TcpListener),
}

/// A bound daemon endpoint. Stale socket files are replaced on bind and
/// removed again by `cleanup`.
pub struct IpcListener {
    inner: ListenerInner,
    socket_path: PathBuf,
}

impl IpcListener {
    pub fn bind(socket_path: &Path) -> std::io::Result<IpcListener> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            if socket_path.exists() {
                std::fs::remove_file(socket_path)?;
            }
            let listener = tokio::net::UnixListener::bind(socket_path)?;
            crate::paths::ensure_private_file(socket_path);
            Ok(IpcListener {
                inner: ListenerInner::Unix(listener),
                socket_path: socket_path.to_path_buf(),
            })
        }

        #[cfg(windows)]
        {
            let std_listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
            std_listener.set_nonblocking(true)?;
            let port = std_listener.local_addr()?.port();
            std::fs::write(discovery_path(socket_path), port.to_string())?;
            let listener = tokio::net::TcpListener::from_std(std_listener)?;
            Ok(IpcListener {
                inner: ListenerInner::Tcp(listener),
                socket_path: socket_path.to_path_buf(),
            })
        }
    }

    pub async fn accept(&self) -> std::io::Result<IpcStream> {
        match &self.inner {
            #[cfg(unix)]
            ListenerInner::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(IpcStream::new(StreamInner::Unix(stream)))
            }
            #[cfg(windows)]
            ListenerInner::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(IpcStream::new(StreamInner::Tcp(stream)))
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Remove the socket (and discovery file) from disk.
    pub fn cleanup(&self) {
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        #[cfg(windows)]
        {
            let _ = std::fs::remove_file(discovery_path(&self.socket_path));
        }
    }
}

impl Drop for IpcListener {
    fn drop(&mut self) {
        self.cleanup();
    }
}

enum StreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    Tcp(tokio::net::TcpStream),
}

/// One framed connection, client or server side.
pub struct IpcStream {
    inner: StreamInner,
    buffer: Vec<u8>,
}

impl IpcStream {
    fn new(inner: StreamInner) -> Self {
        IpcStream {
            inner,
            buffer: Vec::new(),
        }
    }

    /// Connect to a daemon socket. `Unavailable` when nothing is listening.
    pub async fn connect(socket_path: &Path) -> std::result::Result<IpcStream, IpcError> {
        if !socket_present(socket_path) {
            return Err(IpcError::Unavailable(format!(
                "socket not found: {}",
                socket_path.display()
            )));
        }

        #[cfg(unix)]
        {
            let connect = tokio::net::UnixStream::connect(socket_path);
            match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                Ok(Ok(stream)) => Ok(IpcStream::new(StreamInner::Unix(stream))),
                Ok(Err(e)) => Err(IpcError::Unavailable(format!(
                    "cannot connect to {}: {e}",
                    socket_path.display()
                ))),
                Err(_) => Err(IpcError::Unavailable(format!(
                    "connect timed out: {}",
                    socket_path.display()
                ))),
            }
        }

        #[cfg(windows)]
        {
            let port: u16 = std::fs::read_to_string(discovery_path(socket_path))
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .ok_or_else(|| {
                    IpcError::Unavailable(format!(
                        "discovery file unreadable: {}",
                        socket_path.display()
                    ))
                })?;
            let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
            match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                Ok(Ok(stream)) => Ok(IpcStream::new(StreamInner::Tcp(stream))),
                Ok(Err(e)) => Err(IpcError::Unavailable(format!(
                    "cannot connect to 127.0.0.1:{port}: {e}"
                ))),
                Err(_) => Err(IpcError::Unavailable(format!("connect timed out: port {port}"))),
            }
        }
    }

    async fn read_chunk(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = match &mut self.inner {
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.read(&mut chunk).await?,
            #[cfg(windows)]
            StreamInner::Tcp(stream) => stream.read(&mut chunk).await?,
        };
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Write one JSON object plus the terminating newline.
    pub async fn write_json_line(&mut self, value: &Value) -> std::io::Result<()> {
        let mut payload = serde_json::to_vec(value)?;
        payload.push(b'\n');
        match &mut self.inner {
            #[cfg(unix)]
            StreamInner::Unix(stream) => {
                stream.write_all(&payload).await?;
                stream.flush().await
            }
            #[cfg(windows)]
            StreamInner::Tcp(stream) => {
                stream.write_all(&payload).await?;
                stream.flush().await
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }

    /// Read one newline-terminated JSON object.
    ///
    /// `Ok(None)` on clean EOF before any payload. Empty lines are skipped.
    pub async fn read_json_line(
        &mut self,
        max_bytes: usize,
        read_timeout: Duration,
    ) -> std::result::Result<Option<Value>, IpcError> {
        loop {
            while let Some(line) = self.take_line() {
                if line.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                let parsed = serde_json::from_slice(&line)
                    .map_err(|e| IpcError::Protocol(format!("invalid JSON line: {e}")))?;
                return Ok(Some(parsed));
            }

            if self.buffer.len() > max_bytes {
                return Err(IpcError::Protocol(format!(
                    "message too large (>{max_bytes} bytes)"
                )));
            }

            let n = tokio::time::timeout(read_timeout, self.read_chunk())
                .await
                .map_err(|_| IpcError::Timeout("read timed out".to_string()))?
                .map_err(|e| IpcError::Protocol(format!("read failed: {e}")))?;
            if n == 0 {
                if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                // Tolerate a final object with no trailing newline.
                let line: Vec<u8> = std::mem::take(&mut self.buffer);
                let parsed = serde_json::from_slice(&line)
                    .map_err(|e| IpcError::Protocol(format!("invalid JSON line: {e}")))?;
                return Ok(Some(parsed));
            }
        }
    }

    /// Read a single JSON object response, accumulating chunks until the
    /// buffer parses or the peer closes.
    pub async fn read_json_response(
        &mut self,
        max_bytes: usize,
        read_timeout: Duration,
    ) -> std::result::Result<Value, IpcError> {
        loop {
            let trimmed: &[u8] = {
                let buf = &self.buffer;
                let start = buf.iter().position(|b| !b.is_ascii_whitespace());
                match start {
                    Some(start) => &buf[start..],
                    None => &[],
                }
            };
            if !trimmed.is_empty() {
                let candidate: Vec<u8> = trimmed
                    .iter()
                    .copied()
                    .take_while(|&b| b != b'\n')
                    .collect();
                if let Ok(parsed) = serde_json::from_slice::<Value>(&candidate) {
                    self.buffer.clear();
                    return Ok(parsed);
                }
            }

            if self.buffer.len() > max_bytes {
                return Err(IpcError::Protocol(format!(
                    "response too large (>{max_bytes} bytes)"
                )));
            }

            let n = tokio::time::timeout(read_timeout, self.read_chunk())
                .await
                .map_err(|_| IpcError::Timeout("response timed out".to_string()))?
                .map_err(|e| IpcError::Protocol(format!("read failed: {e}")))?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Err(IpcError::Protocol("empty response".to_string()));
                }
                return serde_json::from_slice(&self.buffer)
                    .map_err(|e| IpcError::Protocol(format!("invalid JSON response: {e}")));
            }
        }
    }
}

/// Send one request to the recorder daemon and return its JSON response.
///
/// Tries each existing candidate socket in order.
pub async fn send_request(
    command: &str,
    extra: Value,
    socket_path: Option<&Path>,
    read_timeout: Option<Duration>,
) -> std::result::Result<Value, IpcError> {
    let candidates: Vec<PathBuf> = match socket_path {
        Some(path) => vec![path.to_path_buf()],
        None => crate::paths::daemon_socket_paths(),
    };
    let existing: Vec<PathBuf> = candidates
        .iter()
        .filter(|p| socket_present(p))
        .cloned()
        .collect();
    if existing.is_empty() {
        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(IpcError::Unavailable(format!(
            "daemon socket not found (tried: {tried})"
        )));
    }

    let read_timeout = read_timeout.unwrap_or_else(|| default_read_timeout(command));

    let mut request = serde_json::json!({"command": command});
    if let Some(extra) = extra.as_object() {
        for (key, value) in extra {
            request[key] = value.clone();
        }
    }

    let mut last_unavailable = None;
    for path in &existing {
        let mut stream = match IpcStream::connect(path).await {
            Ok(stream) => stream,
            Err(e @ IpcError::Unavailable(_)) => {
                last_unavailable = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        };

        stream
            .write_json_line(&request)
            .await
            .map_err(|e| IpcError::Protocol(format!("send failed: {e}")))?;

        return stream
            .read_json_response(MAX_RECORDER_RESPONSE_BYTES, read_timeout)
            .await;
    }

    Err(last_unavailable
        .unwrap_or_else(|| IpcError::Unavailable("could not connect to daemon".to_string())))
}

/// Best-effort daemon request.
///
/// - `Some(response)` on success, or `Some({"error": ...})` on a protocol
///   or timeout failure (the daemon was reached; do not fall back).
/// - `None` when the daemon is unavailable and the caller may fall back.
pub async fn try_send_request(
    command: &str,
    extra: Value,
    read_timeout: Option<Duration>,
) -> Option<Value> {
    match send_request(command, extra, None, read_timeout).await {
        Ok(response) => Some(response),
        Err(IpcError::Unavailable(_)) => None,
        Err(e) => Some(serde_json::json!({"error": e.to_string()})),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("voicepipe.sock");
        let listener = IpcListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let request = conn
                .read_json_line(MAX_RECORDER_RESPONSE_BYTES, Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(request["command"], "status");
            conn.write_json_line(&json!({"status": "idle", "pid": 42}))
                .await
                .unwrap();
        });

        let response = send_request("status", json!({}), Some(&socket), None)
            .await
            .unwrap();
        assert_eq!(response["status"], "idle");
        assert_eq!(response["pid"], 42);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_chunked_response_parses_like_atomic() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("chunked.sock");
        let listener = IpcListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let conn = listener.accept().await;
            let mut conn = conn.unwrap();
            let _ = conn
                .read_json_line(MAX_RECORDER_RESPONSE_BYTES, Duration::from_secs(1))
                .await;
            // Dribble the response out byte by byte.
            let payload = b"{\"status\": \"recording\", \"audio_file\": \"/tmp/a.wav\"}\n";
            let StreamInner::Unix(stream) = &mut conn.inner;
            for byte in payload {
                stream.write_all(&[*byte]).await.unwrap();
                stream.flush().await.unwrap();
            }
        });

        let response = send_request("status", json!({}), Some(&socket), None)
            .await
            .unwrap();
        assert_eq!(response["status"], "recording");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_socket_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("absent.sock");
        let err = send_request("status", json!({}), Some(&socket), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_oversize_response_is_protocol_error() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("big.sock");
        let listener = IpcListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let _ = conn
                .read_json_line(MAX_RECORDER_RESPONSE_BYTES, Duration::from_secs(1))
                .await;
            // An unterminated, unparseable flood larger than the cap.
            let junk = format!("{{\"data\": \"{}", "x".repeat(MAX_RECORDER_RESPONSE_BYTES + 10));
            let StreamInner::Unix(stream) = &mut conn.inner;
            let _ = stream.write_all(junk.as_bytes()).await;
            let _ = stream.flush().await;
            // Hold the connection open so EOF doesn't end the read early.
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let err = send_request("status", json!({}), Some(&socket), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Protocol(_)), "got {err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_streamed_lines_in_arbitrary_chunking() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("stream.sock");
        let listener = IpcListener::bind(&socket).unwrap();

        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut conn = listener.accept().await.unwrap();
            let _ = conn
                .read_json_line(MAX_TRANSCRIBER_LINE_BYTES, Duration::from_secs(1))
                .await;
            let payload = concat!(
                "{\"type\":\"transcription\",\"text\":\"hello \"}\n",
                "{\"type\":\"transcription\",\"text\":\"world\"}\n",
                "{\"type\":\"complete\"}\n",
            )
            .as_bytes()
            .to_vec();
            let StreamInner::Unix(stream) = &mut conn.inner;
            // Split at awkward boundaries.
            for piece in payload.chunks(7) {
                stream.write_all(piece).await.unwrap();
                stream.flush().await.unwrap();
            }
        });

        let mut stream = IpcStream::connect(&socket).await.unwrap();
        stream
            .write_json_line(&json!({"audio_file": "/tmp/x.wav"}))
            .await
            .unwrap();

        let mut text = String::new();
        loop {
            let line = stream
                .read_json_line(MAX_TRANSCRIBER_LINE_BYTES, Duration::from_secs(2))
                .await
                .unwrap()
                .expect("stream ended before complete");
            match line["type"].as_str() {
                Some("transcription") => text.push_str(line["text"].as_str().unwrap_or("")),
                Some("complete") => break,
                other => panic!("unexpected line type {other:?}"),
            }
        }
        assert_eq!(text, "hello world");
        server.await.unwrap();
    }
}
