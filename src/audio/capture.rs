//! Audio capture engine.
//!
//! Owns the open input stream and the artifact file for exactly one
//! recording. cpal streams are not Send, so the stream lives on a
//! dedicated thread; the audio callback stays non-blocking by pushing
//! chunks into a bounded queue (drops are counted and logged, never
//! silent).
//!
//! Two artifact modes: WAV (samples buffered in memory, written by the
//! caller via `save_wav`) and MP3 (an attached ffmpeg subprocess encodes
//! PCM from its stdin straight into the output file).

use crate::audio::device::{device_at, AudioSelection};
use crate::error::AudioError;
use cpal::traits::{DeviceTrait, StreamTrait};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

const QUEUE_DEPTH: usize = 64;
const ENCODER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Wav,
    Mp3,
}

struct StopRequest {
    discard: bool,
    reply: SyncSender<CaptureOutcome>,
}

struct CaptureOutcome {
    samples: Option<Vec<i16>>,
    error: Option<String>,
    dropped_chunks: u64,
}

/// One live capture. Dropping without `stop`/`cancel` tears the stream
/// down and abandons the artifact.
pub struct CaptureEngine {
    selection: AudioSelection,
    output_path: PathBuf,
    mode: CaptureMode,
    cmd_tx: SyncSender<StopRequest>,
    thread: Option<std::thread::JoinHandle<()>>,
    started: Instant,
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn spawn_encoder(
    output: &Path,
    sample_rate: u32,
    channels: u16,
) -> std::io::Result<std::process::Child> {
    std::process::Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "s16le",
            "-ar",
            &sample_rate.to_string(),
            "-ac",
            &channels.to_string(),
            "-i",
            "-",
            "-codec:a",
            "libmp3lame",
            "-qscale:a",
            "2",
        ])
        .arg(output)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
}

fn wait_with_deadline(child: &mut std::process::Child, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(_) => return true,
        }
    }
    false
}

#[cfg(unix)]
fn terminate(child: &std::process::Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(child: &std::process::Child) {
    let _ = child;
}

/// Flush-then-terminate-then-kill, one second of grace per step.
fn finish_encoder(mut child: std::process::Child) -> std::io::Result<()> {
    drop(child.stdin.take());
    if wait_with_deadline(&mut child, ENCODER_GRACE) {
        return Ok(());
    }
    terminate(&child);
    if wait_with_deadline(&mut child, ENCODER_GRACE) {
        return Ok(());
    }
    let _ = child.kill();
    let _ = child.wait();
    Ok(())
}

fn build_capture_stream(
    device: &cpal::Device,
    selection: &AudioSelection,
    chunk_tx: SyncSender<Vec<i16>>,
    dropped: Arc<AtomicU64>,
) -> std::result::Result<cpal::Stream, AudioError> {
    let config = cpal::StreamConfig {
        channels: selection.channel_count,
        sample_rate: cpal::SampleRate(selection.sample_rate_hz),
        buffer_size: cpal::BufferSize::Default,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    let err_fn = |err| tracing::error!("Audio stream error: {}", err);

    // The callback runs on the audio thread: convert, try_send, never block.
    macro_rules! push_chunk {
        ($tx:expr, $dropped:expr, $chunk:expr) => {
            match $tx.try_send($chunk) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    $dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        };
    }

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            let tx = chunk_tx;
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let chunk: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    push_chunk!(tx, dropped, chunk);
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let tx = chunk_tx;
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    push_chunk!(tx, dropped, data.to_vec());
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let tx = chunk_tx;
            device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let chunk: Vec<i16> =
                        data.iter().map(|&s| (s as i32 - 32_768) as i16).collect();
                    push_chunk!(tx, dropped, chunk);
                },
                err_fn,
                None,
            )
        }
        format => {
            return Err(AudioError::Stream(format!(
                "unsupported sample format: {format:?}"
            )))
        }
    }
    .map_err(|e| AudioError::Stream(e.to_string()))?;

    Ok(stream)
}

struct CaptureWorker {
    chunk_rx: Receiver<Vec<i16>>,
    cmd_rx: Receiver<StopRequest>,
    dropped: Arc<AtomicU64>,
    mode: CaptureMode,
    encoder: Option<std::process::Child>,
    samples: Vec<i16>,
    error: Option<String>,
    max_duration: Option<Duration>,
    started: Instant,
}

impl CaptureWorker {
    fn consume(&mut self, chunk: Vec<i16>) {
        match self.mode {
            CaptureMode::Wav => self.samples.extend_from_slice(&chunk),
            CaptureMode::Mp3 => {
                let Some(encoder) = self.encoder.as_mut() else { return };
                let Some(stdin) = encoder.stdin.as_mut() else { return };
                let mut bytes = Vec::with_capacity(chunk.len() * 2);
                for sample in chunk {
                    bytes.extend_from_slice(&sample.to_le_bytes());
                }
                if let Err(e) = stdin.write_all(&bytes) {
                    // A dead encoder fails the capture; the partial file is
                    // preserved by the caller.
                    if self.error.is_none() {
                        self.error = Some(format!("encoder write failed: {e}"));
                        tracing::error!("MP3 encoder died mid-capture: {}", e);
                    }
                }
            }
        }
    }

    fn run(mut self, stream: cpal::Stream) {
        let mut stream = Some(stream);

        let stop = loop {
            if let Ok(stop) = self.cmd_rx.try_recv() {
                break stop;
            }

            if let Some(max) = self.max_duration {
                if self.started.elapsed() >= max && stream.is_some() {
                    tracing::warn!(
                        "Recording reached the {}s cap, closing the stream",
                        max.as_secs()
                    );
                    drop(stream.take());
                }
            }

            match self.chunk_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(chunk) => self.consume(chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Stream gone; wait for the stop command.
                    match self.cmd_rx.recv() {
                        Ok(stop) => break stop,
                        Err(_) => return,
                    }
                }
            }
        };

        drop(stream);
        // Drain whatever the callback enqueued before the stream closed.
        while let Ok(chunk) = self.chunk_rx.try_recv() {
            self.consume(chunk);
        }

        if let Some(encoder) = self.encoder.take() {
            if let Err(e) = finish_encoder(encoder) {
                if self.error.is_none() {
                    self.error = Some(format!("encoder shutdown failed: {e}"));
                }
            }
        }

        let dropped_chunks = self.dropped.load(Ordering::Relaxed);
        if dropped_chunks > 0 {
            tracing::warn!("Audio queue overflowed; dropped {} chunks", dropped_chunks);
        }

        let outcome = CaptureOutcome {
            samples: match self.mode {
                CaptureMode::Wav if !stop.discard => Some(std::mem::take(&mut self.samples)),
                _ => None,
            },
            error: self.error.take(),
            dropped_chunks,
        };
        let _ = stop.reply.send(outcome);
    }
}

impl CaptureEngine {
    /// Open the stream and begin capturing into `output_path`.
    pub fn start(
        selection: AudioSelection,
        output_path: &Path,
        mode: CaptureMode,
        max_duration: Option<Duration>,
    ) -> std::result::Result<Self, AudioError> {
        let device = device_at(selection.device_id)?;

        let (chunk_tx, chunk_rx) = sync_channel::<Vec<i16>>(QUEUE_DEPTH);
        let (cmd_tx, cmd_rx) = sync_channel::<StopRequest>(1);
        let dropped = Arc::new(AtomicU64::new(0));

        let encoder = match mode {
            CaptureMode::Mp3 => Some(
                spawn_encoder(output_path, selection.sample_rate_hz, selection.channel_count)
                    .map_err(|e| AudioError::EncoderDied(format!("cannot spawn ffmpeg: {e}")))?,
            ),
            CaptureMode::Wav => None,
        };

        let worker = CaptureWorker {
            chunk_rx,
            cmd_rx,
            dropped: dropped.clone(),
            mode,
            encoder,
            samples: Vec::new(),
            error: None,
            max_duration,
            started: Instant::now(),
        };

        // The stream must be created on the thread that polls it: cpal
        // streams are !Send.
        let thread_selection = selection;
        let (ready_tx, ready_rx) = sync_channel::<std::result::Result<(), AudioError>>(1);
        let thread = std::thread::spawn(move || {
            let stream = match build_capture_stream(&device, &thread_selection, chunk_tx, dropped)
            {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::Stream(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            worker.run(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::Stream("capture thread died on startup".into()))
            }
        }

        tracing::info!(
            "Capture started: device {} @ {}Hz/{}ch -> {:?} ({:?})",
            selection.device_id,
            selection.sample_rate_hz,
            selection.channel_count,
            output_path,
            mode
        );

        Ok(CaptureEngine {
            selection,
            output_path: output_path.to_path_buf(),
            mode,
            cmd_tx,
            thread: Some(thread),
            started: Instant::now(),
        })
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn selection(&self) -> &AudioSelection {
        &self.selection
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn shutdown(&mut self, discard: bool) -> std::result::Result<CaptureOutcome, AudioError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.cmd_tx
            .send(StopRequest {
                discard,
                reply: reply_tx,
            })
            .map_err(|_| AudioError::Stream("capture thread already gone".into()))?;
        let outcome = reply_rx
            .recv()
            .map_err(|_| AudioError::Stream("capture thread died".into()))?;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(outcome)
    }

    /// Stop capturing. In WAV mode the raw PCM comes back for `save_wav`;
    /// in MP3 mode the encoder already wrote the file and `None` returns.
    pub fn stop(mut self) -> std::result::Result<Option<Vec<i16>>, AudioError> {
        let outcome = self.shutdown(false)?;
        if let Some(error) = outcome.error {
            return Err(AudioError::EncoderDied(error));
        }
        if outcome.dropped_chunks > 0 {
            tracing::warn!(
                "Capture finished with {} dropped chunks",
                outcome.dropped_chunks
            );
        }
        Ok(outcome.samples)
    }

    /// Stop capturing and delete the artifact.
    pub fn cancel(mut self) -> std::result::Result<(), AudioError> {
        let _ = self.shutdown(true)?;
        if self.output_path.exists() {
            let _ = std::fs::remove_file(&self.output_path);
        }
        Ok(())
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.shutdown(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(-2.5), -i16::MAX);
    }

    #[test]
    fn test_wait_with_deadline_on_finished_child() {
        let mut child = if cfg!(windows) {
            std::process::Command::new("cmd").args(["/C", "exit 0"]).spawn()
        } else {
            std::process::Command::new("true").spawn()
        }
        .unwrap();
        assert!(wait_with_deadline(&mut child, Duration::from_secs(2)));
    }

    #[cfg(unix)]
    #[test]
    fn test_finish_encoder_terminates_stubborn_child() {
        // A cat reading stdin exits when the pipe closes.
        let child = std::process::Command::new("cat")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();
        finish_encoder(child).unwrap();
    }
}
