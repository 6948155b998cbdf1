//! Audio input device selection.
//!
//! Picking "the microphone" is the least portable part of dictation. The
//! resolver walks a ladder of increasingly desperate options:
//!
//! 1. `VOICEPIPE_DEVICE` env override (index, name, or `pulse:<source>`),
//!    strict: a named device that does not exist is a hard error.
//! 2. Device from the config files (same formats).
//! 3. Pulse/PipeWire source preference (`VOICEPIPE_PULSE_SOURCE`).
//! 4. The system default input.
//! 5. A cached previous selection, re-validated with a short probe.
//! 6. Auto-probe: open every input-capable device at a ladder of
//!    sample-rate/channel pairs and pick the first that hears anything.
//!
//! Successful resolutions are cached in the state dir so the next hotkey
//! press skips the probing.

use crate::audio::SUPPORTED_SAMPLE_RATES;
use crate::error::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Max-abs amplitude (normalized to [0, 1]) below which a probe window is
/// considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.003;

const PROBE_WINDOW: Duration = Duration::from_millis(300);
const PREFERRED_NAME_TOKENS: &[&str] = &["default", "pulse", "pipewire"];

/// A validated audio input selection. `device_id` is the index into the
/// host's input device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSelection {
    pub device_id: usize,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
}

/// Where a selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSource {
    Auto,
    Manual,
    Config,
    Cache,
    Fallback,
}

/// Persisted device choice, re-validated on every resolve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCacheEntry {
    #[serde(flatten)]
    pub selection: AudioSelection,
    pub device_name: String,
    pub source: DeviceSource,
    pub last_ok: String,
}

/// Parsed `VOICEPIPE_DEVICE` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    Index(usize),
    Name(String),
    /// `pulse` or `pulse:<source>`; the source pins `PULSE_SOURCE`.
    Pulse(Option<String>),
}

pub fn parse_device_spec(spec: &str) -> Option<DeviceSpec> {
    let value = spec.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(index) = value.parse::<usize>() {
        return Some(DeviceSpec::Index(index));
    }
    let lower = value.to_lowercase();
    if lower == "pulse" {
        return Some(DeviceSpec::Pulse(None));
    }
    if let Some(source) = lower.strip_prefix("pulse:") {
        let source = source.trim();
        return Some(DeviceSpec::Pulse(
            (!source.is_empty()).then(|| source.to_string()),
        ));
    }
    Some(DeviceSpec::Name(value.to_string()))
}

pub fn device_cache_path() -> PathBuf {
    crate::paths::state_dir(false).join("device-cache.json")
}

pub fn read_device_cache() -> Option<DeviceCacheEntry> {
    read_device_cache_from(&device_cache_path())
}

pub fn read_device_cache_from(path: &Path) -> Option<DeviceCacheEntry> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn write_device_cache(entry: &DeviceCacheEntry) {
    write_device_cache_to(&device_cache_path(), entry);
}

pub fn write_device_cache_to(path: &Path, entry: &DeviceCacheEntry) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(body) = serde_json::to_string_pretty(entry) else {
        return;
    };
    let tmp = path.with_extension("json.tmp");
    if std::fs::write(&tmp, body).is_ok() {
        if let Err(e) = std::fs::rename(&tmp, path) {
            tracing::warn!("Failed to update device cache {:?}: {}", path, e);
            let _ = std::fs::remove_file(&tmp);
        }
    }
}

pub fn reset_device_cache() {
    let _ = std::fs::remove_file(device_cache_path());
}

fn fresh_cache_entry(
    selection: AudioSelection,
    device_name: &str,
    source: DeviceSource,
) -> DeviceCacheEntry {
    DeviceCacheEntry {
        selection,
        device_name: device_name.to_string(),
        source,
        last_ok: chrono::Local::now().to_rfc3339(),
    }
}

/// Enumerate input-capable devices as `(index, name)` pairs.
pub fn list_input_devices() -> std::result::Result<Vec<(usize, String)>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    Ok(devices
        .enumerate()
        .map(|(idx, device)| (idx, device.name().unwrap_or_else(|_| idx.to_string())))
        .collect())
}

pub(crate) fn device_at(index: usize) -> std::result::Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .collect();
    let count = devices.len();
    devices
        .into_iter()
        .nth(index)
        .ok_or(AudioError::DeviceIndexOutOfRange(index, count))
}

/// Find the first input device matching a name: exact first, then
/// case-insensitive, then substring.
pub fn match_device_by_name(name: &str) -> Option<usize> {
    let devices = list_input_devices().ok()?;
    let needle = name.to_lowercase();

    devices
        .iter()
        .find(|(_, n)| n == name)
        .or_else(|| devices.iter().find(|(_, n)| n.to_lowercase() == needle))
        .or_else(|| devices.iter().find(|(_, n)| n.to_lowercase().contains(&needle)))
        .map(|(idx, _)| *idx)
}

/// Order device indices for auto-probing: names containing `default`,
/// `pulse`, or `pipewire` first, then everything else in enumeration order.
pub fn probe_order(devices: &[(usize, String)]) -> Vec<usize> {
    let mut ordered = Vec::new();
    for token in PREFERRED_NAME_TOKENS {
        for (idx, name) in devices {
            if name.to_lowercase().contains(token) && !ordered.contains(idx) {
                ordered.push(*idx);
            }
        }
    }
    for (idx, _) in devices {
        if !ordered.contains(idx) {
            ordered.push(*idx);
        }
    }
    ordered
}

/// The sample-rate/channel ladder tried against each candidate device.
pub fn rate_channel_ladder(
    rate_hint: Option<u32>,
    channel_hint: Option<u16>,
) -> Vec<(u32, u16)> {
    let mut rates: Vec<u32> = Vec::new();
    if let Some(rate) = rate_hint {
        rates.push(rate);
    }
    for &rate in SUPPORTED_SAMPLE_RATES {
        if !rates.contains(&rate) {
            rates.push(rate);
        }
    }

    let mut channels: Vec<u16> = Vec::new();
    if let Some(ch) = channel_hint.filter(|&c| c > 0) {
        channels.push(ch);
    }
    if !channels.contains(&1) {
        channels.push(1);
    }

    let mut ladder = Vec::new();
    for &rate in &rates {
        for &ch in &channels {
            ladder.push((rate, ch));
        }
    }
    ladder
}

fn max_abs_from_f32(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

struct PeakMeter(Arc<AtomicU32>);

impl PeakMeter {
    fn new() -> (Self, Arc<AtomicU32>) {
        let shared = Arc::new(AtomicU32::new(0));
        (PeakMeter(shared.clone()), shared)
    }

    fn observe(&self, amplitude: f32) {
        let bits = amplitude.to_bits();
        // Monotonic max; f32 bit patterns of non-negative floats order
        // correctly as integers.
        self.0.fetch_max(bits, Ordering::Relaxed);
    }
}

/// Open a device briefly and report the loudest normalized sample seen.
pub fn probe_device(
    device_id: usize,
    sample_rate: u32,
    channels: u16,
    window: Duration,
) -> std::result::Result<f32, AudioError> {
    let device = device_at(device_id)?;
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (meter, shared) = PeakMeter::new();
    let err_fn = |err| tracing::debug!("Probe stream error: {}", err);

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Connection(e.to_string()))?;

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| meter.observe(max_abs_from_f32(data)),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let peak = data
                    .iter()
                    .fold(0.0f32, |acc, &s| acc.max((s as f32 / i16::MAX as f32).abs()));
                meter.observe(peak);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _| {
                let peak = data.iter().fold(0.0f32, |acc, &s| {
                    acc.max(((s as f32 - 32768.0) / 32768.0).abs())
                });
                meter.observe(peak);
            },
            err_fn,
            None,
        ),
        format => {
            return Err(AudioError::Stream(format!(
                "unsupported sample format: {format:?}"
            )))
        }
    }
    .map_err(|e| AudioError::Stream(e.to_string()))?;

    stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
    std::thread::sleep(window);
    drop(stream);

    Ok(f32::from_bits(shared.load(Ordering::Relaxed)))
}

/// Verify a selection opens at all (no amplitude requirement).
fn test_open(selection: &AudioSelection) -> std::result::Result<(), AudioError> {
    probe_device(
        selection.device_id,
        selection.sample_rate_hz,
        selection.channel_count,
        Duration::from_millis(50),
    )
    .map(|_| ())
}

fn open_with_ladder(
    device_id: usize,
    rate_hint: Option<u32>,
    channel_hint: Option<u16>,
) -> std::result::Result<AudioSelection, AudioError> {
    let mut last_err = None;
    for (rate, channels) in rate_channel_ladder(rate_hint, channel_hint) {
        let selection = AudioSelection {
            device_id,
            sample_rate_hz: rate,
            channel_count: channels,
        };
        match test_open(&selection) {
            Ok(()) => return Ok(selection),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or(AudioError::NoWorkingDevice))
}

fn pin_pulse_source(source: &str) {
    tracing::info!("Pinning PULSE_SOURCE={}", source);
    std::env::set_var("PULSE_SOURCE", source);
}

fn resolve_spec(
    spec: &DeviceSpec,
    source: DeviceSource,
    rate_hint: Option<u32>,
    channel_hint: Option<u16>,
) -> std::result::Result<(AudioSelection, DeviceSource), AudioError> {
    match spec {
        DeviceSpec::Index(index) => {
            let selection = open_with_ladder(*index, rate_hint, channel_hint)?;
            Ok((selection, source))
        }
        DeviceSpec::Name(name) => {
            let index =
                match_device_by_name(name).ok_or_else(|| AudioError::DeviceNotFound(name.clone()))?;
            Ok((open_with_ladder(index, rate_hint, channel_hint)?, source))
        }
        DeviceSpec::Pulse(pulse_source) => {
            if let Some(src) = pulse_source {
                pin_pulse_source(src);
            }
            let index = match_device_by_name("pulse")
                .ok_or_else(|| AudioError::DeviceNotFound("pulse".to_string()))?;
            Ok((open_with_ladder(index, rate_hint, channel_hint)?, source))
        }
    }
}

/// Resolve an explicit device spec (request or env override), strictly:
/// a device that cannot be found or opened is an error, not a fallback.
pub fn resolve_device_spec(
    spec: &DeviceSpec,
    rate_hint: Option<u32>,
    channel_hint: Option<u16>,
) -> std::result::Result<AudioSelection, AudioError> {
    let (selection, _) = resolve_spec(spec, DeviceSource::Manual, rate_hint, channel_hint)?;
    Ok(selection)
}

fn device_name_for(index: usize) -> String {
    list_input_devices()
        .ok()
        .and_then(|devices| devices.into_iter().find(|(idx, _)| *idx == index))
        .map(|(_, name)| name)
        .unwrap_or_else(|| index.to_string())
}

/// Resolve a working input device, walking the preference ladder.
///
/// The winning selection is written back to the device cache with a fresh
/// `last_ok` timestamp.
pub fn resolve_input_device(
    rate_hint: Option<u32>,
    channel_hint: Option<u16>,
) -> std::result::Result<(AudioSelection, DeviceSource), AudioError> {
    let rate_hint = rate_hint.or_else(crate::config::audio_sample_rate_hint);
    let channel_hint = channel_hint.or_else(crate::config::audio_channels_hint);

    // 1. Explicit env override: failures are fatal, the user asked for it.
    if let Ok(raw) = std::env::var("VOICEPIPE_DEVICE") {
        if let Some(spec) = parse_device_spec(&raw) {
            let (selection, source) =
                resolve_spec(&spec, DeviceSource::Manual, rate_hint, channel_hint)?;
            remember(selection, source);
            return Ok((selection, source));
        }
    }

    // 2. Config-file device, same strictness.
    if let Some(raw) = crate::config::device_preference() {
        if let Some(spec) = parse_device_spec(&raw) {
            let (selection, source) =
                resolve_spec(&spec, DeviceSource::Config, rate_hint, channel_hint)?;
            remember(selection, source);
            return Ok((selection, source));
        }
    }

    // 3. Pulse source preference: pin the source, then open the pulse
    //    virtual device. Best-effort from here down.
    if let Some(source) = crate::config::pulse_source_preference() {
        pin_pulse_source(&source);
        if let Some(index) = match_device_by_name("pulse") {
            if let Ok(selection) = open_with_ladder(index, rate_hint, channel_hint) {
                remember(selection, DeviceSource::Auto);
                return Ok((selection, DeviceSource::Auto));
            }
        }
    } else {
        // No voicepipe preference: never inherit a stale PULSE_SOURCE.
        std::env::remove_var("PULSE_SOURCE");
    }

    // 4. System default input.
    if let Some(index) = default_input_index() {
        if let Ok(selection) = open_with_ladder(index, rate_hint, channel_hint) {
            remember(selection, DeviceSource::Auto);
            return Ok((selection, DeviceSource::Auto));
        }
    }

    // 5. Cache, re-validated with an amplitude probe.
    if let Some(entry) = read_device_cache() {
        let sel = entry.selection;
        if let Ok(peak) = probe_device(sel.device_id, sel.sample_rate_hz, sel.channel_count, PROBE_WINDOW)
        {
            if peak > SILENCE_THRESHOLD {
                remember(sel, DeviceSource::Cache);
                return Ok((sel, DeviceSource::Cache));
            }
            tracing::debug!(
                "Cached device {} probed silent (peak {:.4}), re-probing",
                sel.device_id,
                peak
            );
        }
    }

    // 6. Auto-probe everything.
    auto_probe(rate_hint, channel_hint)
}

fn default_input_index() -> Option<usize> {
    let host = cpal::default_host();
    let default_name = host.default_input_device()?.name().ok()?;
    match_device_by_name(&default_name)
}

fn remember(selection: AudioSelection, source: DeviceSource) {
    let name = device_name_for(selection.device_id);
    write_device_cache(&fresh_cache_entry(selection, &name, source));
}

fn auto_probe(
    rate_hint: Option<u32>,
    channel_hint: Option<u16>,
) -> std::result::Result<(AudioSelection, DeviceSource), AudioError> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        return Err(AudioError::NoWorkingDevice);
    }

    let mut best: Option<(f32, AudioSelection)> = None;

    for index in probe_order(&devices) {
        for (rate, channels) in rate_channel_ladder(rate_hint, channel_hint) {
            let selection = AudioSelection {
                device_id: index,
                sample_rate_hz: rate,
                channel_count: channels,
            };
            let peak = match probe_device(index, rate, channels, PROBE_WINDOW) {
                Ok(peak) => peak,
                Err(e) => {
                    tracing::debug!("Device {} @ {}Hz/{}ch failed: {}", index, rate, channels, e);
                    continue;
                }
            };
            tracing::debug!(
                "Device {} ({}) @ {}Hz/{}ch peak {:.4}",
                index,
                device_name_for(index),
                rate,
                channels,
                peak
            );
            if peak > SILENCE_THRESHOLD {
                remember(selection, DeviceSource::Auto);
                return Ok((selection, DeviceSource::Auto));
            }
            if best.as_ref().map(|(b, _)| peak > *b).unwrap_or(true) {
                best = Some((peak, selection));
            }
            // First openable config per device is enough for scoring.
            break;
        }
    }

    match best {
        Some((_, selection)) => {
            remember(selection, DeviceSource::Fallback);
            Ok((selection, DeviceSource::Fallback))
        }
        None => Err(AudioError::NoWorkingDevice),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_spec() {
        assert_eq!(parse_device_spec("7"), Some(DeviceSpec::Index(7)));
        assert_eq!(
            parse_device_spec(" USB Microphone "),
            Some(DeviceSpec::Name("USB Microphone".to_string()))
        );
        assert_eq!(parse_device_spec("pulse"), Some(DeviceSpec::Pulse(None)));
        assert_eq!(
            parse_device_spec("pulse:alsa_input.usb-mic"),
            Some(DeviceSpec::Pulse(Some("alsa_input.usb-mic".to_string())))
        );
        assert_eq!(parse_device_spec("pulse:"), Some(DeviceSpec::Pulse(None)));
        assert_eq!(parse_device_spec("   "), None);
    }

    #[test]
    fn test_probe_order_prefers_virtual_devices() {
        let devices = vec![
            (0, "HDA Intel PCH".to_string()),
            (1, "pipewire".to_string()),
            (2, "pulse".to_string()),
            (3, "default".to_string()),
            (4, "USB Mic".to_string()),
        ];
        assert_eq!(probe_order(&devices), vec![3, 2, 1, 0, 4]);
    }

    #[test]
    fn test_rate_channel_ladder_puts_hint_first() {
        let ladder = rate_channel_ladder(Some(16_000), Some(2));
        assert_eq!(ladder[0], (16_000, 2));
        assert_eq!(ladder[1], (16_000, 1));
        // Hint rate is not repeated later in the ladder.
        assert_eq!(ladder.iter().filter(|(r, c)| *r == 16_000 && *c == 2).count(), 1);
        // All supported rates are present.
        for &rate in SUPPORTED_SAMPLE_RATES {
            assert!(ladder.iter().any(|(r, _)| *r == rate));
        }
    }

    #[test]
    fn test_rate_channel_ladder_defaults_to_mono() {
        let ladder = rate_channel_ladder(None, None);
        assert!(ladder.iter().all(|(_, c)| *c == 1));
        assert_eq!(ladder[0].0, SUPPORTED_SAMPLE_RATES[0]);
    }

    #[test]
    fn test_device_cache_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("device-cache.json");
        let entry = DeviceCacheEntry {
            selection: AudioSelection {
                device_id: 3,
                sample_rate_hz: 48_000,
                channel_count: 1,
            },
            device_name: "pipewire".to_string(),
            source: DeviceSource::Auto,
            last_ok: "2026-07-01T10:00:00+00:00".to_string(),
        };

        write_device_cache_to(&path, &entry);
        let loaded = read_device_cache_from(&path).unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn test_corrupt_device_cache_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("device-cache.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(read_device_cache_from(&path).is_none());
    }

    #[test]
    fn test_device_source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DeviceSource::Manual).unwrap(),
            "\"manual\""
        );
        assert_eq!(
            serde_json::from_str::<DeviceSource>("\"fallback\"").unwrap(),
            DeviceSource::Fallback
        );
    }
}
