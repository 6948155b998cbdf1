//! Audio input: device resolution and capture.
//!
//! `device` picks a working input device (env/config/cache/probe ladder),
//! `capture` owns the open input stream and writes the artifact file,
//! `wav` holds the PCM WAV helpers shared by both.

pub mod capture;
pub mod device;
pub mod wav;

pub use capture::{CaptureEngine, CaptureMode};
pub use device::{resolve_input_device, AudioSelection, DeviceCacheEntry, DeviceSource};

/// Sample rates voicepipe will request from a device, in preference order.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[48000, 44100, 24000, 22050, 16000];

/// Max recording length safety cap (seconds); `None` disables it.
pub const DEFAULT_MAX_DURATION_SECS: u64 = 300;
