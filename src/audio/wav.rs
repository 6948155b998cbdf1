//! Small WAV helpers built on hound.
//!
//! Artifacts are canonical RIFF/WAVE, format code 1 (PCM), int16 LE.

use crate::error::AudioError;
use std::path::Path;

/// Write interleaved i16 PCM samples as a canonical WAV file.
pub fn save_wav(
    path: &Path,
    pcm: &[i16],
    sample_rate: u32,
    channels: u16,
) -> std::result::Result<(), AudioError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| AudioError::Wav(e.to_string()))?;
    let mut i16_writer = writer.get_i16_writer(pcm.len() as u32);
    for &sample in pcm {
        i16_writer.write_sample(sample);
    }
    i16_writer
        .flush()
        .map_err(|e| AudioError::Wav(e.to_string()))?;
    writer.finalize().map_err(|e| AudioError::Wav(e.to_string()))?;
    Ok(())
}

/// Return duration in seconds for a WAV file, or None if unreadable.
pub fn read_wav_duration_s(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_roundtrip_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tone.wav");

        // One second of mono audio at 16 kHz.
        let rate = 16_000u32;
        let pcm: Vec<i16> = (0..rate)
            .map(|i| ((i as f32 * 0.05).sin() * 12_000.0) as i16)
            .collect();

        save_wav(&path, &pcm, rate, 1).unwrap();
        let duration = read_wav_duration_s(&path).unwrap();
        assert!((duration - 1.0).abs() < f64::EPSILON);

        // Header sanity: RIFF/WAVE magic, 44-byte header for plain PCM.
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + pcm.len() * 2);
    }

    #[test]
    fn test_wav_roundtrip_stereo() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stereo.wav");

        let rate = 48_000u32;
        let frames = 24_000usize; // half a second
        let pcm = vec![0i16; frames * 2];

        save_wav(&path, &pcm, rate, 2).unwrap();
        let duration = read_wav_duration_s(&path).unwrap();
        assert!((duration - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unreadable_wav_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("not-a-wav.wav");
        std::fs::write(&path, b"definitely not RIFF").unwrap();
        assert!(read_wav_duration_s(&path).is_none());
        assert!(read_wav_duration_s(&tmp.path().join("missing.wav")).is_none());
    }
}
