//! WAV file input and output for the loopback harness.
//!
//! Input is mixed down to mono and resampled to the rate the caller asks
//! for; output is always 16-bit mono PCM.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rtp_ai_common::{samples_per_frame, Resampler};
use std::path::Path;
use tracing::info;

/// Mono PCM read from a WAV file, at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioData {
    // ---
    /// Mono PCM samples
    pub samples: Vec<i16>,

    /// Rate of `samples`
    pub sample_rate: u32,

    /// Sample rate of the file on disk
    pub original_sample_rate: u32,

    /// Channel count of the file on disk
    pub original_channels: u16,
}

impl AudioData {
    // ---
    /// Iterates over 20ms frames; the last one may be short.
    pub fn frames(&self) -> impl Iterator<Item = &[i16]> {
        // ---
        self.samples.chunks(samples_per_frame(self.sample_rate).max(1))
    }

    pub fn duration_secs(&self) -> f64 {
        // ---
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Number of 20ms frames, counting a short final frame.
    pub fn frame_count(&self) -> usize {
        // ---
        self.samples
            .len()
            .div_ceil(samples_per_frame(self.sample_rate).max(1))
    }
}

/// Reads a WAV file as mono PCM at `target_rate`.
///
/// # Arguments
///
/// * `path` - Path to the WAV file
/// * `target_rate` - Sample rate of the returned samples
///
/// # Errors
///
/// Returns error if the file cannot be opened or decoded, or uses a
/// sample format other than 16-bit integer or 32-bit float.
///
/// # Example
///
/// ```no_run
/// use bridge::wav::read_wav;
///
/// let audio = read_wav("caller.wav", 8000).unwrap();
/// println!("{} frames", audio.frame_count());
/// ```
pub fn read_wav<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<AudioData> {
    // ---
    let path = path.as_ref();
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    info!(
        "Reading {}: {}Hz, {} channels, {} bits",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 16-bit PCM samples")?,

        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 32-bit float samples")?,

        (format, bits) => bail!(
            "unsupported WAV sample format: {:?} {}-bit (16-bit PCM or 32-bit float only)",
            format,
            bits
        ),
    };

    let mono = mix_to_mono(&interleaved, spec.channels as usize);
    let samples = resample(&mono, spec.sample_rate, target_rate);

    info!(
        "Loaded {:.2}s of audio at {}Hz",
        samples.len() as f64 / target_rate.max(1) as f64,
        target_rate
    );

    Ok(AudioData {
        samples,
        sample_rate: target_rate,
        original_sample_rate: spec.sample_rate,
        original_channels: spec.channels,
    })
}

/// Writes mono 16-bit PCM.
///
/// # Errors
///
/// Returns error if the file cannot be created or written.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[i16], sample_rate: u32) -> Result<()> {
    // ---
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create WAV file: {}", path.display()))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize {}", path.display()))?;

    info!(
        "Wrote {} ({} samples at {}Hz)",
        path.display(),
        samples.len(),
        sample_rate
    );
    Ok(())
}

/// Averages interleaved channels into one.
fn mix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    // ---
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
        .collect()
}

/// One-shot conversion of a whole recording.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    // ---
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    Resampler::new().convert_len(samples, from_rate, to_rate, out_len)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_mix_to_mono() {
        // ---
        assert_eq!(mix_to_mono(&[100, 200, 300, 400, 500, 600], 2), vec![150, 350, 550]);
        assert_eq!(mix_to_mono(&[100, 200, 300, 400], 4), vec![250]);
        assert_eq!(mix_to_mono(&[1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_resample_length() {
        // ---
        assert_eq!(resample(&[0; 441], 44100, 8000).len(), 80);
        assert_eq!(resample(&[0; 160], 8000, 16000).len(), 320);
        assert_eq!(resample(&[7; 5], 16000, 16000), vec![7; 5]);
    }

    #[test]
    fn test_frames_cover_all_samples() {
        // ---
        let audio = AudioData {
            samples: vec![0; 500],
            sample_rate: 16000,
            original_sample_rate: 16000,
            original_channels: 1,
        };

        assert_eq!(audio.frame_count(), 2);
        let frames: Vec<_> = audio.frames().collect();
        assert_eq!(frames[0].len(), 320);
        assert_eq!(frames[1].len(), 180);
        assert!((audio.duration_secs() - 500.0 / 16000.0).abs() < 1e-9);
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        // ---
        let path = std::env::temp_dir().join(format!("bridge-wav-{}.wav", std::process::id()));
        let samples: Vec<i16> = (0..800).map(|i| (i * 40 - 16000) as i16).collect();

        write_wav(&path, &samples, 8000).unwrap();
        let audio = read_wav(&path, 8000).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(audio.samples, samples);
        assert_eq!(audio.original_channels, 1);
    }
}
