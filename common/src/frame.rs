//! Fixed-duration PCM frames.
//!
//! Every DSP stage in the bridge works on 20ms frames of mono 16-bit PCM.
//! The helpers here keep the "exactly 20ms" invariant in one place.

/// Frame duration in milliseconds
pub const FRAME_DURATION_MS: u32 = 20;

/// Frames per second at the fixed frame duration
pub const FRAMES_PER_SECOND: u32 = 1000 / FRAME_DURATION_MS;

/// Returns the number of samples in one 20ms frame at `sample_rate`.
///
/// 160 @ 8kHz, 320 @ 16kHz, 480 @ 24kHz, 960 @ 48kHz.
pub const fn samples_per_frame(sample_rate: u32) -> usize {
    // ---
    (sample_rate / FRAMES_PER_SECOND) as usize
}

/// One 20ms block of mono PCM16 audio at a known sample rate.
///
/// The sample count always equals `samples_per_frame(sample_rate)`;
/// constructors pad short input with zeros and truncate long input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    // ---
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmFrame {
    // ---
    /// Creates a frame of digital silence.
    pub fn silence(sample_rate: u32) -> Self {
        // ---
        Self {
            samples: vec![0; samples_per_frame(sample_rate)],
            sample_rate,
        }
    }

    /// Builds a frame from samples, zero-padding or truncating to 20ms.
    pub fn from_samples(mut samples: Vec<i16>, sample_rate: u32) -> Self {
        // ---
        samples.resize(samples_per_frame(sample_rate), 0);
        Self {
            samples,
            sample_rate,
        }
    }

    /// Builds a frame from little-endian PCM16 bytes.
    ///
    /// A trailing odd byte is ignored; missing samples are zero.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        // ---
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_samples(samples, sample_rate)
    }

    /// Serializes the frame as little-endian PCM16.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        // ---
        samples_to_le_bytes(&self.samples)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the peak absolute sample value.
    pub fn peak(&self) -> i32 {
        // ---
        peak(&self.samples)
    }

    /// Returns the root-mean-square level in sample units.
    pub fn rms(&self) -> f32 {
        // ---
        rms(&self.samples)
    }
}

/// Serializes samples as little-endian PCM16.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    // ---
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Peak absolute value of a sample slice.
pub fn peak(samples: &[i16]) -> i32 {
    // ---
    samples
        .iter()
        .map(|&s| (s as i32).abs())
        .max()
        .unwrap_or(0)
}

/// Root-mean-square level of a sample slice.
pub fn rms(samples: &[i16]) -> f32 {
    // ---
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Pads with the last sample (or truncates) so `samples` has exactly `len` entries.
///
/// Holding the last value avoids the step a zero pad would introduce in
/// the middle of a waveform.
pub fn fit_to_len(samples: &mut Vec<i16>, len: usize) {
    // ---
    let hold = samples.last().copied().unwrap_or(0);
    samples.resize(len, hold);
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_samples_per_frame_for_supported_rates() {
        // ---
        assert_eq!(samples_per_frame(8000), 160);
        assert_eq!(samples_per_frame(16000), 320);
        assert_eq!(samples_per_frame(24000), 480);
        assert_eq!(samples_per_frame(48000), 960);
    }

    #[test]
    fn test_short_bytes_are_zero_padded() {
        // ---
        let bytes = [0x10, 0x00, 0xFF, 0xFF, 0x7F];
        let frame = PcmFrame::from_le_bytes(&bytes, 8000);

        assert_eq!(frame.samples().len(), 160);
        assert_eq!(frame.samples()[0], 16);
        assert_eq!(frame.samples()[1], -1);
        assert!(frame.samples()[2..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_le_bytes_roundtrip_preserves_extremes() {
        // ---
        let mut samples = vec![0i16; 320];
        samples[0] = i16::MIN;
        samples[319] = i16::MAX;
        let frame = PcmFrame::from_samples(samples.clone(), 16000);

        let restored = PcmFrame::from_le_bytes(&frame.to_le_bytes(), 16000);
        assert_eq!(restored.samples(), samples.as_slice());
    }

    #[test]
    fn test_fit_to_len_holds_last_sample() {
        // ---
        let mut samples = vec![1, 2, 3];
        fit_to_len(&mut samples, 5);
        assert_eq!(samples, vec![1, 2, 3, 3, 3]);

        fit_to_len(&mut samples, 2);
        assert_eq!(samples, vec![1, 2]);
    }

    #[test]
    fn test_rms_and_peak() {
        // ---
        let frame = PcmFrame::from_samples(vec![-300; 160], 8000);
        assert_eq!(frame.peak(), 300);
        assert!((frame.rms() - 300.0).abs() < 0.01);
        assert_eq!(PcmFrame::silence(8000).rms(), 0.0);
    }
}
