//! Stateful, phase-continuous sample-rate conversion between 20ms frames.
//!
//! One `Resampler` per call and direction. Consecutive calls continue the
//! same waveform: the interpolation window of each call starts at the last
//! sample of the previous call, so frame boundaries are seamless at the cost
//! of one input sample of delay.

use crate::frame::samples_per_frame;

/// Butterworth quality factor
const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Anti-alias cutoff as a fraction of the output rate
const CUTOFF_RATIO: f32 = 0.45;

/// Per-instance conversion state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResamplerState {
    // ---
    /// Position of the next output sample, in input samples past the
    /// previous call's last sample.
    pub fractional_phase: f64,

    /// Last input sample of the previous call (post-filter when downsampling).
    pub last_input_sample: i16,

    /// Direct-Form-II-Transposed delay line of the anti-alias filter
    pub iir_state: [f32; 2],
}

impl ResamplerState {
    // ---
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Normalized 2nd-order low-pass coefficients (RBJ cookbook form).
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    // ---
    fn butterworth_lowpass(cutoff_hz: f32, sample_rate: f32) -> Self {
        // ---
        let w0 = 2.0 * std::f32::consts::PI * cutoff_hz / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * BUTTERWORTH_Q);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 - cos_w0) / 2.0 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn run(&self, input: &[i16], state: &mut [f32; 2]) -> Vec<f32> {
        // ---
        let [mut z1, mut z2] = *state;
        let out = input
            .iter()
            .map(|&s| {
                let x = s as f32;
                let y = self.b0 * x + z1;
                z1 = self.b1 * x - self.a1 * y + z2;
                z2 = self.b2 * x - self.a2 * y;
                y
            })
            .collect();
        *state = [z1, z2];
        out
    }
}

fn to_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Owns one `ResamplerState` and converts frames with it.
#[derive(Debug, Clone, Default)]
pub struct Resampler {
    // ---
    state: ResamplerState,
}

impl Resampler {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts `input` to exactly one 20ms frame at `to_rate`.
    pub fn convert(&mut self, input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
        convert(input, from_rate, to_rate, &mut self.state)
    }

    /// Converts `input` to exactly `out_len` samples at `to_rate`.
    pub fn convert_len(
        &mut self,
        input: &[i16],
        from_rate: u32,
        to_rate: u32,
        out_len: usize,
    ) -> Vec<i16> {
        convert_len(input, from_rate, to_rate, out_len, &mut self.state)
    }

    pub fn state(&self) -> &ResamplerState {
        &self.state
    }

    /// Returns to initial state; call between calls, never mid-stream.
    pub fn reset(&mut self) {
        self.state.reset();
    }
}

/// Converts `input` to one 20ms frame at `to_rate` using `state`.
///
/// See [`convert_len`].
pub fn convert(input: &[i16], from_rate: u32, to_rate: u32, state: &mut ResamplerState) -> Vec<i16> {
    convert_len(input, from_rate, to_rate, samples_per_frame(to_rate), state)
}

/// Converts `input` from `from_rate` to `to_rate`, producing exactly
/// `out_len` samples regardless of input length.
///
/// # Arguments
///
/// * `input` - Mono PCM at `from_rate`; may be empty or short
/// * `out_len` - Number of output samples to produce
/// * `state` - Carried across calls for phase and filter continuity
///
/// # Returns
///
/// Exactly `out_len` samples. Positions past the end of the input hold
/// the last available sample instead of dropping to zero.
pub fn convert_len(
    input: &[i16],
    from_rate: u32,
    to_rate: u32,
    out_len: usize,
    state: &mut ResamplerState,
) -> Vec<i16> {
    // ---
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return vec![state.last_input_sample; out_len];
    }

    if from_rate == to_rate {
        let mut out = input.to_vec();
        out.resize(out_len, input[input.len() - 1]);
        state.last_input_sample = input[input.len() - 1];
        state.fractional_phase = 0.0;
        return out;
    }

    // Any rate decrease is band-limited first
    let source: Vec<f32> = if to_rate < from_rate {
        let filter = Biquad::butterworth_lowpass(CUTOFF_RATIO * to_rate as f32, from_rate as f32);
        filter.run(input, &mut state.iir_state)
    } else {
        input.iter().map(|&s| s as f32).collect()
    };

    let out = if from_rate == 2 * to_rate && source.len() == 2 * out_len {
        halve(&source, state)
    } else if to_rate == 2 * from_rate && out_len == 2 * source.len() && state.fractional_phase == 0.0 {
        double(&source, state)
    } else {
        interpolate(&source, from_rate, to_rate, out_len, state)
    };

    if let Some(&last) = source.last() {
        state.last_input_sample = to_i16(last);
    }
    out
}

/// Exact 2× down: average of filtered sample pairs.
fn halve(source: &[f32], state: &mut ResamplerState) -> Vec<i16> {
    // ---
    state.fractional_phase = 0.0;
    source
        .chunks_exact(2)
        .map(|pair| to_i16((pair[0] + pair[1]) * 0.5))
        .collect()
}

/// Exact 2× up: even outputs copy, odd outputs average neighbours.
fn double(source: &[f32], state: &ResamplerState) -> Vec<i16> {
    // ---
    let mut previous = state.last_input_sample as f32;
    let mut out = Vec::with_capacity(source.len() * 2);
    for &current in source {
        out.push(to_i16(previous));
        out.push(to_i16((previous + current) * 0.5));
        previous = current;
    }
    out
}

/// Linear interpolation over `[last_input_sample, source...]`.
fn interpolate(
    source: &[f32],
    from_rate: u32,
    to_rate: u32,
    out_len: usize,
    state: &mut ResamplerState,
) -> Vec<i16> {
    // ---
    let step = from_rate as f64 / to_rate as f64;
    let last_index = source.len();
    let previous = state.last_input_sample as f32;

    // Index 0 is the previous call's last sample, index n the current last
    let sample_at = |index: usize| -> f32 {
        match index {
            0 => previous,
            i => source[i.min(last_index) - 1],
        }
    };

    let mut out = Vec::with_capacity(out_len);
    for k in 0..out_len {
        let position = state.fractional_phase + k as f64 * step;
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;

        let a = sample_at(index);
        let b = sample_at(index + 1);
        out.push(to_i16(a + (b - a) * frac));
    }

    let consumed = state.fractional_phase + out_len as f64 * step - last_index as f64;
    state.fractional_phase = consumed.max(0.0).fract();
    out
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn sine(freq: f32, rate: u32, amplitude: f32, len: usize) -> Vec<i16> {
        // ---
        (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                ((t * 2.0 * std::f32::consts::PI * freq).sin() * amplitude) as i16
            })
            .collect()
    }

    fn max_step(samples: &[i16]) -> i32 {
        // ---
        samples
            .windows(2)
            .map(|w| (w[1] as i32 - w[0] as i32).abs())
            .max()
            .unwrap_or(0)
    }

    /// Streams `input` through the resampler one 20ms frame at a time.
    fn stream(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
        // ---
        let mut resampler = Resampler::new();
        input
            .chunks(samples_per_frame(from_rate))
            .flat_map(|frame| resampler.convert(frame, from_rate, to_rate))
            .collect()
    }

    #[test]
    fn test_output_is_one_frame_for_every_rate_pair() {
        // ---
        let rates = [8000, 16000, 24000, 48000];
        for &from in &rates {
            for &to in &rates {
                let mut resampler = Resampler::new();
                let input = sine(300.0, from, 5000.0, samples_per_frame(from));
                let out = resampler.convert(&input, from, to);
                assert_eq!(out.len(), samples_per_frame(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_short_and_empty_input_hold_last_sample() {
        // ---
        let mut resampler = Resampler::new();
        let out = resampler.convert(&[1000; 100], 16000, 16000);
        assert_eq!(out.len(), 320);
        assert!(out[100..].iter().all(|&s| s == 1000));

        let out = resampler.convert(&[], 8000, 16000);
        assert_eq!(out, vec![1000; 320]);
    }

    #[test]
    fn test_upsample_frame_boundaries_are_seamless() {
        // ---
        let input = sine(440.0, 8000, 10000.0, 1600);
        let out = stream(&input, 8000, 16000);
        assert_eq!(out.len(), 3200);

        // The 440Hz tone at 16kHz moves at most ~1730 per sample
        let bound = max_step(&out[..320]) + 2;
        for boundary in (320..3200).step_by(320) {
            let jump = (out[boundary] as i32 - out[boundary - 1] as i32).abs();
            assert!(jump <= bound, "click of {} at {}", jump, boundary);
        }
    }

    #[test]
    fn test_streaming_matches_single_pass() {
        // ---
        let input = sine(440.0, 8000, 10000.0, 1600);
        let streamed = stream(&input, 8000, 16000);

        let mut state = ResamplerState::default();
        let whole = convert_len(&input, 8000, 16000, 3200, &mut state);
        assert_eq!(streamed, whole);
    }

    #[test]
    fn test_fractional_ratio_tracks_phase() {
        // ---
        let input = sine(500.0, 16000, 8000.0, 3200);
        let streamed = stream(&input, 16000, 24000);

        let mut state = ResamplerState::default();
        let whole = convert_len(&input, 16000, 24000, 4800, &mut state);
        for (a, b) in streamed.iter().zip(&whole) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
        assert!(state.fractional_phase < 1e-6);
    }

    #[test]
    fn test_2x_upsample_fast_path_values() {
        // ---
        let mut state = ResamplerState {
            last_input_sample: 100,
            ..Default::default()
        };
        let out = convert_len(&[200, 400], 24000, 48000, 4, &mut state);
        assert_eq!(out, vec![100, 150, 200, 300]);
        assert_eq!(state.last_input_sample, 400);
    }

    #[test]
    fn test_downsample_attenuates_above_new_nyquist() {
        // ---
        // 10kHz at 48kHz folds to 2kHz at 8kHz without filtering
        let input = sine(10000.0, 48000, 10000.0, 960 * 10);
        let out = stream(&input, 48000, 8000);

        let passband = stream(&sine(500.0, 48000, 10000.0, 960 * 10), 48000, 8000);
        let aliased_rms = crate::frame::rms(&out[160..]);
        let passband_rms = crate::frame::rms(&passband[160..]);
        assert!(aliased_rms < passband_rms * 0.3, "{} vs {}", aliased_rms, passband_rms);
    }

    #[test]
    fn test_downsample_state_carries_across_frames() {
        // ---
        let input = sine(300.0, 16000, 8000.0, 3200);
        let streamed = stream(&input, 16000, 8000);

        let mut state = ResamplerState::default();
        let whole = convert_len(&input, 16000, 8000, 1600, &mut state);
        assert_eq!(streamed, whole);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        // ---
        let mut resampler = Resampler::new();
        resampler.convert(&sine(300.0, 48000, 8000.0, 960), 48000, 16000);
        assert_ne!(*resampler.state(), ResamplerState::default());

        resampler.reset();
        assert_eq!(*resampler.state(), ResamplerState::default());
    }
}
