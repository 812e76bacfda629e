//! Egress DSP chain, tuned for what the caller hears.
//!
//! Runs per 20ms frame at the codec's native rate: fade-in after a
//! response boundary, soft-knee limiter, crossfade out of silence or
//! synthesized audio. Underrun frames are synthesized here too, so every
//! discontinuity in the outgoing stream is smoothed in one place.

use rtp_ai_common::samples_per_frame;
use std::f32::consts::PI;

/// Egress DSP constants.
#[derive(Debug, Clone)]
pub struct EgressDspConfig {
    // ---
    /// Length of the fade-in ramp at the start of a response
    pub fade_in_ms: u32,

    /// Absolute output ceiling
    pub limiter_ceiling: f32,

    /// Fraction of the ceiling where the soft knee begins
    pub limiter_threshold: f32,

    /// Per-sample gain smoothing when the limiter clamps down
    pub limiter_attack: f32,

    /// Per-sample gain smoothing when the limiter lets go
    pub limiter_release: f32,

    /// Length of the crossfade across discontinuities
    pub crossfade_ms: u32,

    /// Gain lost per consecutive underrun tick during interpolation
    pub underrun_fade_step: f32,
}

impl Default for EgressDspConfig {
    fn default() -> Self {
        // ---
        Self {
            fade_in_ms: 10,
            limiter_ceiling: 28000.0,
            limiter_threshold: 0.9,
            limiter_attack: 0.6,
            limiter_release: 0.002,
            crossfade_ms: 4,
            underrun_fade_step: 0.25,
        }
    }
}

/// Per-call egress DSP state.
#[derive(Debug, Clone)]
pub struct EgressDsp {
    // ---
    config: EgressDspConfig,
    sample_rate: u32,

    limiter_gain: f32,
    needs_fade_in: bool,
    is_first_packet: bool,
    last_output_sample: i16,

    /// Last processed real frame, replayed during underruns
    last_full_frame: Option<Vec<i16>>,

    last_frame_was_silence: bool,
    last_frame_was_interpolated: bool,
}

impl EgressDsp {
    // ---
    pub fn new(config: EgressDspConfig, sample_rate: u32) -> Self {
        // ---
        Self {
            config,
            sample_rate,
            limiter_gain: 1.0,
            needs_fade_in: false,
            is_first_packet: true,
            last_output_sample: 0,
            last_full_frame: None,
            last_frame_was_silence: true,
            last_frame_was_interpolated: false,
        }
    }

    /// Processes one frame of real AI audio in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        // ---
        let mut buffer: Vec<f32> = samples.iter().map(|&s| s as f32).collect();

        if self.needs_fade_in || self.is_first_packet {
            self.fade_in(&mut buffer);
            self.needs_fade_in = false;
            self.is_first_packet = false;
        }

        self.limit(&mut buffer);

        if self.last_frame_was_silence || self.last_frame_was_interpolated {
            self.crossfade_from_tail(&mut buffer);
        }

        self.store(samples, &buffer);
        self.last_full_frame = Some(samples.to_vec());
        self.last_frame_was_silence = false;
        self.last_frame_was_interpolated = false;
    }

    /// Synthesizes the `count`-th consecutive underrun frame.
    ///
    /// Replays the last real frame with a gain ramping from
    /// `1 - (count - 1) * step` down to `1 - count * step`, so successive
    /// ticks join without a step. Falls back to silence when no real
    /// frame has been played yet.
    pub fn underrun(&mut self, count: u32) -> Vec<i16> {
        // ---
        let Some(frame) = self.last_full_frame.clone() else {
            return self.silence(samples_per_frame(self.sample_rate));
        };

        let step = self.config.underrun_fade_step;
        let from = (1.0 - count.saturating_sub(1) as f32 * step).max(0.0);
        let to = (1.0 - count as f32 * step).max(0.0);
        let n = frame.len() as f32;

        let mut buffer: Vec<f32> = frame
            .iter()
            .enumerate()
            .map(|(i, &s)| s as f32 * (from + (to - from) * (i + 1) as f32 / n))
            .collect();
        self.crossfade_from_tail(&mut buffer);

        let mut out = vec![0; frame.len()];
        self.store(&mut out, &buffer);
        self.last_frame_was_interpolated = true;
        self.last_frame_was_silence = false;
        out
    }

    /// Produces `len` samples of silence, ramped down from the last output.
    pub fn silence(&mut self, len: usize) -> Vec<i16> {
        // ---
        let last = self.last_output_sample as f32;
        let ramp = self.crossfade_len().min(len);

        let mut out = vec![0i16; len];
        for (i, s) in out.iter_mut().take(ramp).enumerate() {
            *s = (last * (1.0 - raised_cosine(i, ramp))).round() as i16;
        }

        self.last_output_sample = 0;
        self.last_frame_was_silence = true;
        self.last_frame_was_interpolated = false;
        out
    }

    /// Fades in the next real frame (new AI response).
    pub fn request_fade_in(&mut self) {
        self.needs_fade_in = true;
    }

    /// Whether a real frame is available for underrun replay.
    pub fn has_last_frame(&self) -> bool {
        self.last_full_frame.is_some()
    }

    pub fn limiter_gain(&self) -> f32 {
        self.limiter_gain
    }

    pub fn reset(&mut self) {
        // ---
        *self = Self::new(self.config.clone(), self.sample_rate);
    }

    fn fade_in(&self, buffer: &mut [f32]) {
        // ---
        let len = ms_to_samples(self.config.fade_in_ms, self.sample_rate).min(buffer.len());
        for (i, x) in buffer.iter_mut().take(len).enumerate() {
            *x *= (i + 1) as f32 / len as f32;
        }
    }

    /// Soft-knee limiter with fast attack and slow release.
    ///
    /// The smoothed gain steers loud passages down to the threshold. What
    /// the gain has not caught yet (a transient during the attack) is bent
    /// onto a `tanh` curve that approaches but never reaches the ceiling.
    fn limit(&mut self, buffer: &mut [f32]) {
        // ---
        let ceiling = self.config.limiter_ceiling;
        let threshold = ceiling * self.config.limiter_threshold;
        let knee = (ceiling - threshold).max(1.0);

        for x in buffer.iter_mut() {
            let level = x.abs();
            let desired = if level > threshold {
                threshold / level
            } else {
                1.0
            };

            let coeff = if desired < self.limiter_gain {
                self.config.limiter_attack
            } else {
                self.config.limiter_release
            };
            self.limiter_gain += (desired - self.limiter_gain) * coeff;

            let y = *x * self.limiter_gain;
            *x = soft_knee(y, threshold, knee).clamp(-ceiling, ceiling);
        }
    }

    /// Blends from the last emitted sample into the start of `buffer`.
    fn crossfade_from_tail(&self, buffer: &mut [f32]) {
        // ---
        let tail = self.last_output_sample as f32;
        let len = self.crossfade_len().min(buffer.len());
        for (i, x) in buffer.iter_mut().take(len).enumerate() {
            let w = raised_cosine(i, len);
            *x = tail * (1.0 - w) + *x * w;
        }
    }

    fn store(&mut self, out: &mut [i16], buffer: &[f32]) {
        // ---
        let ceiling = self.config.limiter_ceiling;
        for (o, &x) in out.iter_mut().zip(buffer) {
            *o = x.round().clamp(-ceiling, ceiling) as i16;
        }
        if let Some(&last) = out.last() {
            self.last_output_sample = last;
        }
    }

    fn crossfade_len(&self) -> usize {
        ms_to_samples(self.config.crossfade_ms, self.sample_rate)
    }
}

fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

/// Compresses the part of `y` above `threshold` into `knee`.
fn soft_knee(y: f32, threshold: f32, knee: f32) -> f32 {
    // ---
    let level = y.abs();
    if level <= threshold {
        return y;
    }
    (threshold + knee * ((level - threshold) / knee).tanh()).copysign(y)
}

/// Rises from near 0 to near 1 over `len` steps.
fn raised_cosine(i: usize, len: usize) -> f32 {
    0.5 - 0.5 * (PI * (i + 1) as f32 / (len + 1) as f32).cos()
}
