//! Ingress DSP chain, tuned for speech recognition.
//!
//! Applied per 20ms frame at the codec's native rate, in this order:
//! DC blocker, pre-emphasis, hysteresis noise gate, AGC, hard limiter.

use tracing::debug;

/// Ingress DSP constants.
#[derive(Debug, Clone)]
pub struct IngressDspConfig {
    // ---
    /// DC blocker pole
    pub dc_alpha: f32,

    /// Pre-emphasis coefficient
    pub preemphasis: f32,

    /// Frame RMS above which a closed gate opens
    pub gate_open_rms: f32,

    /// Frame RMS below which an open gate starts counting towards closing
    pub gate_close_rms: f32,

    /// Consecutive quiet frames before the gate closes
    pub gate_hold_frames: u32,

    /// RMS level the AGC steers towards
    pub agc_target_rms: f32,

    pub agc_min_gain: f32,
    pub agc_max_gain: f32,

    /// Fraction of the distance to the target gain covered per frame
    pub agc_step: f32,

    /// Smoothing of the AGC level estimate (closer to 1 is slower)
    pub rms_smoothing: f32,

    /// Hard limiter ceiling
    pub limiter_ceiling: i16,
}

impl Default for IngressDspConfig {
    fn default() -> Self {
        // ---
        Self {
            dc_alpha: 0.995,
            preemphasis: 0.97,
            gate_open_rms: 300.0,
            gate_close_rms: 150.0,
            gate_hold_frames: 10, // 200ms
            agc_target_rms: 3000.0,
            agc_min_gain: 0.5,
            agc_max_gain: 8.0,
            agc_step: 0.05,
            rms_smoothing: 0.9,
            limiter_ceiling: 30000,
        }
    }
}

/// Per-call ingress DSP state.
#[derive(Debug, Clone)]
pub struct IngressDsp {
    // ---
    config: IngressDspConfig,

    dc_estimate: f32,
    preemphasis_prev: f32,
    rms_estimate: f32,
    agc_gain: f32,
    gate_open: bool,

    /// Consecutive quiet frames seen while the gate is open
    gate_hold_counter: u32,

    gate_openings: u64,
    gate_closures: u64,
}

impl IngressDsp {
    // ---
    pub fn new(config: IngressDspConfig) -> Self {
        // ---
        let rms_estimate = config.agc_target_rms;
        Self {
            config,
            dc_estimate: 0.0,
            preemphasis_prev: 0.0,
            rms_estimate,
            agc_gain: 1.0,
            gate_open: false,
            gate_hold_counter: 0,
            gate_openings: 0,
            gate_closures: 0,
        }
    }

    /// Runs the full chain over one frame in place.
    pub fn process(&mut self, samples: &mut [i16]) {
        // ---
        let mut buffer: Vec<f32> = samples.iter().map(|&s| s as f32).collect();

        self.remove_dc(&mut buffer);
        self.preemphasize(&mut buffer);

        let level = rms_f32(&buffer);
        if !self.update_gate(level) {
            samples.fill(0);
            return;
        }

        self.update_agc(level);

        let ceiling = self.config.limiter_ceiling as f32;
        for (out, value) in samples.iter_mut().zip(buffer) {
            *out = (value * self.agc_gain).round().clamp(-ceiling, ceiling) as i16;
        }
    }

    fn remove_dc(&mut self, buffer: &mut [f32]) {
        // ---
        let alpha = self.config.dc_alpha;
        for x in buffer.iter_mut() {
            self.dc_estimate = alpha * self.dc_estimate + (1.0 - alpha) * *x;
            *x -= self.dc_estimate;
        }
    }

    fn preemphasize(&mut self, buffer: &mut [f32]) {
        // ---
        let beta = self.config.preemphasis;
        for x in buffer.iter_mut() {
            let current = *x;
            *x = current - beta * self.preemphasis_prev;
            self.preemphasis_prev = current;
        }
    }

    /// Advances the gate and returns whether it is open for this frame.
    fn update_gate(&mut self, level: f32) -> bool {
        // ---
        if self.gate_open {
            if level < self.config.gate_close_rms {
                self.gate_hold_counter += 1;
                if self.gate_hold_counter >= self.config.gate_hold_frames {
                    self.gate_open = false;
                    self.gate_hold_counter = 0;
                    self.gate_closures += 1;
                    debug!("Noise gate closed (rms {:.0})", level);
                }
            } else {
                self.gate_hold_counter = 0;
            }
        } else if level > self.config.gate_open_rms {
            self.gate_open = true;
            self.gate_hold_counter = 0;
            self.gate_openings += 1;
            debug!("Noise gate opened (rms {:.0})", level);
        }

        self.gate_open
    }

    fn update_agc(&mut self, level: f32) {
        // ---
        let s = self.config.rms_smoothing;
        self.rms_estimate = s * self.rms_estimate + (1.0 - s) * level;

        let target = (self.config.agc_target_rms / self.rms_estimate.max(1.0))
            .clamp(self.config.agc_min_gain, self.config.agc_max_gain);
        self.agc_gain += (target - self.agc_gain) * self.config.agc_step;
    }

    pub fn is_gate_open(&self) -> bool {
        self.gate_open
    }

    pub fn agc_gain(&self) -> f32 {
        self.agc_gain
    }

    pub fn gate_openings(&self) -> u64 {
        self.gate_openings
    }

    pub fn gate_closures(&self) -> u64 {
        self.gate_closures
    }

    /// Returns every filter and counter to its initial value.
    pub fn reset(&mut self) {
        // ---
        *self = Self::new(self.config.clone());
    }
}

fn rms_f32(buffer: &[f32]) -> f32 {
    // ---
    if buffer.is_empty() {
        return 0.0;
    }
    let energy: f32 = buffer.iter().map(|x| x * x).sum();
    (energy / buffer.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn tone(amplitude: f32, len: usize, offset: usize) -> Vec<i16> {
        // ---
        (0..len)
            .map(|i| {
                let t = (i + offset) as f32 / 8000.0;
                ((t * 2.0 * std::f32::consts::PI * 1000.0).sin() * amplitude) as i16
            })
            .collect()
    }

    fn run(dsp: &mut IngressDsp, amplitude: f32, frames: usize) -> Vec<Vec<i16>> {
        // ---
        (0..frames)
            .map(|n| {
                let mut frame = tone(amplitude, 160, n * 160);
                dsp.process(&mut frame);
                frame
            })
            .collect()
    }

    #[test]
    fn test_gate_starts_closed_and_silences_noise() {
        // ---
        let mut dsp = IngressDsp::new(IngressDspConfig::default());
        let out = run(&mut dsp, 50.0, 5);

        assert!(!dsp.is_gate_open());
        assert!(out.iter().flatten().all(|&s| s == 0));
    }

    #[test]
    fn test_gate_opens_on_speech() {
        // ---
        let mut dsp = IngressDsp::new(IngressDspConfig::default());
        let out = run(&mut dsp, 5000.0, 3);

        assert!(dsp.is_gate_open());
        assert_eq!(dsp.gate_openings(), 1);
        assert!(out[0].iter().any(|&s| s != 0));
    }

    #[test]
    fn test_gate_holds_before_closing() {
        // ---
        let config = IngressDspConfig::default();
        let hold = config.gate_hold_frames as usize;
        let mut dsp = IngressDsp::new(config);
        run(&mut dsp, 5000.0, 5);

        // First quiet frame still carries the loud tail through pre-emphasis
        run(&mut dsp, 10.0, 1);
        assert!(dsp.is_gate_open());

        // Quiet frames short of the hold count keep the gate open
        run(&mut dsp, 10.0, hold - 1);
        assert!(dsp.is_gate_open());

        run(&mut dsp, 10.0, 1);
        assert!(!dsp.is_gate_open());
        assert_eq!(dsp.gate_closures(), 1);
    }

    #[test]
    fn test_agc_frozen_while_gate_closed() {
        // ---
        let mut dsp = IngressDsp::new(IngressDspConfig::default());
        run(&mut dsp, 8000.0, 20);
        run(&mut dsp, 10.0, 20);
        assert!(!dsp.is_gate_open());
        let gain = dsp.agc_gain();

        run(&mut dsp, 10.0, 40);
        assert_eq!(dsp.agc_gain(), gain);
    }

    #[test]
    fn test_agc_raises_quiet_speech() {
        // ---
        let mut dsp = IngressDsp::new(IngressDspConfig::default());
        run(&mut dsp, 800.0, 100);

        assert!(dsp.is_gate_open());
        assert!(dsp.agc_gain() > 1.5, "gain {}", dsp.agc_gain());
        assert!(dsp.agc_gain() <= IngressDspConfig::default().agc_max_gain);
    }

    #[test]
    fn test_limiter_caps_output() {
        // ---
        let config = IngressDspConfig {
            agc_min_gain: 8.0,
            ..Default::default()
        };
        let ceiling = config.limiter_ceiling;
        let mut dsp = IngressDsp::new(config);
        let out = run(&mut dsp, 30000.0, 10);

        assert!(out.iter().flatten().all(|&s| s.abs() <= ceiling));
        assert!(out.iter().flatten().any(|&s| s.abs() == ceiling));
    }

    #[test]
    fn test_reset_restores_initial_state() {
        // ---
        let mut dsp = IngressDsp::new(IngressDspConfig::default());
        run(&mut dsp, 5000.0, 10);
        dsp.reset();

        assert!(!dsp.is_gate_open());
        assert_eq!(dsp.agc_gain(), 1.0);
        assert_eq!(dsp.gate_openings(), 0);
    }
}
