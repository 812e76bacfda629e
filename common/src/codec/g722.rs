//! Simplified G.722-style sub-band ADPCM at 16kHz.
//!
//! Each pair of input samples is split into a low band (sum) and a high
//! band (difference). Each band runs an adaptive quantizer around a leaky
//! integrator: 8 levels for the low band, 4 for the high band. One byte
//! carries one sample pair:
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! +-------+-----------+-----------+
//! | high  |  unused   | low code  |
//! +-------+-----------+-----------+
//! ```
//!
//! The bitstream is only meant to round-trip through this module's own
//! decoder; it is not interoperable with ITU-T G.722 peers.

/// Leak factor of the integrator predictor (Q15, ~0.99)
const PREDICTOR_LEAK_Q15: i32 = 32440;

/// Step multipliers (Q8) indexed by quantized magnitude, low band
const LOW_STEP_MULT: [i32; 4] = [230, 240, 300, 410];

/// Step multipliers (Q8) indexed by quantized magnitude, high band
const HIGH_STEP_MULT: [i32; 2] = [235, 350];

/// Quantizer layout and step adaptation limits for one band.
#[derive(Debug)]
struct BandParams {
    levels: i32,
    step_mult: &'static [i32],
    min_step: i32,
    max_step: i32,
    initial_step: i32,
}

const LOW_BAND: BandParams = BandParams {
    levels: 8,
    step_mult: &LOW_STEP_MULT,
    min_step: 16,
    max_step: 8192,
    initial_step: 64,
};

const HIGH_BAND: BandParams = BandParams {
    levels: 4,
    step_mult: &HIGH_STEP_MULT,
    min_step: 8,
    max_step: 4096,
    initial_step: 32,
};

/// ADPCM state of one sub-band.
///
/// Encoder and decoder apply the same `update` for a given code, which
/// keeps both sides in lockstep without side information.
#[derive(Debug, Clone)]
struct Band {
    // ---
    params: &'static BandParams,

    /// Reconstructed band signal (the integrator)
    integrator: i32,

    /// Current quantizer step
    step: i32,
}

impl Band {
    // ---
    fn new(params: &'static BandParams) -> Self {
        // ---
        Self {
            params,
            integrator: 0,
            step: params.initial_step,
        }
    }

    /// One-sample prediction from the leaky integrator.
    fn predict(&self) -> i32 {
        (self.integrator * PREDICTOR_LEAK_Q15) >> 15
    }

    /// Quantizes the prediction error of `input` into a code.
    fn quantize(&self, input: i32) -> u8 {
        // ---
        let half = self.params.levels / 2;
        let difference = input - self.predict();
        let index = difference.div_euclid(self.step) + half;
        index.clamp(0, self.params.levels - 1) as u8
    }

    /// Applies `code` and returns the reconstructed band value.
    fn update(&mut self, code: u8) -> i32 {
        // ---
        let half = self.params.levels / 2;
        let level = 2 * (code as i32 - half) + 1;
        let dequantized = (level * self.step) >> 1;

        self.integrator = saturate(self.predict() + dequantized);

        let magnitude = (level.unsigned_abs() / 2) as usize;
        self.step = ((self.step * self.params.step_mult[magnitude]) >> 8)
            .clamp(self.params.min_step, self.params.max_step);

        self.integrator
    }

    fn reset(&mut self) {
        // ---
        *self = Self::new(self.params);
    }
}

fn saturate(value: i32) -> i32 {
    value.clamp(i16::MIN as i32, i16::MAX as i32)
}

/// Stateful G.722 encoder; one per call.
#[derive(Debug, Clone)]
pub struct G722Encoder {
    // ---
    low: Band,
    high: Band,
}

impl Default for G722Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl G722Encoder {
    // ---
    pub fn new() -> Self {
        // ---
        Self {
            low: Band::new(&LOW_BAND),
            high: Band::new(&HIGH_BAND),
        }
    }

    /// Encodes 16kHz PCM, one byte per sample pair.
    ///
    /// An odd trailing sample is paired with itself.
    pub fn encode(&mut self, pcm: &[i16]) -> Vec<u8> {
        // ---
        let mut out = Vec::with_capacity(pcm.len().div_ceil(2));

        for pair in pcm.chunks(2) {
            let x0 = pair[0] as i32;
            let x1 = pair.get(1).copied().unwrap_or(pair[0]) as i32;

            let low_code = self.low.quantize((x0 + x1) >> 1);
            self.low.update(low_code);

            let high_code = self.high.quantize((x0 - x1) >> 1);
            self.high.update(high_code);

            out.push((high_code << 6) | low_code);
        }

        out
    }

    pub fn reset(&mut self) {
        // ---
        self.low.reset();
        self.high.reset();
    }
}

/// Stateful G.722 decoder; one per call.
#[derive(Debug, Clone)]
pub struct G722Decoder {
    // ---
    low: Band,
    high: Band,
}

impl Default for G722Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl G722Decoder {
    // ---
    pub fn new() -> Self {
        // ---
        Self {
            low: Band::new(&LOW_BAND),
            high: Band::new(&HIGH_BAND),
        }
    }

    /// Decodes a payload into 16kHz PCM, two samples per byte.
    pub fn decode(&mut self, payload: &[u8]) -> Vec<i16> {
        // ---
        let mut out = Vec::with_capacity(payload.len() * 2);

        for &byte in payload {
            let low = self.low.update(byte & 0x07);
            let high = self.high.update((byte >> 6) & 0x03);

            out.push(saturate(low + high) as i16);
            out.push(saturate(low - high) as i16);
        }

        out
    }

    pub fn reset(&mut self) {
        // ---
        self.low.reset();
        self.high.reset();
    }
}
