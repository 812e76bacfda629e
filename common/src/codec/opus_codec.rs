//! Opus encoding and decoding.
//!
//! Thin wrappers around libopus fixing the bridge's frame contract:
//! 20ms at 48kHz (960 samples per channel), mono on the way out,
//! stereo-capable on the way in with a downmix to mono.

use anyhow::{Context, Result};
use opus::{Application, Channels, Decoder, Encoder};

use crate::frame::samples_per_frame;

/// Opus RTP clock and internal sample rate
pub const SAMPLE_RATE: u32 = 48000;

/// Samples per channel in one 20ms frame
pub const SAMPLES_PER_FRAME: usize = samples_per_frame(SAMPLE_RATE);

/// Upper bound for one encoded Opus packet
const MAX_PACKET_BYTES: usize = 4000;

/// Opus tuning shared by encoder and decoder.
#[derive(Debug, Clone)]
pub struct OpusConfig {
    // ---
    /// Target bitrate in bits per second
    pub bitrate: i32,

    /// Decode into two channels and downmix (peers commonly send `opus/48000/2`)
    pub stereo_decode: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        // ---
        Self {
            bitrate: 24000,
            stereo_decode: true,
        }
    }
}

/// Opus encoder for the egress direction.
///
/// # Configuration
///
/// - Sample Rate: 48kHz
/// - Channels: Mono
/// - Frame Size: 20ms (960 samples)
/// - Application: VOIP (optimized for speech)
pub struct OpusEncoderWrapper {
    // ---
    encoder: Encoder,
}

impl OpusEncoderWrapper {
    // ---
    /// Creates a new voice-optimized encoder.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Opus encoder initialization fails
    /// - Bitrate setting fails
    pub fn new(config: &OpusConfig) -> Result<Self> {
        // ---
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .context("failed to create Opus encoder")?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate))
            .context("failed to set bitrate")?;

        Ok(Self { encoder })
    }

    /// Encodes exactly one 20ms frame (960 samples).
    ///
    /// Short input is zero-padded and long input truncated so the
    /// encoder always sees a legal frame size.
    ///
    /// # Errors
    ///
    /// Returns error if Opus encoding fails.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, opus::Error> {
        // ---
        let mut frame;
        let input = if pcm.len() == SAMPLES_PER_FRAME {
            pcm
        } else {
            frame = pcm.to_vec();
            frame.resize(SAMPLES_PER_FRAME, 0);
            &frame
        };

        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let len = self.encoder.encode(input, &mut output)?;
        output.truncate(len);
        Ok(output)
    }
}

/// Opus decoder for the ingress direction.
///
/// Output is always mono at 48kHz; stereo streams are averaged per
/// sample pair.
pub struct OpusDecoderWrapper {
    // ---
    decoder: Decoder,
    channels: usize,
}

impl OpusDecoderWrapper {
    // ---
    /// Creates a new Opus decoder.
    ///
    /// # Errors
    ///
    /// Returns error if Opus decoder initialization fails.
    pub fn new(config: &OpusConfig) -> Result<Self> {
        // ---
        let (layout, channels) = if config.stereo_decode {
            (Channels::Stereo, 2)
        } else {
            (Channels::Mono, 1)
        };

        let decoder = Decoder::new(SAMPLE_RATE, layout).context("failed to create Opus decoder")?;

        Ok(Self { decoder, channels })
    }

    /// Decodes one packet into mono samples.
    ///
    /// # Errors
    ///
    /// Returns error if Opus decoding fails (corrupted data, invalid format).
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, opus::Error> {
        // ---
        self.run(data, false)
    }

    /// Synthesizes one frame with the decoder's built-in concealment.
    ///
    /// Continues from the previously decoded audio.
    ///
    /// # Errors
    ///
    /// Returns error if PLC generation fails.
    pub fn conceal_loss(&mut self) -> Result<Vec<i16>, opus::Error> {
        // ---
        self.run(&[], true)
    }

    fn run(&mut self, data: &[u8], fec: bool) -> Result<Vec<i16>, opus::Error> {
        // ---
        // Room for the longest legal Opus frame (120ms)
        let mut output = vec![0i16; SAMPLES_PER_FRAME * 6 * self.channels];
        let per_channel = self.decoder.decode(data, &mut output, fec)?;
        output.truncate(per_channel * self.channels);

        if self.channels == 1 {
            return Ok(output);
        }
        Ok(downmix_to_mono(&output, self.channels))
    }
}

/// Averages interleaved channel groups into one mono stream.
pub fn downmix_to_mono(interleaved: &[i16], channels: usize) -> Vec<i16> {
    // ---
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|group| {
            let sum: i32 = group.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
