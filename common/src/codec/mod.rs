//! Codec layer: G.711 μ-law/A-law, G.722 and Opus.
//!
//! `AudioDecoder` and `AudioEncoder` hold whatever per-call state a codec
//! needs (G.722 predictors, Opus instances). One of each exists per call
//! and direction; nothing here is shared between calls.

pub mod g711;
pub mod g722;
pub mod opus_codec;

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;

use crate::frame::samples_per_frame;
use crate::BridgeError;

pub use g722::{G722Decoder, G722Encoder};
pub use opus_codec::{OpusConfig, OpusDecoderWrapper, OpusEncoderWrapper};

/// Payload type commonly assigned to Opus in SDP offers
pub const DEFAULT_OPUS_PAYLOAD_TYPE: u8 = 111;

/// Audio codecs the bridge can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// G.711 μ-law, 8kHz
    Pcmu,

    /// G.711 A-law, 8kHz
    Pcma,

    /// Sub-band ADPCM, 16kHz
    G722,

    /// Opus, 48kHz
    Opus,
}

impl Codec {
    // ---
    /// Sample rate of the decoded/encoded PCM.
    pub const fn native_rate(self) -> u32 {
        // ---
        match self {
            Codec::Pcmu | Codec::Pcma => 8000,
            Codec::G722 => 16000,
            Codec::Opus => 48000,
        }
    }

    /// PCM samples in one 20ms frame at the native rate.
    pub const fn samples_per_frame(self) -> usize {
        samples_per_frame(self.native_rate())
    }

    /// RTP timestamp advance per 20ms frame.
    pub const fn timestamp_increment(self) -> u32 {
        // ---
        match self {
            Codec::Pcmu | Codec::Pcma => 160,
            Codec::G722 => 320,
            Codec::Opus => 960,
        }
    }

    /// Static RTP payload type, if the codec has one.
    pub const fn static_payload_type(self) -> Option<u8> {
        // ---
        match self {
            Codec::Pcmu => Some(0),
            Codec::Pcma => Some(8),
            Codec::G722 => Some(9),
            Codec::Opus => None,
        }
    }

    /// Wideband codecs prime the egress queue deeper.
    pub const fn is_wideband(self) -> bool {
        self.native_rate() >= 16000
    }

    /// Parses an SDP `rtpmap` encoding name (case-insensitive).
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        // ---
        match name.to_ascii_uppercase().as_str() {
            "PCMU" => Some(Codec::Pcmu),
            "PCMA" => Some(Codec::Pcma),
            "G722" => Some(Codec::G722),
            "OPUS" => Some(Codec::Opus),
            _ => None,
        }
    }

    pub const fn encoding_name(self) -> &'static str {
        // ---
        match self {
            Codec::Pcmu => "PCMU",
            Codec::Pcma => "PCMA",
            Codec::G722 => "G722",
            Codec::Opus => "opus",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

/// Negotiated payload type → codec mapping.
///
/// Built by the signaling layer after SDP negotiation and read-only for
/// the rest of the call. The first codec inserted is the call's primary
/// codec, used for egress and as the fallback for unknown payload types.
#[derive(Debug, Clone, Default)]
pub struct CodecMap {
    // ---
    entries: HashMap<u8, Codec>,
    primary: Option<Codec>,
}

impl CodecMap {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Map containing a single negotiated codec on its usual payload type.
    pub fn single(codec: Codec) -> Self {
        // ---
        let payload_type = codec
            .static_payload_type()
            .unwrap_or(DEFAULT_OPUS_PAYLOAD_TYPE);
        Self::new().with(payload_type, codec)
    }

    /// Builder-style `insert`.
    pub fn with(mut self, payload_type: u8, codec: Codec) -> Self {
        // ---
        self.insert(payload_type, codec);
        self
    }

    /// Adds a mapping; the first codec added becomes the primary codec.
    pub fn insert(&mut self, payload_type: u8, codec: Codec) {
        // ---
        self.entries.insert(payload_type, codec);
        self.primary.get_or_insert(codec);
    }

    /// Adds a mapping from an SDP `a=rtpmap` encoding name.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPayloadType` if the encoding name is unknown.
    pub fn insert_rtpmap(&mut self, payload_type: u8, encoding_name: &str) -> Result<(), BridgeError> {
        // ---
        let codec = Codec::from_encoding_name(encoding_name)
            .ok_or(BridgeError::UnsupportedPayloadType(payload_type))?;
        self.insert(payload_type, codec);
        Ok(())
    }

    pub fn get(&self, payload_type: u8) -> Option<Codec> {
        self.entries.get(&payload_type).copied()
    }

    pub fn primary(&self) -> Option<Codec> {
        self.primary
    }

    /// Payload type to stamp on outgoing packets for `codec`.
    pub fn payload_type_for(&self, codec: Codec) -> Option<u8> {
        // ---
        self.entries
            .iter()
            .filter(|(_, &c)| c == codec)
            .map(|(&pt, _)| pt)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-call decoder for whichever codec was negotiated.
pub enum AudioDecoder {
    Pcmu,
    Pcma,
    G722(G722Decoder),
    Opus(Box<OpusDecoderWrapper>),
}

impl AudioDecoder {
    // ---
    /// Creates a decoder with fresh state.
    ///
    /// # Errors
    ///
    /// Returns error if the Opus library fails to initialize.
    pub fn new(codec: Codec, opus: &OpusConfig) -> Result<Self> {
        // ---
        Ok(match codec {
            Codec::Pcmu => AudioDecoder::Pcmu,
            Codec::Pcma => AudioDecoder::Pcma,
            Codec::G722 => AudioDecoder::G722(G722Decoder::new()),
            Codec::Opus => AudioDecoder::Opus(Box::new(OpusDecoderWrapper::new(opus)?)),
        })
    }

    pub fn codec(&self) -> Codec {
        // ---
        match self {
            AudioDecoder::Pcmu => Codec::Pcmu,
            AudioDecoder::Pcma => Codec::Pcma,
            AudioDecoder::G722(_) => Codec::G722,
            AudioDecoder::Opus(_) => Codec::Opus,
        }
    }

    /// Decodes one payload to PCM at the codec's native rate.
    ///
    /// Fixed-rate codecs decode whatever bytes are present, so a short
    /// payload yields a short frame. Only Opus can fail.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Opus` when libopus rejects the packet.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>, BridgeError> {
        // ---
        match self {
            AudioDecoder::Pcmu => Ok(g711::decode_ulaw(payload)),
            AudioDecoder::Pcma => Ok(g711::decode_alaw(payload)),
            AudioDecoder::G722(decoder) => Ok(decoder.decode(payload)),
            AudioDecoder::Opus(decoder) => Ok(decoder.decode(payload)?),
        }
    }

    /// Codec-native loss concealment, when the codec has one.
    ///
    /// Returns `None` for codecs without built-in PLC; the caller then
    /// replays its last frame instead.
    pub fn conceal(&mut self) -> Option<Result<Vec<i16>, BridgeError>> {
        // ---
        match self {
            AudioDecoder::Opus(decoder) => Some(decoder.conceal_loss().map_err(BridgeError::from)),
            _ => None,
        }
    }
}

/// Per-call encoder for whichever codec was negotiated.
pub enum AudioEncoder {
    Pcmu,
    Pcma,
    G722(G722Encoder),
    Opus(Box<OpusEncoderWrapper>),
}

impl AudioEncoder {
    // ---
    /// Creates an encoder with fresh state.
    ///
    /// # Errors
    ///
    /// Returns error if the Opus library fails to initialize.
    pub fn new(codec: Codec, opus: &OpusConfig) -> Result<Self> {
        // ---
        Ok(match codec {
            Codec::Pcmu => AudioEncoder::Pcmu,
            Codec::Pcma => AudioEncoder::Pcma,
            Codec::G722 => AudioEncoder::G722(G722Encoder::new()),
            Codec::Opus => AudioEncoder::Opus(Box::new(OpusEncoderWrapper::new(opus)?)),
        })
    }

    pub fn codec(&self) -> Codec {
        // ---
        match self {
            AudioEncoder::Pcmu => Codec::Pcmu,
            AudioEncoder::Pcma => Codec::Pcma,
            AudioEncoder::G722(_) => Codec::G722,
            AudioEncoder::Opus(_) => Codec::Opus,
        }
    }

    /// Encodes one frame of native-rate PCM.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Opus` when libopus fails.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, BridgeError> {
        // ---
        match self {
            AudioEncoder::Pcmu => Ok(g711::encode_ulaw(pcm)),
            AudioEncoder::Pcma => Ok(g711::encode_alaw(pcm)),
            AudioEncoder::G722(encoder) => Ok(encoder.encode(pcm)),
            AudioEncoder::Opus(encoder) => Ok(encoder.encode(pcm)?),
        }
    }
}
