//! RTP media units handed over by the transport layer.
//!
//! Header parsing and socket I/O belong to the signaling/transport side;
//! the audio pipeline only sees the three fields it needs.

/// An RTP packet as seen by the audio pipeline.
///
/// # Protocol Details
///
/// - Payload Type: selects the codec through the negotiated `CodecMap`
/// - Timestamp: RTP clock units; advances by the codec's per-frame
///   increment (160 for G.711, 320 for G.722, 960 for Opus)
/// - Payload: codec bytes for one 20ms frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    // ---
    /// RTP payload type number
    pub payload_type: u8,

    /// Encoded audio payload
    pub payload: Vec<u8>,

    /// RTP timestamp in codec clock units
    pub rtp_timestamp: u32,
}

impl RtpFrame {
    // ---
    /// Creates a new frame.
    ///
    /// # Arguments
    ///
    /// * `payload_type` - RTP payload type number
    /// * `rtp_timestamp` - RTP timestamp (in codec clock units)
    /// * `payload` - Encoded audio data
    pub fn new(payload_type: u8, rtp_timestamp: u32, payload: Vec<u8>) -> Self {
        // ---
        Self {
            payload_type,
            payload,
            rtp_timestamp,
        }
    }
}

/// Maps wrapping 32-bit RTP timestamps onto a monotonic 64-bit axis.
///
/// Each timestamp is placed at the position closest to the most recent
/// one, so a stream crossing `u32::MAX` keeps increasing keys.
#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    // ---
    last: Option<u64>,
}

/// Origin of the unwrapped axis, far enough from zero that a stream can
/// start by moving backwards without underflowing.
const UNWRAP_ORIGIN: u64 = 1 << 40;

impl TimestampUnwrapper {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwraps `timestamp` relative to the last unwrapped value.
    pub fn unwrap(&mut self, timestamp: u32) -> u64 {
        // ---
        let extended = self.peek(timestamp);
        self.last = Some(extended);
        extended
    }

    /// Unwraps without moving the reference point.
    pub fn peek(&self, timestamp: u32) -> u64 {
        // ---
        match self.last {
            None => UNWRAP_ORIGIN + timestamp as u64,
            Some(last) => {
                let delta = timestamp.wrapping_sub(last as u32) as i32 as i64;
                (last as i64 + delta) as u64
            }
        }
    }

    /// Forgets the reference point (new call or new stream).
    pub fn reset(&mut self) {
        // ---
        self.last = None;
    }
}
