//! Error type surfaced to call-signaling collaborators.
//!
//! The real-time paths never return these; they degrade locally and
//! report through `IngressEvents::on_call_error` / `EgressEvents::on_call_error`
//! only when audio flow has effectively stopped.

use crate::codec::Codec;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    // ---
    /// A payload type arrived that the negotiated codec map does not know.
    #[error("unsupported RTP payload type {0}")]
    UnsupportedPayloadType(u8),

    /// A codec produced no usable audio for too many frames in a row.
    #[error("{codec} codec failed on {consecutive} consecutive frames")]
    CodecFailure { codec: Codec, consecutive: u32 },

    /// Error reported by libopus.
    #[error("opus: {0}")]
    Opus(#[from] opus::Error),

    /// Operation attempted before codec negotiation.
    #[error("no codec negotiated for this call")]
    NotNegotiated,
}
