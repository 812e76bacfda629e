//! Collaborator boundaries of the audio pipeline.
//!
//! Each direction gets its observer injected at construction. An observer
//! may fan out to any number of listeners internally; the pipeline only
//! knows the trait.

use crate::BridgeError;

/// Receives the ingress (phone → AI) output.
pub trait IngressEvents: Send + Sync {
    // ---
    /// A 20ms PCM16 little-endian frame at the configured target rate.
    fn on_pcm_frame_ready(&self, pcm: &[u8]);

    /// Audio flow has stopped for reasons the pipeline cannot recover from.
    fn on_call_error(&self, _error: &BridgeError) {}
}

/// Receives the egress (AI → phone) output.
pub trait EgressEvents: Send + Sync {
    // ---
    /// An encoded payload ready for RTP transmission.
    ///
    /// `duration` is the frame length in RTP timestamp units, i.e. the
    /// amount by which the transport advances its RTP timestamp.
    fn on_encoded_frame_ready(&self, duration: u32, payload: &[u8]);

    /// The AI audio queue ran dry and playback fell back to silence.
    ///
    /// Fired once per underrun episode; upstream uses it to release the
    /// echo/cross-talk guard.
    fn on_queue_drained(&self) {}

    /// Audio flow has stopped for reasons the pipeline cannot recover from.
    fn on_call_error(&self, _error: &BridgeError) {}
}
