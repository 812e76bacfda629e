//! Ingress (phone → AI) half of the audio bridge.
//!
//! Turns RTP frames from the transport into a steady stream of 20ms PCM16
//! frames at the AI's sample rate: jitter buffering with bounded
//! concealment, decoding, recognition-tuned DSP and resampling.

pub mod dsp;
pub mod jitter_buffer;
pub mod processor;
pub mod stats;

pub use dsp::{IngressDsp, IngressDspConfig};
pub use jitter_buffer::{InsertOutcome, JitterBuffer, JitterBufferConfig, JitterBufferStatus, Pulled};
pub use processor::{IngressConfig, IngressProcessor};
pub use stats::IngressStats;
