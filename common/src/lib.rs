//! Shared building blocks of the RTP ↔ AI audio bridge.
//!
//! This crate holds everything both directions of a call use: RTP and PCM
//! frame types, the codec layer, the stateful resampler, the collaborator
//! traits, and process-level observability and CLI policy.

pub mod cli;
pub mod codec;
pub mod error;
pub mod events;
pub mod frame;
pub mod observability;
pub mod resampler;
pub mod rtp;

pub use cli::ColorWhen;
pub use codec::{AudioDecoder, AudioEncoder, Codec, CodecMap, OpusConfig};
pub use error::BridgeError;
pub use events::{EgressEvents, IngressEvents};
pub use frame::{samples_per_frame, PcmFrame, FRAME_DURATION_MS};
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use resampler::{Resampler, ResamplerState};
pub use rtp::{RtpFrame, TimestampUnwrapper};
