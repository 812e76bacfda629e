//! Egress (AI → phone) half of the audio bridge.
//!
//! AI audio of any chunk size goes in through an `EgressHandle`; a
//! timer-driven `PlayoutEngine` turns it into one encoded RTP payload
//! every 20ms, smoothing over gaps with interpolation and silence.

pub mod dsp;
pub mod playout;
pub mod queue;
pub mod scheduler;
pub mod stats;

pub use dsp::{EgressDsp, EgressDspConfig};
pub use playout::{PlayoutConfig, PlayoutEngine, TickOutcome};
pub use queue::{EgressHandle, PcmQueue, QueueConfig};
pub use scheduler::{spawn_playout, PlayoutTask};
pub use stats::PlayoutStats;
