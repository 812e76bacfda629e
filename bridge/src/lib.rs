//! Per-call RTP ↔ AI audio bridge.
//!
//! Wires the ingress and egress halves together behind a single
//! `CallLeg`, and carries the deterministic network simulator and WAV
//! helpers used by the `bridge-sim` loopback harness and the tests.

pub mod call_leg;
pub mod simulator;
pub mod wav;

pub use call_leg::{CallLeg, CallLegConfig};
pub use simulator::{NetworkSimulator, NetworkSimulatorConfig, NetworkSimulatorStats};
pub use wav::{read_wav, write_wav, AudioData};
