//! Deterministic network impairment for RTP frames.
//!
//! Time is counted in 20ms frame slots rather than wall-clock time, so a
//! given seed always produces the same arrival sequence. Each slot the
//! caller sends the frame the far end produced and collects whatever
//! arrives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtp_ai_common::RtpFrame;

/// Network simulator configuration.
#[derive(Debug, Clone)]
pub struct NetworkSimulatorConfig {
    // ---
    /// Packet loss rate (0.0 to 1.0)
    pub loss_rate: f64,

    /// Maximum extra delay in frame slots; each packet gets 0..=jitter_frames
    pub jitter_frames: u32,

    /// Rate of packets held back behind later ones (0.0 to 1.0)
    pub reorder_rate: f64,

    /// Rate of packets delivered twice (0.0 to 1.0)
    pub duplicate_rate: f64,

    /// Random seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for NetworkSimulatorConfig {
    fn default() -> Self {
        // ---
        Self {
            loss_rate: 0.0,
            jitter_frames: 0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    due: u64,
    order: u64,
    frame: RtpFrame,
}

/// Applies loss, jitter, reordering and duplication to RTP frames.
///
/// # Example
///
/// ```
/// use bridge::{NetworkSimulator, NetworkSimulatorConfig};
/// use rtp_ai_common::RtpFrame;
///
/// let mut sim = NetworkSimulator::new(NetworkSimulatorConfig {
///     jitter_frames: 2,
///     seed: Some(42),
///     ..Default::default()
/// });
///
/// let mut arrived = Vec::new();
/// for n in 0..50u32 {
///     sim.send(RtpFrame::new(0, n * 160, vec![0xFF; 160]));
///     arrived.extend(sim.tick());
/// }
/// arrived.extend(sim.drain());
/// assert_eq!(arrived.len(), 50);
/// ```
pub struct NetworkSimulator {
    // ---
    config: NetworkSimulatorConfig,
    rng: StdRng,
    in_flight: Vec<InFlight>,
    now: u64,
    next_order: u64,
    stats: NetworkSimulatorStats,
}

impl NetworkSimulator {
    // ---
    /// Creates a simulator; rates outside 0.0..=1.0 are clamped.
    pub fn new(mut config: NetworkSimulatorConfig) -> Self {
        // ---
        config.loss_rate = probability(config.loss_rate);
        config.reorder_rate = probability(config.reorder_rate);
        config.duplicate_rate = probability(config.duplicate_rate);

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            rng,
            in_flight: Vec::new(),
            now: 0,
            next_order: 0,
            stats: NetworkSimulatorStats::default(),
        }
    }

    /// Sends a frame in the current slot.
    pub fn send(&mut self, frame: RtpFrame) {
        // ---
        self.stats.packets_sent += 1;

        if self.rng.gen_bool(self.config.loss_rate) {
            self.stats.packets_lost += 1;
            return;
        }

        let mut delay = self.jitter();
        if delay > 0 {
            self.stats.packets_delayed += 1;
        }

        // Held back long enough that a later packet overtakes it
        if self.rng.gen_bool(self.config.reorder_rate) {
            self.stats.packets_reordered += 1;
            delay += self.rng.gen_range(2..=3);
        }

        if self.rng.gen_bool(self.config.duplicate_rate) {
            self.stats.packets_duplicated += 1;
            let extra = self.jitter();
            self.schedule(frame.clone(), delay + extra);
        }

        self.schedule(frame, delay);
    }

    /// Advances one frame slot and returns the frames arriving in it.
    pub fn tick(&mut self) -> Vec<RtpFrame> {
        // ---
        self.now += 1;
        self.take_due(self.now)
    }

    /// Returns everything still in flight, in arrival order.
    pub fn drain(&mut self) -> Vec<RtpFrame> {
        // ---
        self.take_due(u64::MAX)
    }

    /// Frames sent but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &NetworkSimulatorStats {
        &self.stats
    }

    fn jitter(&mut self) -> u64 {
        // ---
        if self.config.jitter_frames == 0 {
            return 0;
        }
        self.rng.gen_range(0..=self.config.jitter_frames) as u64
    }

    fn schedule(&mut self, frame: RtpFrame, delay: u64) {
        // ---
        self.in_flight.push(InFlight {
            due: self.now + delay,
            order: self.next_order,
            frame,
        });
        self.next_order += 1;
    }

    fn take_due(&mut self, until: u64) -> Vec<RtpFrame> {
        // ---
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.in_flight.drain(..).partition(|p| p.due <= until);
        self.in_flight = pending;

        due.sort_by_key(|p| (p.due, p.order));
        self.stats.packets_delivered += due.len() as u64;
        due.into_iter().map(|p| p.frame).collect()
    }
}

fn probability(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Network simulator statistics.
#[derive(Debug, Clone, Default)]
pub struct NetworkSimulatorStats {
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub packets_delayed: u64,
    pub packets_reordered: u64,
    pub packets_duplicated: u64,
    pub packets_delivered: u64,
}

impl NetworkSimulatorStats {
    /// Fraction of sent packets that were lost.
    pub fn loss_rate(&self) -> f64 {
        // ---
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn frame(n: u32) -> RtpFrame {
        RtpFrame::new(0, n * 160, vec![n as u8])
    }

    fn run(config: NetworkSimulatorConfig, count: u32) -> (Vec<u32>, NetworkSimulatorStats) {
        // ---
        let mut sim = NetworkSimulator::new(config);
        let mut arrived = Vec::new();
        for n in 0..count {
            sim.send(frame(n));
            arrived.extend(sim.tick());
        }
        arrived.extend(sim.drain());
        let indices = arrived.iter().map(|f| f.rtp_timestamp / 160).collect();
        (indices, sim.stats().clone())
    }

    #[test]
    fn test_clean_network_delivers_in_order_next_slot() {
        // ---
        let mut sim = NetworkSimulator::new(NetworkSimulatorConfig::default());
        sim.send(frame(0));
        sim.send(frame(1));

        let arrived = sim.tick();
        assert_eq!(arrived.len(), 2);
        assert_eq!(arrived[0].rtp_timestamp, 0);
        assert_eq!(arrived[1].rtp_timestamp, 160);
        assert_eq!(sim.in_flight(), 0);
    }

    #[test]
    fn test_total_loss() {
        // ---
        let config = NetworkSimulatorConfig {
            loss_rate: 1.0,
            seed: Some(42),
            ..Default::default()
        };
        let (arrived, stats) = run(config, 10);

        assert!(arrived.is_empty());
        assert_eq!(stats.packets_lost, 10);
        assert_eq!(stats.loss_rate(), 1.0);
    }

    #[test]
    fn test_reordering_and_duplication() {
        // ---
        let config = NetworkSimulatorConfig {
            reorder_rate: 0.2,
            duplicate_rate: 0.2,
            seed: Some(7),
            ..Default::default()
        };
        let (arrived, stats) = run(config, 200);

        assert!(stats.packets_reordered > 0);
        assert!(stats.packets_duplicated > 0);
        assert_eq!(arrived.len() as u64, 200 + stats.packets_duplicated);
        assert!(arrived.windows(2).any(|w| w[0] > w[1]));
    }

    #[test]
    fn test_deterministic_with_seed() {
        // ---
        let config = NetworkSimulatorConfig {
            loss_rate: 0.3,
            jitter_frames: 3,
            reorder_rate: 0.1,
            duplicate_rate: 0.1,
            seed: Some(42),
        };

        let (first, _) = run(config.clone(), 300);
        let (second, _) = run(config, 300);
        assert_eq!(first, second);
    }
}
