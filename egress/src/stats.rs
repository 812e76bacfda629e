//! Statistics for the egress (AI → phone) direction.

use crate::playout::TickOutcome;
use std::time::{Duration, Instant};
use tracing::info;

/// Playout statistics for one call.
#[derive(Debug, Clone)]
pub struct PlayoutStats {
    // ---
    /// Encoded frames handed to the transport
    pub frames_sent: u64,

    /// Ticks that played real AI audio
    pub audio_frames: u64,

    /// Ticks filled by underrun interpolation
    pub interpolated_frames: u64,

    /// Ticks filled with silence after the queue ran dry
    pub silence_frames: u64,

    /// Ticks spent priming
    pub priming_frames: u64,

    /// Underrun episodes
    pub underruns: u64,

    /// Frames the encoder failed on
    pub codec_failures: u64,

    start_time: Instant,
    last_log_time: Instant,
    log_interval: Duration,
}

impl PlayoutStats {
    // ---
    pub fn new(log_interval: Duration) -> Self {
        // ---
        let now = Instant::now();
        Self {
            frames_sent: 0,
            audio_frames: 0,
            interpolated_frames: 0,
            silence_frames: 0,
            priming_frames: 0,
            underruns: 0,
            codec_failures: 0,
            start_time: now,
            last_log_time: now,
            log_interval,
        }
    }

    /// Records one tick.
    pub fn record_tick(&mut self, outcome: TickOutcome) {
        // ---
        match outcome {
            TickOutcome::Priming => self.priming_frames += 1,
            TickOutcome::Audio => self.audio_frames += 1,
            TickOutcome::Interpolated => self.interpolated_frames += 1,
            TickOutcome::Silence => self.silence_frames += 1,
        }
        self.maybe_log();
    }

    pub fn record_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn record_underrun(&mut self) {
        self.underruns += 1;
    }

    pub fn record_codec_failure(&mut self) {
        self.codec_failures += 1;
    }

    /// Ticks that played something other than real audio, as a percentage.
    pub fn filler_percentage(&self) -> f64 {
        // ---
        let total = self.audio_frames + self.interpolated_frames + self.silence_frames;
        if total == 0 {
            0.0
        } else {
            ((self.interpolated_frames + self.silence_frames) as f64 / total as f64) * 100.0
        }
    }

    pub fn runtime(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn maybe_log(&mut self) {
        // ---
        if self.last_log_time.elapsed() >= self.log_interval {
            self.log();
            self.last_log_time = Instant::now();
        }
    }

    /// Force log current statistics.
    pub fn log(&self) {
        // ---
        info!(
            "Egress: {} frames sent over {:.1}s, {} audio / {} interpolated / {} silence, {} underruns, {} codec errors",
            self.frames_sent,
            self.runtime().as_secs_f64(),
            self.audio_frames,
            self.interpolated_frames,
            self.silence_frames,
            self.underruns,
            self.codec_failures
        );
    }
}

impl Default for PlayoutStats {
    fn default() -> Self {
        // ---
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_filler_percentage_ignores_priming() {
        // ---
        let mut stats = PlayoutStats::default();
        for outcome in [
            TickOutcome::Priming,
            TickOutcome::Priming,
            TickOutcome::Audio,
            TickOutcome::Audio,
            TickOutcome::Audio,
            TickOutcome::Interpolated,
        ] {
            stats.record_tick(outcome);
        }

        assert_eq!(stats.priming_frames, 2);
        assert_eq!(stats.filler_percentage(), 25.0);
    }
}
