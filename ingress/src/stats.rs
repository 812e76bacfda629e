//! Statistics for the ingress (phone → AI) direction.
//!
//! Tracks what the jitter buffer and decoder did with each RTP frame,
//! logged periodically for observability and quality monitoring.

use crate::jitter_buffer::InsertOutcome;
use std::time::{Duration, Instant};
use tracing::info;

/// Reception and concealment statistics for one call.
#[derive(Debug, Clone)]
pub struct IngressStats {
    // ---
    /// RTP frames accepted into the jitter buffer
    pub frames_received: u64,

    /// Frames discarded because their slot was already played
    pub frames_late: u64,

    /// Frames discarded as duplicates
    pub frames_duplicate: u64,

    /// Frames decoded from real payloads
    pub frames_decoded: u64,

    /// Frames synthesized by packet loss concealment
    pub frames_concealed: u64,

    /// PCM frames delivered to the AI side
    pub frames_emitted: u64,

    /// Payloads the codec could not decode
    pub codec_failures: u64,

    /// Jitter buffer resynchronizations
    pub resyncs: u64,

    /// Start time for rate calculations
    start_time: Instant,

    /// Last time stats were logged
    last_log_time: Instant,

    /// Interval between periodic logs
    log_interval: Duration,
}

impl IngressStats {
    // ---
    /// Creates a new stats tracker.
    ///
    /// # Arguments
    ///
    /// * `log_interval` - How often to automatically log stats
    pub fn new(log_interval: Duration) -> Self {
        // ---
        let now = Instant::now();
        Self {
            frames_received: 0,
            frames_late: 0,
            frames_duplicate: 0,
            frames_decoded: 0,
            frames_concealed: 0,
            frames_emitted: 0,
            codec_failures: 0,
            resyncs: 0,
            start_time: now,
            last_log_time: now,
            log_interval,
        }
    }

    /// Records what the jitter buffer did with an arriving frame.
    pub fn record_insert(&mut self, outcome: InsertOutcome) {
        // ---
        match outcome {
            InsertOutcome::Stored => self.frames_received += 1,
            InsertOutcome::Late => self.frames_late += 1,
            InsertOutcome::Duplicate => self.frames_duplicate += 1,
        }
    }

    /// Records one emitted PCM frame, real or concealed.
    pub fn record_emitted(&mut self, concealed: bool) {
        // ---
        self.frames_emitted += 1;
        if concealed {
            self.frames_concealed += 1;
        } else {
            self.frames_decoded += 1;
        }
        self.maybe_log();
    }

    pub fn record_codec_failure(&mut self) {
        self.codec_failures += 1;
    }

    /// Updates the resync count from the jitter buffer's counter.
    pub fn set_resyncs(&mut self, resyncs: u64) {
        self.resyncs = resyncs;
    }

    /// Percentage of emitted frames that had to be concealed.
    pub fn concealment_percentage(&self) -> f64 {
        // ---
        if self.frames_emitted == 0 {
            0.0
        } else {
            (self.frames_concealed as f64 / self.frames_emitted as f64) * 100.0
        }
    }

    /// Calculates frames per second delivered to the AI side.
    pub fn frames_per_second(&self) -> f64 {
        // ---
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.frames_emitted as f64 / elapsed
        }
    }

    /// Returns runtime duration.
    pub fn runtime(&self) -> Duration {
        // ---
        self.start_time.elapsed()
    }

    /// Logs statistics if interval has elapsed.
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
            "Ingress: {} frames out ({:.1}/s), {:.2}% concealed, {} late, {} dup, {} resyncs, {} codec errors",
            self.frames_emitted,
            self.frames_per_second(),
            self.concealment_percentage(),
            self.frames_late,
            self.frames_duplicate,
            self.resyncs,
            self.codec_failures
        );
    }
}

impl Default for IngressStats {
    fn default() -> Self {
        // ---
        Self::new(Duration::from_secs(5))
    }
}
