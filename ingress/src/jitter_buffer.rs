//! Timestamp-keyed jitter buffer with priming, bounded concealment and resync.
//!
//! Frames are stored by unwrapped RTP timestamp, so reordering is absorbed
//! by the map and a stream crossing `u32::MAX` keeps increasing keys.
//!
//! ```text
//!            count >= prime_depth
//!  Filling ───────────────────────▶ Draining
//!     ▲                                │
//!     └────────────────────────────────┘
//!       misses > max_conceal and count < prime_depth
//! ```

use rtp_ai_common::{RtpFrame, TimestampUnwrapper};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Smallest accepted priming depth, in frames
pub const MIN_PRIME_DEPTH: usize = 3;

/// Largest accepted priming depth, in frames
pub const MAX_PRIME_DEPTH: usize = 12;

/// Jitter buffer configuration.
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    // ---
    /// Frames to accumulate before draining starts (clamped to 3..=12)
    pub prime_depth: usize,

    /// Consecutive missing frames concealed before resync or wait
    pub max_conceal: u32,

    /// Safety cap on stored frames; the oldest is dropped beyond it
    pub max_frames: usize,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        // ---
        Self {
            prime_depth: 3, // 60ms at 20ms frames
            max_conceal: 2,
            max_frames: 100,
        }
    }
}

/// Result of offering a frame to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,

    /// Same timestamp already buffered; the first copy is kept
    Duplicate,

    /// Its playout slot has already been drained or concealed
    Late,
}

/// Result of one pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled {
    /// Next frame in timestamp order
    Frame(RtpFrame),

    /// The expected frame is missing; synthesize one.
    /// `consecutive` counts misses in the current run, starting at 1.
    Conceal { consecutive: u32 },

    /// Nothing to play this cycle
    Wait,
}

/// Lifetime counters, read by stats and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterCounters {
    // ---
    pub stored: u64,
    pub duplicates: u64,
    pub late: u64,
    pub overflow_drops: u64,
    pub drained: u64,
    pub concealed: u64,
    pub resyncs: u64,
}

/// Snapshot of buffer state for debugging and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterBufferStatus {
    pub buffered_frames: usize,
    pub is_synchronized: bool,
    pub next_expected_timestamp: Option<u32>,
    pub consecutive_missing: u32,
}

/// Reorder buffer that releases frames strictly in timestamp order.
///
/// # Example
///
/// ```
/// use ingress::jitter_buffer::{JitterBuffer, JitterBufferConfig, Pulled};
/// use rtp_ai_common::RtpFrame;
///
/// let mut buffer = JitterBuffer::new(JitterBufferConfig::default(), 160);
///
/// // Arrival order 320, 0, 160
/// for ts in [320, 0, 160] {
///     buffer.insert(RtpFrame::new(8, ts, vec![0xD5; 160]));
/// }
///
/// match buffer.pull() {
///     Pulled::Frame(frame) => assert_eq!(frame.rtp_timestamp, 0),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub struct JitterBuffer {
    // ---
    config: JitterBufferConfig,

    /// RTP timestamp advance per frame for the negotiated codec
    timestamp_increment: u64,

    frames: BTreeMap<u64, RtpFrame>,
    unwrapper: TimestampUnwrapper,

    /// Slot to play next; everything below it has been played or concealed
    next_expected: Option<u64>,

    is_synchronized: bool,
    consecutive_missing: u32,
    counters: JitterCounters,
}

impl JitterBuffer {
    // ---
    /// Creates an empty buffer in the Filling state.
    ///
    /// # Arguments
    ///
    /// * `config` - Buffer configuration; `prime_depth` is clamped to 3..=12
    /// * `timestamp_increment` - RTP timestamp units per 20ms frame
    pub fn new(mut config: JitterBufferConfig, timestamp_increment: u32) -> Self {
        // ---
        config.prime_depth = config.prime_depth.clamp(MIN_PRIME_DEPTH, MAX_PRIME_DEPTH);
        config.max_frames = config.max_frames.max(config.prime_depth);

        Self {
            config,
            timestamp_increment: timestamp_increment.max(1) as u64,
            frames: BTreeMap::new(),
            unwrapper: TimestampUnwrapper::new(),
            next_expected: None,
            is_synchronized: false,
            consecutive_missing: 0,
            counters: JitterCounters::default(),
        }
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }

    /// Offers a frame to the buffer.
    ///
    /// Frames whose slot has already been played or concealed are late;
    /// a second frame with a buffered timestamp is a duplicate.
    pub fn insert(&mut self, frame: RtpFrame) -> InsertOutcome {
        // ---
        let key = self.unwrapper.unwrap(frame.rtp_timestamp);

        if self.next_expected.is_some_and(|next| key < next) {
            debug!(
                "Discarding late frame: ts={} (expected {:?})",
                frame.rtp_timestamp,
                self.next_expected_timestamp()
            );
            self.counters.late += 1;
            return InsertOutcome::Late;
        }

        if self.frames.contains_key(&key) {
            debug!("Discarding duplicate frame: ts={}", frame.rtp_timestamp);
            self.counters.duplicates += 1;
            return InsertOutcome::Duplicate;
        }

        self.frames.insert(key, frame);
        self.counters.stored += 1;

        if self.frames.len() > self.config.max_frames {
            if let Some((_, dropped)) = self.frames.pop_first() {
                warn!("Jitter buffer full, dropping oldest frame ts={}", dropped.rtp_timestamp);
                self.counters.overflow_drops += 1;
                self.next_expected = self.frames.keys().next().copied().or(self.next_expected);
            }
        }

        InsertOutcome::Stored
    }

    /// Releases the next playout unit.
    ///
    /// Concealment is bounded: after `max_conceal` consecutive misses the
    /// buffer either resyncs to its lowest stored frame (when at least
    /// `prime_depth` frames are held) or falls back to Filling.
    pub fn pull(&mut self) -> Pulled {
        // ---
        if !self.is_synchronized {
            if self.frames.len() < self.config.prime_depth {
                return Pulled::Wait;
            }
            self.synchronize();
        }
        self.next_unit(false)
    }

    /// Releases the next unit regardless of priming; `None` once empty.
    ///
    /// Used at end of stream to play out whatever is still buffered.
    pub fn drain_next(&mut self) -> Option<Pulled> {
        // ---
        if self.frames.is_empty() {
            return None;
        }
        if !self.is_synchronized {
            self.synchronize();
        }
        Some(self.next_unit(true))
    }

    fn next_unit(&mut self, draining: bool) -> Pulled {
        // ---
        let Some(next) = self.next_expected else {
            return Pulled::Wait;
        };

        if let Some(frame) = self.frames.remove(&next) {
            self.consecutive_missing = 0;
            self.next_expected = Some(next + self.timestamp_increment);
            self.counters.drained += 1;
            return Pulled::Frame(frame);
        }

        if self.consecutive_missing < self.config.max_conceal {
            self.consecutive_missing += 1;
            self.next_expected = Some(next + self.timestamp_increment);
            self.counters.concealed += 1;
            return Pulled::Conceal {
                consecutive: self.consecutive_missing,
            };
        }

        if draining || self.frames.len() >= self.config.prime_depth {
            self.resync();
            return self.next_unit(draining);
        }

        debug!(
            "Jitter buffer starved after {} concealed frames, refilling",
            self.consecutive_missing
        );
        self.is_synchronized = false;
        Pulled::Wait
    }

    /// Starts (or restarts) draining at the lowest stored timestamp.
    fn synchronize(&mut self) {
        // ---
        let Some(&lowest) = self.frames.keys().next() else {
            return;
        };

        if self.next_expected.is_some_and(|next| next != lowest) {
            self.resync();
        } else {
            debug!("Jitter buffer primed with {} frames", self.frames.len());
            self.next_expected = Some(lowest);
            self.consecutive_missing = 0;
        }
        self.is_synchronized = true;
    }

    fn resync(&mut self) {
        // ---
        let Some(&lowest) = self.frames.keys().next() else {
            return;
        };
        let skipped = self
            .next_expected
            .map(|next| lowest.saturating_sub(next) / self.timestamp_increment)
            .unwrap_or(0);

        info!(
            "Jitter buffer resync: jumping {} frames to ts={}",
            skipped, lowest as u32
        );
        self.counters.resyncs += 1;
        self.next_expected = Some(lowest);
        self.consecutive_missing = 0;
    }

    fn next_expected_timestamp(&self) -> Option<u32> {
        self.next_expected.map(|next| next as u32)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn counters(&self) -> JitterCounters {
        self.counters
    }

    /// Returns current buffer status for debugging.
    pub fn status(&self) -> JitterBufferStatus {
        // ---
        JitterBufferStatus {
            buffered_frames: self.frames.len(),
            is_synchronized: self.is_synchronized,
            next_expected_timestamp: self.next_expected_timestamp(),
            consecutive_missing: self.consecutive_missing,
        }
    }

    /// Returns to the initial Filling state and forgets all frames.
    pub fn reset(&mut self) {
        // ---
        self.frames.clear();
        self.unwrapper.reset();
        self.next_expected = None;
        self.is_synchronized = false;
        self.consecutive_missing = 0;
        self.counters = JitterCounters::default();
    }
}
