//! AI audio intake: a capped FIFO of 20ms PCM frames.
//!
//! The AI client pushes PCM16 LE bytes of arbitrary length through an
//! `EgressHandle`; the playout engine pops exactly one frame per tick.

use rtp_ai_common::{samples_per_frame, MetricsContext};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    // ---
    /// Sample rate of the PCM the AI sends
    pub ai_rate: u32,

    /// Frames held before the oldest are dropped (30s at 20ms)
    pub max_frames: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        // ---
        Self {
            ai_rate: 24000,
            max_frames: 1500,
        }
    }
}

/// FIFO of whole frames plus the not-yet-complete tail of the stream.
#[derive(Debug)]
pub struct PcmQueue {
    // ---
    frames: VecDeque<Vec<i16>>,

    /// Samples that do not fill a frame yet
    partial: Vec<i16>,

    /// Low byte of a sample split across two pushes
    pending_byte: Option<u8>,

    frame_len: usize,
    max_frames: usize,
    dropped: u64,
}

impl PcmQueue {
    // ---
    pub fn new(config: &QueueConfig) -> Self {
        // ---
        let frame_len = samples_per_frame(config.ai_rate).max(1);
        Self {
            frames: VecDeque::new(),
            partial: Vec::with_capacity(frame_len),
            pending_byte: None,
            frame_len,
            max_frames: config.max_frames.max(1),
            dropped: 0,
        }
    }

    /// Appends PCM16 LE bytes, completing frames as they fill.
    ///
    /// # Returns
    ///
    /// `(frames_completed, frames_dropped)` for this push.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> (usize, usize) {
        // ---
        let mut bytes = bytes;
        if let Some(low) = self.pending_byte.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    self.push_sample(i16::from_le_bytes([low, high]));
                    bytes = rest;
                }
                None => {
                    self.pending_byte = Some(low);
                    return (0, 0);
                }
            }
        }

        let before = self.frames.len() as isize;
        let dropped_before = self.dropped;

        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            self.push_sample(i16::from_le_bytes([pair[0], pair[1]]));
        }
        self.pending_byte = pairs.remainder().first().copied();

        let dropped = (self.dropped - dropped_before) as usize;
        let completed = (self.frames.len() as isize - before) as usize + dropped;
        (completed, dropped)
    }

    fn push_sample(&mut self, sample: i16) {
        // ---
        self.partial.push(sample);
        if self.partial.len() == self.frame_len {
            let frame = std::mem::replace(&mut self.partial, Vec::with_capacity(self.frame_len));
            self.frames.push_back(frame);
            if self.frames.len() > self.max_frames {
                self.frames.pop_front();
                self.dropped += 1;
            }
        }
    }

    /// Next whole frame, or the zero-padded partial tail when no whole
    /// frame is waiting.
    pub fn pop(&mut self) -> Option<Vec<i16>> {
        // ---
        if let Some(frame) = self.frames.pop_front() {
            return Some(frame);
        }
        if self.partial.is_empty() {
            return None;
        }
        let mut tail = std::mem::replace(&mut self.partial, Vec::with_capacity(self.frame_len));
        tail.resize(self.frame_len, 0);
        Some(tail)
    }

    /// Whole frames waiting.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.partial.is_empty()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Frames dropped because the cap was hit.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        // ---
        self.frames.clear();
        self.partial.clear();
        self.pending_byte = None;
    }
}

/// State shared between the AI-facing handle and the playout engine.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queue: Mutex<PcmQueue>,
    pub(crate) fade_in_requested: AtomicBool,

    /// Set once the call is over; nothing is emitted afterwards
    pub(crate) closed: AtomicBool,
}

/// Cloneable AI-facing side of the egress direction.
#[derive(Clone)]
pub struct EgressHandle {
    // ---
    shared: Arc<Shared>,
    metrics: Option<MetricsContext>,
}

impl EgressHandle {
    // ---
    pub(crate) fn new(config: &QueueConfig) -> Self {
        // ---
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(PcmQueue::new(config)),
                fade_in_requested: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            metrics: None,
        }
    }

    pub(crate) fn with_metrics(mut self, metrics: Option<MetricsContext>) -> Self {
        // ---
        self.metrics = metrics;
        self
    }

    /// Locks the queue; a panic elsewhere never wedges audio.
    pub(crate) fn queue(&self) -> MutexGuard<'_, PcmQueue> {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a pending fade-in request, if any.
    pub(crate) fn take_fade_in_request(&self) -> bool {
        self.shared.fade_in_requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Queues AI audio (PCM16 LE at the configured AI rate).
    ///
    /// Any length is accepted; an incomplete trailing frame waits for the
    /// next push or is zero-padded when playout runs dry.
    pub fn enqueue_pcm(&self, pcm: &[u8]) {
        // ---
        if self.is_closed() {
            debug!("Dropping {} bytes of AI audio after close", pcm.len());
            return;
        }
        let (completed, dropped, depth) = {
            let mut queue = self.queue();
            let (completed, dropped) = queue.push_bytes(pcm);
            (completed, dropped, queue.len())
        };

        if dropped > 0 {
            warn!("Egress queue full, dropped {} oldest frames", dropped);
        }
        if let Some(metrics) = &self.metrics {
            metrics.egress_queue_dropped_frames_total.inc_by(dropped as u64);
            metrics.egress_queue_depth_frames.set(depth as i64);
        }
        if completed > 0 {
            debug!("Queued {} frames ({} waiting)", completed, depth);
        }
    }

    /// Marks the next played frame as the start of a new response.
    pub fn reset_fade_in(&self) {
        self.shared.fade_in_requested.store(true, Ordering::Release);
    }

    /// Discards everything queued (barge-in).
    pub fn clear_queue(&self) {
        // ---
        let discarded = {
            let mut queue = self.queue();
            let n = queue.len();
            queue.clear();
            n
        };
        if let Some(metrics) = &self.metrics {
            metrics.egress_queue_depth_frames.set(0);
        }
        debug!("Cleared egress queue ({} frames discarded)", discarded);
    }

    /// Permanently silences this egress direction and drops its queue.
    ///
    /// A frame whose `on_encoded_frame_ready` call is already under way
    /// when this returns still completes; no frame starts after it.
    pub fn close(&self) {
        // ---
        self.shared.closed.store(true, Ordering::Release);
        self.clear_queue();
    }

    /// Whole frames waiting for playout.
    pub fn queued_frames(&self) -> usize {
        self.queue().len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn config() -> QueueConfig {
        QueueConfig {
            ai_rate: 8000,
            max_frames: 4,
        }
    }

    fn bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_push_splits_into_frames_and_keeps_remainder() {
        // ---
        let mut queue = PcmQueue::new(&config());
        let (completed, dropped) = queue.push_bytes(&bytes(&[1; 400]));

        assert_eq!((completed, dropped), (2, 0));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|f| f.len()), Some(160));
        assert_eq!(queue.pop().map(|f| f.len()), Some(160));

        // The 80-sample tail comes out zero-padded once nothing else is left
        let tail = queue.pop().expect("partial frame");
        assert_eq!(tail.len(), 160);
        assert_eq!(tail[79], 1);
        assert_eq!(tail[80], 0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_sample_split_across_pushes() {
        // ---
        let mut queue = PcmQueue::new(&config());
        let data = bytes(&[0x1234; 160]);

        queue.push_bytes(&data[..101]);
        queue.push_bytes(&data[101..]);

        let frame = queue.pop().expect("frame");
        assert!(frame.iter().all(|&s| s == 0x1234));
    }

    #[test]
    fn test_cap_drops_oldest() {
        // ---
        let mut queue = PcmQueue::new(&config());
        for value in 0..6i16 {
            queue.push_bytes(&bytes(&[value; 160]));
        }

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.pop().map(|f| f[0]), Some(2));
    }

    #[test]
    fn test_handle_clear_and_fade_request() {
        // ---
        let handle = EgressHandle::new(&config());
        handle.enqueue_pcm(&bytes(&[5; 500]));
        assert_eq!(handle.queued_frames(), 3);

        handle.clear_queue();
        assert_eq!(handle.queued_frames(), 0);
        assert!(handle.queue().is_empty());

        assert!(!handle.take_fade_in_request());
        handle.reset_fade_in();
        assert!(handle.take_fade_in_request());
        assert!(!handle.take_fade_in_request());
    }

    #[test]
    fn test_closed_handle_accepts_nothing() {
        // ---
        let handle = EgressHandle::new(&config());
        let ai_side = handle.clone();
        ai_side.enqueue_pcm(&bytes(&[5; 320]));

        handle.close();
        assert!(ai_side.is_closed());
        assert_eq!(ai_side.queued_frames(), 0);

        ai_side.enqueue_pcm(&bytes(&[5; 320]));
        assert_eq!(ai_side.queued_frames(), 0);
    }
}
