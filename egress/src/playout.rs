//! Egress playout engine: AI PCM in, one encoded RTP payload per 20ms tick.
//!
//! The engine is driven by a periodic tick (see `scheduler`). Each tick
//! emits exactly one frame, whether real audio, underrun interpolation
//! or silence, so the transport's RTP clock never stalls.

use crate::dsp::{EgressDsp, EgressDspConfig};
use crate::queue::{EgressHandle, QueueConfig};
use crate::stats::PlayoutStats;

use anyhow::{Context, Result};
use rtp_ai_common::{
    AudioEncoder, BridgeError, Codec, EgressEvents, MetricsContext, OpusConfig, Resampler,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Playout configuration.
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    // ---
    /// Frames queued before narrowband playback starts
    pub narrowband_prime_frames: usize,

    /// Frames queued before wideband playback starts
    pub wideband_prime_frames: usize,

    /// Ticks with audio waiting before priming gives up on a full buffer
    pub prime_timeout_ticks: u32,

    /// Underrun ticks filled by interpolation before falling to silence
    pub max_interpolated_ticks: u32,

    /// Return to priming after the queue drains
    pub reprime_on_underrun: bool,

    pub dsp: EgressDspConfig,
    pub queue: QueueConfig,
    pub opus: OpusConfig,

    /// Consecutive encoder failures before a call-level error is raised
    pub max_codec_failures: u32,

    /// How often stats are logged
    pub stats_interval: Duration,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        // ---
        Self {
            narrowband_prime_frames: 3,
            wideband_prime_frames: 5,
            prime_timeout_ticks: 10,
            max_interpolated_ticks: 3,
            reprime_on_underrun: false,
            dsp: EgressDspConfig::default(),
            queue: QueueConfig::default(),
            opus: OpusConfig::default(),
            max_codec_failures: 50,
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// What a tick emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Silence while the queue fills
    Priming,
    /// A frame of real AI audio
    Audio,
    /// A faded replay of the last real frame
    Interpolated,
    /// Silence after the queue ran dry
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Priming { waited: u32 },
    Playing,
    Underrun { ticks: u32, drained: bool },
}

/// Per-call egress playout engine.
///
/// # Example
///
/// ```
/// use egress::{PlayoutConfig, PlayoutEngine, TickOutcome};
/// use rtp_ai_common::{Codec, EgressEvents};
/// use std::sync::Arc;
///
/// struct Discard;
///
/// impl EgressEvents for Discard {
///     fn on_encoded_frame_ready(&self, duration: u32, payload: &[u8]) {
///         assert_eq!(duration, 160);
///         assert_eq!(payload.len(), 160);
///     }
/// }
///
/// let mut engine = PlayoutEngine::new(Codec::Pcmu, PlayoutConfig::default(), Arc::new(Discard)).unwrap();
/// let ai = engine.handle();
///
/// // 60ms of 24kHz PCM16 primes narrowband playout
/// ai.enqueue_pcm(&vec![0u8; 3 * 480 * 2]);
/// assert_eq!(engine.tick(), TickOutcome::Audio);
/// ```
pub struct PlayoutEngine {
    // ---
    codec: Codec,
    config: PlayoutConfig,
    events: Arc<dyn EgressEvents>,
    metrics: Option<MetricsContext>,

    handle: EgressHandle,
    encoder: AudioEncoder,
    resampler: Resampler,
    dsp: EgressDsp,

    phase: Phase,
    consecutive_failures: u32,
    failure_reported: bool,

    stats: PlayoutStats,
}

impl PlayoutEngine {
    // ---
    /// Creates an engine for the negotiated send codec.
    ///
    /// # Arguments
    ///
    /// * `codec` - Codec the transport sends with
    /// * `config` - Playout configuration
    /// * `events` - Receives encoded payloads, drain notifications and call errors
    ///
    /// # Errors
    ///
    /// Returns error if the encoder cannot be created.
    pub fn new(codec: Codec, config: PlayoutConfig, events: Arc<dyn EgressEvents>) -> Result<Self> {
        // ---
        let encoder = AudioEncoder::new(codec, &config.opus)
            .with_context(|| format!("failed to create {} encoder", codec))?;
        let handle = EgressHandle::new(&config.queue);
        let dsp = EgressDsp::new(config.dsp.clone(), codec.native_rate());
        let stats = PlayoutStats::new(config.stats_interval);

        info!(
            "Egress playout {} ({}Hz) from {}Hz AI audio, prime depth {}",
            codec,
            codec.native_rate(),
            config.queue.ai_rate,
            prime_frames(codec, &config)
        );

        Ok(Self {
            codec,
            config,
            events,
            metrics: None,
            handle,
            encoder,
            resampler: Resampler::new(),
            dsp,
            phase: Phase::Priming { waited: 0 },
            consecutive_failures: 0,
            failure_reported: false,
            stats,
        })
    }

    /// Attaches Prometheus metrics; call before handing out handles.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.handle = self.handle.clone().with_metrics(Some(metrics.clone()));
        self.metrics = Some(metrics);
        self
    }

    /// AI-facing handle feeding this engine.
    pub fn handle(&self) -> EgressHandle {
        self.handle.clone()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn stats(&self) -> &PlayoutStats {
        &self.stats
    }

    pub fn is_priming(&self) -> bool {
        matches!(self.phase, Phase::Priming { .. })
    }

    /// Emits exactly one encoded frame.
    pub fn tick(&mut self) -> TickOutcome {
        // ---
        let start = Instant::now();

        if self.handle.take_fade_in_request() {
            self.dsp.request_fade_in();
        }

        let outcome = match self.phase {
            Phase::Priming { waited } => self.prime(waited),
            Phase::Playing | Phase::Underrun { .. } => self.play(),
        };

        self.stats.record_tick(outcome);
        if let Some(metrics) = &self.metrics {
            metrics
                .egress_queue_depth_frames
                .set(self.handle.queued_frames() as i64);
            metrics
                .egress_tick_seconds
                .observe(start.elapsed().as_secs_f64());
        }
        outcome
    }

    /// Returns to the initial state and discards queued audio.
    pub fn reset(&mut self) {
        // ---
        if self.stats.frames_sent > 0 {
            self.stats.log();
        }

        self.handle.clear_queue();
        self.handle.take_fade_in_request();

        match AudioEncoder::new(self.codec, &self.config.opus) {
            Ok(encoder) => self.encoder = encoder,
            Err(e) => warn!("Keeping previous {} encoder: {:#}", self.codec, e),
        }
        self.resampler.reset();
        self.dsp.reset();
        self.phase = Phase::Priming { waited: 0 };
        self.consecutive_failures = 0;
        self.failure_reported = false;
        self.stats = PlayoutStats::new(self.config.stats_interval);
        debug!("Playout engine reset");
    }

    fn prime(&mut self, waited: u32) -> TickOutcome {
        // ---
        let (queued, has_audio) = {
            let queue = self.handle.queue();
            (queue.len(), !queue.is_empty())
        };

        let target = prime_frames(self.codec, &self.config);
        let timed_out = has_audio && waited + 1 >= self.config.prime_timeout_ticks;
        if queued >= target || timed_out {
            debug!("Playout primed with {} frames", queued);
            self.phase = Phase::Playing;
            return self.play();
        }

        self.phase = Phase::Priming {
            waited: if has_audio { waited + 1 } else { 0 },
        };
        let silence = self.dsp.silence(self.codec.samples_per_frame());
        self.send(&silence);
        TickOutcome::Priming
    }

    fn play(&mut self) -> TickOutcome {
        // ---
        let next = self.handle.queue().pop();
        let Some(ai_frame) = next else {
            return self.underrun();
        };

        if let Phase::Underrun { ticks, .. } = self.phase {
            debug!("Playout resumed after {} underrun ticks", ticks);
        }
        self.phase = Phase::Playing;

        let mut samples =
            self.resampler
                .convert(&ai_frame, self.config.queue.ai_rate, self.codec.native_rate());
        self.dsp.process(&mut samples);
        self.send(&samples);
        TickOutcome::Audio
    }

    fn underrun(&mut self) -> TickOutcome {
        // ---
        let (ticks, drained) = match self.phase {
            Phase::Underrun { ticks, drained } => (ticks.saturating_add(1), drained),
            _ => {
                debug!("Egress queue underrun");
                self.stats.record_underrun();
                if let Some(metrics) = &self.metrics {
                    metrics.egress_underruns_total.inc();
                }
                (1, false)
            }
        };

        if ticks <= self.config.max_interpolated_ticks && self.dsp.has_last_frame() {
            self.phase = Phase::Underrun { ticks, drained };
            let samples = self.dsp.underrun(ticks);
            self.send(&samples);
            return TickOutcome::Interpolated;
        }

        let silence = self.dsp.silence(self.codec.samples_per_frame());
        self.send(&silence);

        if !drained {
            debug!("Egress queue drained after {} underrun ticks", ticks);
            self.resampler.reset();
            self.events.on_queue_drained();
        }

        self.phase = if self.config.reprime_on_underrun {
            Phase::Priming { waited: 0 }
        } else {
            Phase::Underrun {
                ticks,
                drained: true,
            }
        };
        TickOutcome::Silence
    }

    /// Encodes and emits one native-rate frame; a failed encode sends silence.
    fn send(&mut self, samples: &[i16]) {
        // ---
        if self.handle.is_closed() {
            return;
        }
        let start = Instant::now();
        let payload = match self.encoder.encode(samples) {
            Ok(payload) => {
                self.codec_succeeded();
                payload
            }
            Err(e) => {
                self.codec_failed(&e);
                match self.encoder.encode(&vec![0; samples.len()]) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!("Dropping egress frame: {}", e);
                        return;
                    }
                }
            }
        };

        self.events
            .on_encoded_frame_ready(self.codec.timestamp_increment(), &payload);

        self.stats.record_sent();
        if let Some(metrics) = &self.metrics {
            metrics.egress_frames_sent_total.inc();
            metrics.encode_seconds.observe(start.elapsed().as_secs_f64());
        }
    }

    fn codec_succeeded(&mut self) {
        // ---
        self.consecutive_failures = 0;
        self.failure_reported = false;
    }

    fn codec_failed(&mut self, error: &BridgeError) {
        // ---
        self.consecutive_failures += 1;
        self.stats.record_codec_failure();
        if let Some(metrics) = &self.metrics {
            metrics.codec_failures_total.inc();
        }

        if self.consecutive_failures == 1 {
            warn!("{} encode failed, sending silence: {}", self.codec, error);
        } else {
            debug!("{} encode failed ({} in a row)", self.codec, self.consecutive_failures);
        }

        if self.consecutive_failures >= self.config.max_codec_failures && !self.failure_reported {
            self.failure_reported = true;
            let error = BridgeError::CodecFailure {
                codec: self.codec,
                consecutive: self.consecutive_failures,
            };
            warn!("Egress audio stalled: {}", error);
            self.events.on_call_error(&error);
        }
    }
}

fn prime_frames(codec: Codec, config: &PlayoutConfig) -> usize {
    // ---
    if codec.is_wideband() {
        config.wideband_prime_frames
    } else {
        config.narrowband_prime_frames
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(u32, usize)>>,
        drained: Mutex<u32>,
    }

    impl EgressEvents for Recorder {
        fn on_encoded_frame_ready(&self, duration: u32, payload: &[u8]) {
            self.frames.lock().unwrap().push((duration, payload.len()));
        }

        fn on_queue_drained(&self) {
            *self.drained.lock().unwrap() += 1;
        }
    }

    fn engine(codec: Codec, config: PlayoutConfig) -> (PlayoutEngine, Arc<Recorder>) {
        // ---
        let recorder = Arc::new(Recorder::default());
        let engine = PlayoutEngine::new(codec, config, recorder.clone()).unwrap();
        (engine, recorder)
    }

    fn ai_frames(count: usize) -> Vec<u8> {
        vec![0x10; count * 480 * 2]
    }

    #[test]
    fn test_priming_depth_depends_on_bandwidth() {
        // ---
        let (mut narrow, _) = engine(Codec::Pcma, PlayoutConfig::default());
        narrow.handle().enqueue_pcm(&ai_frames(2));
        assert_eq!(narrow.tick(), TickOutcome::Priming);
        narrow.handle().enqueue_pcm(&ai_frames(1));
        assert_eq!(narrow.tick(), TickOutcome::Audio);

        let (mut wide, _) = engine(Codec::G722, PlayoutConfig::default());
        wide.handle().enqueue_pcm(&ai_frames(4));
        assert_eq!(wide.tick(), TickOutcome::Priming);
        wide.handle().enqueue_pcm(&ai_frames(1));
        assert_eq!(wide.tick(), TickOutcome::Audio);
    }

    #[test]
    fn test_priming_emits_frames_on_every_tick() {
        // ---
        let (mut engine, recorder) = engine(Codec::G722, PlayoutConfig::default());
        for _ in 0..4 {
            assert_eq!(engine.tick(), TickOutcome::Priming);
        }

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|&(duration, len)| duration == 320 && len == 160));
    }

    #[test]
    fn test_short_response_plays_after_prime_timeout() {
        // ---
        let config = PlayoutConfig {
            prime_timeout_ticks: 3,
            ..Default::default()
        };
        let (mut engine, _) = engine(Codec::Pcmu, config);
        engine.handle().enqueue_pcm(&[0x10; 100]);

        assert_eq!(engine.tick(), TickOutcome::Priming);
        assert_eq!(engine.tick(), TickOutcome::Priming);
        assert_eq!(engine.tick(), TickOutcome::Audio);
    }

    #[test]
    fn test_reprime_after_drain() {
        // ---
        let config = PlayoutConfig {
            reprime_on_underrun: true,
            max_interpolated_ticks: 0,
            ..Default::default()
        };
        let (mut engine, recorder) = engine(Codec::Pcmu, config);
        engine.handle().enqueue_pcm(&ai_frames(3));

        for _ in 0..3 {
            assert_eq!(engine.tick(), TickOutcome::Audio);
        }
        assert_eq!(engine.tick(), TickOutcome::Silence);
        assert!(engine.is_priming());
        assert_eq!(engine.tick(), TickOutcome::Priming);
        assert_eq!(*recorder.drained.lock().unwrap(), 1);
    }

    #[test]
    fn test_reset_discards_queue_and_reprimes() {
        // ---
        let (mut engine, _) = engine(Codec::Pcmu, PlayoutConfig::default());
        let handle = engine.handle();
        handle.enqueue_pcm(&ai_frames(10));
        engine.tick();

        engine.reset();
        assert_eq!(handle.queued_frames(), 0);
        assert!(engine.is_priming());
        assert_eq!(engine.stats().frames_sent, 0);
    }
}
