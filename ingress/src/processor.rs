//! Ingress audio processor: RTP frames in, fixed 20ms PCM frames out.
//!
//! Jitter buffer → decode (or conceal) → ingress DSP → resample to the
//! AI rate → `IngressEvents::on_pcm_frame_ready`. Driven by the transport's
//! receive path; nothing here blocks or returns errors to the caller.

use crate::dsp::{IngressDsp, IngressDspConfig};
use crate::jitter_buffer::{
    InsertOutcome, JitterBuffer, JitterBufferConfig, JitterBufferStatus, Pulled,
};
use crate::stats::IngressStats;

use anyhow::{Context, Result};
use rtp_ai_common::frame::{fit_to_len, samples_to_le_bytes};
use rtp_ai_common::{
    AudioDecoder, BridgeError, Codec, CodecMap, IngressEvents, MetricsContext, OpusConfig,
    Resampler, RtpFrame,
};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ingress pipeline configuration.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    // ---
    /// Sample rate of the PCM delivered to the AI side
    pub target_rate: u32,

    pub jitter: JitterBufferConfig,
    pub dsp: IngressDspConfig,
    pub opus: OpusConfig,

    /// Gain applied to the replayed frame on each concealed miss
    pub plc_attenuation: f32,

    /// Consecutive codec failures before a call-level error is raised
    pub max_codec_failures: u32,

    /// How often stats are logged
    pub stats_interval: Duration,
}

impl Default for IngressConfig {
    fn default() -> Self {
        // ---
        Self {
            target_rate: 16000,
            jitter: JitterBufferConfig::default(),
            dsp: IngressDspConfig::default(),
            opus: OpusConfig::default(),
            plc_attenuation: 0.92,
            max_codec_failures: 50, // one second of audio
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// Negotiated codecs and the jitter buffer sized for them.
struct Session {
    codecs: CodecMap,
    primary: Codec,
    jitter: JitterBuffer,
}

/// Per-call ingress pipeline.
///
/// # Example
///
/// ```
/// use ingress::{IngressConfig, IngressProcessor};
/// use rtp_ai_common::{Codec, CodecMap, IngressEvents, RtpFrame};
/// use std::sync::{Arc, Mutex};
///
/// #[derive(Default)]
/// struct Collect(Mutex<Vec<usize>>);
///
/// impl IngressEvents for Collect {
///     fn on_pcm_frame_ready(&self, pcm: &[u8]) {
///         self.0.lock().unwrap().push(pcm.len());
///     }
/// }
///
/// let sink = Arc::new(Collect::default());
/// let mut processor = IngressProcessor::new(IngressConfig::default(), sink.clone());
/// processor.on_codec_negotiated(CodecMap::single(Codec::Pcmu)).unwrap();
///
/// for i in 0..5u32 {
///     processor.on_rtp_packet(RtpFrame::new(0, i * 160, vec![0xFF; 160]));
/// }
/// processor.flush();
///
/// // 20ms at 16kHz, PCM16
/// assert!(sink.0.lock().unwrap().iter().all(|&len| len == 640));
/// ```
pub struct IngressProcessor {
    // ---
    config: IngressConfig,
    events: Arc<dyn IngressEvents>,
    metrics: Option<MetricsContext>,

    session: Option<Session>,
    decoders: HashMap<Codec, AudioDecoder>,

    /// Codec of the most recently decoded frame; concealment follows it
    last_codec: Option<Codec>,

    /// Last decoded native-rate frame, replayed (attenuated) on loss
    plc_frame: Option<(Codec, Vec<i16>)>,

    dsp: IngressDsp,
    resampler: Resampler,

    consecutive_failures: u32,
    failure_reported: bool,
    warned_payload_types: HashSet<u8>,

    stats: IngressStats,
}

impl IngressProcessor {
    // ---
    /// Creates an idle processor; nothing is emitted until a codec is negotiated.
    ///
    /// # Arguments
    ///
    /// * `config` - Pipeline configuration
    /// * `events` - Receives emitted PCM frames and call-level errors
    pub fn new(config: IngressConfig, events: Arc<dyn IngressEvents>) -> Self {
        // ---
        let dsp = IngressDsp::new(config.dsp.clone());
        let stats = IngressStats::new(config.stats_interval);
        Self {
            config,
            events,
            metrics: None,
            session: None,
            decoders: HashMap::new(),
            last_codec: None,
            plc_frame: None,
            dsp,
            resampler: Resampler::new(),
            consecutive_failures: 0,
            failure_reported: false,
            warned_payload_types: HashSet::new(),
            stats,
        }
    }

    /// Attaches Prometheus metrics.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Installs the negotiated codec map and starts a fresh jitter buffer.
    ///
    /// # Errors
    ///
    /// Returns error if the map is empty or the primary decoder cannot be
    /// created.
    pub fn on_codec_negotiated(&mut self, codecs: CodecMap) -> Result<()> {
        // ---
        let primary = codecs.primary().ok_or(BridgeError::NotNegotiated)?;

        self.decoders.clear();
        let decoder = AudioDecoder::new(primary, &self.config.opus)
            .with_context(|| format!("failed to create {} decoder", primary))?;
        self.decoders.insert(primary, decoder);

        let jitter = JitterBuffer::new(self.config.jitter.clone(), primary.timestamp_increment());
        info!(
            "Ingress negotiated {} ({}Hz) -> {}Hz, prime depth {}",
            primary,
            primary.native_rate(),
            self.config.target_rate,
            jitter.config().prime_depth
        );

        self.session = Some(Session {
            codecs,
            primary,
            jitter,
        });
        self.last_codec = None;
        self.plc_frame = None;
        self.warned_payload_types.clear();
        Ok(())
    }

    /// Accepts one RTP frame from the transport.
    ///
    /// Each newly stored frame pays for one pull; late and duplicate
    /// arrivals are counted and dropped without advancing playout.
    /// Returns `true` if a PCM frame was emitted.
    pub fn on_rtp_packet(&mut self, frame: RtpFrame) -> bool {
        // ---
        let Some(session) = self.session.as_mut() else {
            debug!("Dropping RTP frame before codec negotiation");
            return false;
        };

        let outcome = session.jitter.insert(frame);
        self.stats.record_insert(outcome);
        if let Some(metrics) = &self.metrics {
            match outcome {
                InsertOutcome::Stored => metrics.rtp_frames_received_total.inc(),
                InsertOutcome::Late => metrics.rtp_frames_late_total.inc(),
                InsertOutcome::Duplicate => metrics.rtp_frames_duplicate_total.inc(),
            }
        }

        if outcome != InsertOutcome::Stored {
            return false;
        }
        self.poll()
    }

    /// Runs one jitter buffer pull; returns `true` if a frame was emitted.
    pub fn poll(&mut self) -> bool {
        // ---
        let pulled = match self.session.as_mut() {
            Some(session) => session.jitter.pull(),
            None => return false,
        };
        self.handle(pulled)
    }

    /// Plays out everything still buffered, in order, ignoring priming.
    ///
    /// Returns the number of frames emitted.
    pub fn flush(&mut self) -> usize {
        // ---
        let mut emitted = 0;
        loop {
            let pulled = match self.session.as_mut().and_then(|s| s.jitter.drain_next()) {
                None | Some(Pulled::Wait) => break,
                Some(pulled) => pulled,
            };
            if self.handle(pulled) {
                emitted += 1;
            }
        }
        emitted
    }

    /// Returns every per-call entity to its initial state.
    ///
    /// The next call must negotiate again before frames are accepted.
    pub fn on_call_reset(&mut self) {
        // ---
        if self.stats.frames_emitted > 0 {
            self.stats.log();
        }

        self.session = None;
        self.decoders.clear();
        self.last_codec = None;
        self.plc_frame = None;
        self.dsp.reset();
        self.resampler.reset();
        self.consecutive_failures = 0;
        self.failure_reported = false;
        self.warned_payload_types.clear();
        self.stats = IngressStats::new(self.config.stats_interval);
        debug!("Ingress processor reset");
    }

    fn handle(&mut self, pulled: Pulled) -> bool {
        // ---
        let start = Instant::now();
        let Some(primary) = self.session.as_ref().map(|s| s.primary) else {
            return false;
        };

        let (codec, mut samples, concealed) = match pulled {
            Pulled::Frame(frame) => {
                let (codec, samples) = self.decode_frame(&frame, primary);
                (codec, samples, false)
            }
            Pulled::Conceal { consecutive } => {
                let codec = self.last_codec.unwrap_or(primary);
                debug!("Concealing missing frame ({} in a row)", consecutive);
                (codec, self.conceal(codec), true)
            }
            Pulled::Wait => return false,
        };

        self.dsp.process(&mut samples);
        let pcm = self
            .resampler
            .convert(&samples, codec.native_rate(), self.config.target_rate);
        self.events.on_pcm_frame_ready(&samples_to_le_bytes(&pcm));

        self.stats.record_emitted(concealed);
        self.observe(concealed, start);
        true
    }

    fn observe(&mut self, concealed: bool, start: Instant) {
        // ---
        let Some(session) = &self.session else {
            return;
        };
        let resyncs = session.jitter.counters().resyncs;
        let depth = session.jitter.len();

        if let Some(metrics) = &self.metrics {
            metrics.ingress_frames_emitted_total.inc();
            if concealed {
                metrics.frames_concealed_total.inc();
            }
            if resyncs > self.stats.resyncs {
                metrics.jitter_resyncs_total.inc_by(resyncs - self.stats.resyncs);
            }
            metrics.jitter_buffer_depth_frames.set(depth as i64);
            metrics
                .ingress_pipeline_seconds
                .observe(start.elapsed().as_secs_f64());
        }
        self.stats.set_resyncs(resyncs);
    }

    /// Maps a payload type to a codec, falling back to the primary codec.
    fn codec_for(&mut self, payload_type: u8, primary: Codec) -> Codec {
        // ---
        if let Some(codec) = self.session.as_ref().and_then(|s| s.codecs.get(payload_type)) {
            return codec;
        }
        if self.warned_payload_types.insert(payload_type) {
            warn!(
                "{}; decoding as {}",
                BridgeError::UnsupportedPayloadType(payload_type),
                primary
            );
        }
        primary
    }

    fn decoder_for(&mut self, codec: Codec) -> Result<&mut AudioDecoder> {
        // ---
        match self.decoders.entry(codec) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(AudioDecoder::new(codec, &self.config.opus)?)),
        }
    }

    /// Decodes one payload to exactly one native-rate frame.
    fn decode_frame(&mut self, frame: &RtpFrame, primary: Codec) -> (Codec, Vec<i16>) {
        // ---
        let codec = self.codec_for(frame.payload_type, primary);
        let frame_len = codec.samples_per_frame();

        let start = Instant::now();
        let decoded = match self.decoder_for(codec) {
            Ok(decoder) => decoder.decode(&frame.payload),
            Err(e) => {
                warn!("No {} decoder available: {:#}", codec, e);
                return (codec, vec![0; frame_len]);
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.decode_seconds.observe(start.elapsed().as_secs_f64());
        }

        match decoded {
            Ok(mut samples) => {
                self.codec_succeeded();
                fit_to_len(&mut samples, frame_len);
                self.last_codec = Some(codec);
                self.plc_frame = Some((codec, samples.clone()));
                (codec, samples)
            }
            Err(e) => {
                self.codec_failed(codec, &e);
                (codec, vec![0; frame_len])
            }
        }
    }

    /// Synthesizes a frame for a missing slot.
    ///
    /// Opus uses its own concealment; other codecs replay the last decoded
    /// frame, attenuated further on every consecutive miss.
    fn conceal(&mut self, codec: Codec) -> Vec<i16> {
        // ---
        let frame_len = codec.samples_per_frame();

        let native = match self.decoder_for(codec) {
            Ok(decoder) => decoder.conceal(),
            Err(_) => None,
        };
        match native {
            Some(Ok(mut samples)) => {
                fit_to_len(&mut samples, frame_len);
                return samples;
            }
            Some(Err(e)) => {
                self.codec_failed(codec, &e);
                return vec![0; frame_len];
            }
            None => {}
        }

        let attenuation = self.config.plc_attenuation;
        match self.plc_frame.as_mut() {
            Some((last, samples)) if *last == codec => {
                for s in samples.iter_mut() {
                    *s = (*s as f32 * attenuation) as i16;
                }
                samples.clone()
            }
            _ => vec![0; frame_len],
        }
    }

    fn codec_succeeded(&mut self) {
        // ---
        self.consecutive_failures = 0;
        self.failure_reported = false;
    }

    fn codec_failed(&mut self, codec: Codec, error: &BridgeError) {
        // ---
        self.consecutive_failures += 1;
        self.stats.record_codec_failure();
        if let Some(metrics) = &self.metrics {
            metrics.codec_failures_total.inc();
        }

        if self.consecutive_failures == 1 {
            warn!("{} decode failed, substituting silence: {}", codec, error);
        } else {
            debug!("{} decode failed ({} in a row): {}", codec, self.consecutive_failures, error);
        }

        if self.consecutive_failures >= self.config.max_codec_failures && !self.failure_reported {
            self.failure_reported = true;
            let call_error = BridgeError::CodecFailure {
                codec,
                consecutive: self.consecutive_failures,
            };
            warn!("Ingress audio has stopped: {}", call_error);
            self.events.on_call_error(&call_error);
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.config.target_rate
    }

    pub fn negotiated_codec(&self) -> Option<Codec> {
        self.session.as_ref().map(|s| s.primary)
    }

    pub fn stats(&self) -> &IngressStats {
        &self.stats
    }

    pub fn dsp(&self) -> &IngressDsp {
        &self.dsp
    }

    pub fn jitter_status(&self) -> Option<JitterBufferStatus> {
        self.session.as_ref().map(|s| s.jitter.status())
    }
}
