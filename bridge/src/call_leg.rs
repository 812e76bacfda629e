//! One phone call's audio, both directions.
//!
//! `CallLeg` is what the signaling and transport layers talk to. The
//! receive path pushes RTP frames in; the AI client pushes PCM in; the
//! playout task pushes encoded frames out on its own 20ms clock.

use anyhow::{Context, Result};
use egress::{
    spawn_playout, EgressHandle, PlayoutConfig, PlayoutEngine, PlayoutStats, PlayoutTask,
};
use ingress::{IngressConfig, IngressProcessor, IngressStats};
use rtp_ai_common::{BridgeError, CodecMap, EgressEvents, IngressEvents, MetricsContext, RtpFrame};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Configuration for both directions of a call.
#[derive(Debug, Clone, Default)]
pub struct CallLegConfig {
    // ---
    pub ingress: IngressConfig,
    pub playout: PlayoutConfig,
}

/// Egress side once a codec is known.
struct Playout {
    handle: EgressHandle,
    task: PlayoutTask,
}

/// Per-call audio bridge.
///
/// Must be driven from within a tokio runtime; negotiation spawns the
/// playout task.
pub struct CallLeg {
    // ---
    config: CallLegConfig,
    egress_events: Arc<dyn EgressEvents>,
    metrics: Option<MetricsContext>,

    ingress: Mutex<IngressProcessor>,
    playout: Mutex<Option<Playout>>,

    /// Where RTP is sent: the first source address seen (symmetric RTP)
    remote: Mutex<Option<SocketAddr>>,
}

impl CallLeg {
    // ---
    /// Creates an idle call leg.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration for both directions
    /// * `ingress_events` - Receives PCM frames for the AI
    /// * `egress_events` - Receives encoded frames for the transport
    /// * `metrics` - Optional Prometheus metrics shared by both directions
    pub fn new(
        config: CallLegConfig,
        ingress_events: Arc<dyn IngressEvents>,
        egress_events: Arc<dyn EgressEvents>,
        metrics: Option<MetricsContext>,
    ) -> Self {
        // ---
        let mut processor = IngressProcessor::new(config.ingress.clone(), ingress_events);
        if let Some(metrics) = &metrics {
            processor = processor.with_metrics(metrics.clone());
        }

        Self {
            config,
            egress_events,
            metrics,
            ingress: Mutex::new(processor),
            playout: Mutex::new(None),
            remote: Mutex::new(None),
        }
    }

    /// Starts both directions with the negotiated codecs.
    ///
    /// The primary codec of `codecs` is also the send codec. Renegotiation
    /// restarts playout with an empty queue.
    ///
    /// # Errors
    ///
    /// Returns error if the map is empty, a codec cannot be created, or no
    /// tokio runtime is running.
    pub fn on_codec_negotiated(&self, codecs: CodecMap) -> Result<()> {
        // ---
        tokio::runtime::Handle::try_current().context("call leg needs a running tokio runtime")?;
        let codec = codecs.primary().ok_or(BridgeError::NotNegotiated)?;

        self.lock_ingress().on_codec_negotiated(codecs)?;

        let mut engine =
            PlayoutEngine::new(codec, self.config.playout.clone(), self.egress_events.clone())?;
        if let Some(metrics) = &self.metrics {
            engine = engine.with_metrics(metrics.clone());
        }
        let handle = engine.handle();

        let task = spawn_playout(engine);

        // Dropping a previous task stops it
        if let Some(previous) = self.lock_playout().replace(Playout { handle, task }) {
            previous.handle.close();
            info!("Codec renegotiated, playout restarted");
        }
        info!("Call leg started with {}", codec);
        Ok(())
    }

    /// Accepts one RTP frame from `source`.
    ///
    /// The first source seen becomes the send destination for the rest of
    /// the call. Returns `true` if a PCM frame was emitted to the AI.
    pub fn on_rtp_packet(&self, source: SocketAddr, frame: RtpFrame) -> bool {
        // ---
        self.latch_remote(source);
        self.lock_ingress().on_rtp_packet(frame)
    }

    /// Ends the call: stops playout and returns every entity to its
    /// initial state. The next call must negotiate again.
    ///
    /// No encoded frame is started once this returns. A frame already
    /// being handed to `on_encoded_frame_ready` on another thread may
    /// still complete.
    pub fn on_call_reset(&self) {
        // ---
        if let Some(playout) = self.lock_playout().take() {
            playout.handle.close();
            playout.task.abort();
        }
        self.lock_ingress().on_call_reset();
        *self.lock_remote() = None;
        info!("Call leg reset");
    }

    /// Stops playout and waits for the engine.
    ///
    /// The engine comes back reset; the stats it gathered during the call
    /// are returned alongside it.
    ///
    /// # Errors
    ///
    /// Returns error if the playout task panicked.
    pub async fn stop_playout(&self) -> Result<Option<(PlayoutEngine, PlayoutStats)>> {
        // ---
        let playout = self.lock_playout().take();
        match playout {
            Some(playout) => Ok(Some(playout.task.stop().await?)),
            None => Ok(None),
        }
    }

    /// Plays out frames still held by the jitter buffer (end of stream).
    pub fn flush_ingress(&self) -> usize {
        self.lock_ingress().flush()
    }

    /// Queues AI audio (PCM16 LE at the configured AI rate).
    pub fn enqueue_pcm(&self, pcm: &[u8]) {
        // ---
        match self.egress_handle() {
            Some(handle) => handle.enqueue_pcm(pcm),
            None => debug!("Dropping {} bytes of AI audio before negotiation", pcm.len()),
        }
    }

    /// Fades in the next AI audio (start of a new response).
    pub fn reset_fade_in(&self) {
        // ---
        if let Some(handle) = self.egress_handle() {
            handle.reset_fade_in();
        }
    }

    /// Drops all queued AI audio (barge-in).
    pub fn clear_queue(&self) {
        // ---
        if let Some(handle) = self.egress_handle() {
            handle.clear_queue();
        }
    }

    /// Latched RTP destination, once the first frame has arrived.
    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        *self.lock_remote()
    }

    pub fn ingress_stats(&self) -> IngressStats {
        self.lock_ingress().stats().clone()
    }

    /// Whole AI frames waiting for playout.
    pub fn queued_frames(&self) -> usize {
        self.egress_handle().map_or(0, |h| h.queued_frames())
    }

    fn latch_remote(&self, source: SocketAddr) {
        // ---
        let mut remote = self.lock_remote();
        if remote.is_none() {
            info!("Latched RTP peer {}", source);
            *remote = Some(source);
        } else if *remote != Some(source) {
            debug!("Ignoring RTP source change to {}", source);
        }
    }

    fn egress_handle(&self) -> Option<EgressHandle> {
        self.lock_playout().as_ref().map(|p| p.handle.clone())
    }

    fn lock_ingress(&self) -> MutexGuard<'_, IngressProcessor> {
        self.ingress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_playout(&self) -> MutexGuard<'_, Option<Playout>> {
        self.playout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_remote(&self) -> MutexGuard<'_, Option<SocketAddr>> {
        self.remote.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rtp_ai_common::Codec;

    struct Null;

    impl IngressEvents for Null {
        fn on_pcm_frame_ready(&self, _pcm: &[u8]) {}
    }

    impl EgressEvents for Null {
        fn on_encoded_frame_ready(&self, _duration: u32, _payload: &[u8]) {}
    }

    #[derive(Default)]
    struct Counter {
        sent: Mutex<usize>,
    }

    impl EgressEvents for Counter {
        fn on_encoded_frame_ready(&self, _duration: u32, _payload: &[u8]) {
            *self.sent.lock().unwrap() += 1;
        }
    }

    fn leg() -> CallLeg {
        CallLeg::new(CallLegConfig::default(), Arc::new(Null), Arc::new(Null), None)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], port))
    }

    #[tokio::test]
    async fn test_first_source_is_latched() {
        // ---
        let leg = leg();
        leg.on_codec_negotiated(CodecMap::single(Codec::Pcmu)).unwrap();

        leg.on_rtp_packet(addr(4000), RtpFrame::new(0, 0, vec![0xFF; 160]));
        leg.on_rtp_packet(addr(5000), RtpFrame::new(0, 160, vec![0xFF; 160]));
        assert_eq!(leg.remote_endpoint(), Some(addr(4000)));

        leg.on_call_reset();
        assert_eq!(leg.remote_endpoint(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_silences_egress_immediately() {
        // ---
        let counter = Arc::new(Counter::default());
        let leg = CallLeg::new(CallLegConfig::default(), Arc::new(Null), counter.clone(), None);
        leg.on_codec_negotiated(CodecMap::single(Codec::Pcmu)).unwrap();
        leg.enqueue_pcm(&vec![0; 960 * 50]);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(*counter.sent.lock().unwrap() > 0);

        leg.on_call_reset();
        let sent = *counter.sent.lock().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        assert_eq!(*counter.sent.lock().unwrap(), sent);
        assert_eq!(leg.queued_frames(), 0);
        assert!(leg.stop_playout().await.unwrap().is_none());
    }

    #[test]
    fn test_negotiation_needs_runtime() {
        // ---
        let leg = leg();
        assert!(leg.on_codec_negotiated(CodecMap::single(Codec::Pcmu)).is_err());
    }

    #[tokio::test]
    async fn test_ai_audio_before_negotiation_is_dropped() {
        // ---
        let leg = leg();
        leg.enqueue_pcm(&[0; 960]);
        assert_eq!(leg.queued_frames(), 0);

        leg.on_codec_negotiated(CodecMap::single(Codec::G722)).unwrap();
        leg.enqueue_pcm(&vec![0; 960 * 10]);
        assert!(leg.queued_frames() > 0);

        leg.clear_queue();
        assert_eq!(leg.queued_frames(), 0);
    }
}
