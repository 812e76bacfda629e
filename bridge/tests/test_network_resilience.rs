//! Integration tests for a full call leg under network impairment.
//!
//! Caller audio goes through the simulated network into the ingress
//! pipeline; AI audio goes through the playout engine on the tokio timer.

use bridge::{CallLeg, CallLegConfig, NetworkSimulator, NetworkSimulatorConfig};
use rtp_ai_common::{
    AudioEncoder, Codec, CodecMap, EgressEvents, IngressEvents, OpusConfig, RtpFrame,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Endpoints {
    pcm_frames: Mutex<Vec<usize>>,
    payloads: Mutex<Vec<(u32, usize)>>,
    drained: Mutex<u32>,
}

impl IngressEvents for Endpoints {
    fn on_pcm_frame_ready(&self, pcm: &[u8]) {
        self.pcm_frames.lock().unwrap().push(pcm.len());
    }
}

impl EgressEvents for Endpoints {
    fn on_encoded_frame_ready(&self, duration: u32, payload: &[u8]) {
        self.payloads.lock().unwrap().push((duration, payload.len()));
    }

    fn on_queue_drained(&self) {
        *self.drained.lock().unwrap() += 1;
    }
}

fn call_leg(codec: Codec) -> (CallLeg, Arc<Endpoints>) {
    // ---
    let endpoints = Arc::new(Endpoints::default());
    let leg = CallLeg::new(
        CallLegConfig::default(),
        endpoints.clone(),
        endpoints.clone(),
        None,
    );
    leg.on_codec_negotiated(CodecMap::single(codec))
        .expect("negotiation failed");
    (leg, endpoints)
}

/// Test helper to encode `count` frames of a 440Hz tone
fn caller_frames(codec: Codec, count: usize) -> Vec<RtpFrame> {
    // ---
    let mut encoder = AudioEncoder::new(codec, &OpusConfig::default()).expect("encoder");
    let frame_len = codec.samples_per_frame();

    (0..count)
        .map(|n| {
            let pcm: Vec<i16> = (0..frame_len)
                .map(|i| {
                    let t = (n * frame_len + i) as f32 / codec.native_rate() as f32;
                    ((t * 2.0 * std::f32::consts::PI * 440.0).sin() * 6000.0) as i16
                })
                .collect();
            RtpFrame::new(
                codec.static_payload_type().unwrap_or(111),
                n as u32 * codec.timestamp_increment(),
                encoder.encode(&pcm).expect("encode"),
            )
        })
        .collect()
}

fn caller() -> SocketAddr {
    SocketAddr::from(([198, 51, 100, 7], 30000))
}

/// Runs caller frames through the simulator into the call leg.
fn deliver(leg: &CallLeg, frames: Vec<RtpFrame>, config: NetworkSimulatorConfig) -> NetworkSimulator {
    // ---
    let mut sim = NetworkSimulator::new(config);
    for frame in frames {
        sim.send(frame);
        for arrived in sim.tick() {
            leg.on_rtp_packet(caller(), arrived);
        }
    }
    for arrived in sim.drain() {
        leg.on_rtp_packet(caller(), arrived);
    }
    leg.flush_ingress();
    sim
}

/// Tests the ingress direction with no impairment.
#[tokio::test]
async fn test_clean_network_delivers_every_frame() {
    // ---
    let (leg, endpoints) = call_leg(Codec::Pcmu);
    deliver(&leg, caller_frames(Codec::Pcmu, 100), NetworkSimulatorConfig::default());

    let frames = endpoints.pcm_frames.lock().unwrap().clone();
    assert_eq!(frames.len(), 100);
    assert!(frames.iter().all(|&len| len == 640)); // 20ms @ 16kHz

    let stats = leg.ingress_stats();
    assert_eq!(stats.frames_concealed, 0);
    assert_eq!(leg.remote_endpoint(), Some(caller()));

    println!("✓ Clean network: 100 frames in, 100 frames out");
}

/// Tests the ingress direction with loss, jitter, reordering and duplicates.
#[tokio::test]
async fn test_impaired_network_keeps_stream_steady() {
    // ---
    for codec in [Codec::Pcma, Codec::G722, Codec::Opus] {
        let (leg, endpoints) = call_leg(codec);
        let config = NetworkSimulatorConfig {
            loss_rate: 0.1,
            jitter_frames: 2,
            reorder_rate: 0.05,
            duplicate_rate: 0.05,
            seed: Some(42),
        };
        let sim = deliver(&leg, caller_frames(codec, 300), config);
        let net = sim.stats().clone();
        let stats = leg.ingress_stats();

        // Every arrival is accounted for exactly once
        assert_eq!(
            stats.frames_received + stats.frames_late + stats.frames_duplicate,
            net.packets_delivered,
            "{}",
            codec
        );

        let frames = endpoints.pcm_frames.lock().unwrap().clone();
        assert!(frames.iter().all(|&len| len == 640), "{}", codec);
        assert!(frames.len() as u64 >= stats.frames_received, "{}", codec);
        assert!(stats.frames_concealed > 0, "{}", codec);

        println!(
            "✓ {}: {} lost, {} frames out, {:.1}% concealed",
            codec,
            net.packets_lost,
            frames.len(),
            stats.concealment_percentage()
        );
    }
}

/// Tests both directions on the real playout clock.
#[tokio::test(start_paused = true)]
async fn test_playout_runs_on_20ms_clock() {
    // ---
    let (leg, endpoints) = call_leg(Codec::G722);
    deliver(&leg, caller_frames(Codec::G722, 20), NetworkSimulatorConfig::default());

    // One second of 24kHz AI audio
    leg.reset_fade_in();
    leg.enqueue_pcm(&vec![0u8; 50 * 480 * 2]);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let payloads = endpoints.payloads.lock().unwrap().clone();
    assert!((75..=77).contains(&payloads.len()), "{} payloads", payloads.len());
    assert!(payloads.iter().all(|&(duration, len)| duration == 320 && len == 160));
    assert_eq!(*endpoints.drained.lock().unwrap(), 1);
    assert_eq!(leg.queued_frames(), 0);

    let (engine, stats) = leg.stop_playout().await.expect("stop").expect("engine");
    assert!(engine.is_priming());
    assert_eq!(stats.frames_sent as usize, payloads.len());
    assert_eq!(stats.audio_frames, 50);
    assert_eq!(stats.underruns, 1);

    println!("✓ Playout emitted {} frames in 1.5s", payloads.len());
}

/// Tests that renegotiation switches the send codec.
#[tokio::test(start_paused = true)]
async fn test_renegotiation_switches_send_codec() {
    // ---
    let (leg, endpoints) = call_leg(Codec::Pcmu);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(endpoints
        .payloads
        .lock()
        .unwrap()
        .iter()
        .all(|&(duration, _)| duration == 160));

    leg.on_codec_negotiated(CodecMap::single(Codec::G722))
        .expect("renegotiation failed");
    endpoints.payloads.lock().unwrap().clear();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let payloads = endpoints.payloads.lock().unwrap().clone();
    assert!(!payloads.is_empty());
    assert!(payloads.iter().all(|&(duration, _)| duration == 320));

    println!("✓ Renegotiation restarted playout with G722");
}

/// Tests that a reset call leg accepts nothing until negotiated again.
#[tokio::test]
async fn test_reset_requires_renegotiation() {
    // ---
    let (leg, endpoints) = call_leg(Codec::Pcma);
    deliver(&leg, caller_frames(Codec::Pcma, 10), NetworkSimulatorConfig::default());
    leg.on_call_reset();

    let before = endpoints.pcm_frames.lock().unwrap().len();
    deliver(&leg, caller_frames(Codec::Pcma, 10), NetworkSimulatorConfig::default());
    assert_eq!(endpoints.pcm_frames.lock().unwrap().len(), before);
    assert_eq!(leg.remote_endpoint(), Some(caller()));

    leg.enqueue_pcm(&[0; 960]);
    assert_eq!(leg.queued_frames(), 0);

    println!("✓ Reset call leg ignores media until renegotiated");
}
