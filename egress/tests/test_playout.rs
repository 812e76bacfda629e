//! Integration tests for the egress playout path.
//!
//! AI-side PCM in through the handle, encoded payloads out through the
//! events trait, decoded again here to look at what the caller would hear.

use egress::{spawn_playout, PlayoutConfig, PlayoutEngine, TickOutcome};
use rtp_ai_common::frame::rms;
use rtp_ai_common::{AudioDecoder, Codec, EgressEvents, OpusConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Transport {
    frames: Mutex<Vec<(u32, Vec<u8>)>>,
    drained: Mutex<u32>,
}

impl Transport {
    fn frames(&self) -> Vec<(u32, Vec<u8>)> {
        self.frames.lock().unwrap().clone()
    }

    fn drained(&self) -> u32 {
        *self.drained.lock().unwrap()
    }
}

impl EgressEvents for Transport {
    fn on_encoded_frame_ready(&self, duration: u32, payload: &[u8]) {
        self.frames.lock().unwrap().push((duration, payload.to_vec()));
    }

    fn on_queue_drained(&self) {
        *self.drained.lock().unwrap() += 1;
    }
}

fn engine(codec: Codec) -> (PlayoutEngine, Arc<Transport>) {
    // ---
    let transport = Arc::new(Transport::default());
    let engine = PlayoutEngine::new(codec, PlayoutConfig::default(), transport.clone())
        .expect("engine");
    (engine, transport)
}

/// `frames` x 20ms of a 400Hz tone at 24kHz as PCM16 LE.
fn tone_bytes(frames: usize, amplitude: f32) -> Vec<u8> {
    // ---
    (0..frames * 480)
        .map(|i| {
            let t = i as f32 / 24000.0;
            ((t * 2.0 * std::f32::consts::PI * 400.0).sin() * amplitude) as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

fn decode_all(codec: Codec, frames: &[(u32, Vec<u8>)]) -> Vec<Vec<i16>> {
    // ---
    let mut decoder = AudioDecoder::new(codec, &OpusConfig::default()).expect("decoder");
    frames
        .iter()
        .map(|(_, payload)| decoder.decode(payload).expect("decode"))
        .collect()
}

#[test]
fn test_underrun_interpolates_then_drains_once() {
    // ---
    let (mut engine, transport) = engine(Codec::Pcmu);
    engine.handle().enqueue_pcm(&tone_bytes(5, 8000.0));

    let outcomes: Vec<TickOutcome> = (0..20).map(|_| engine.tick()).collect();

    assert!(outcomes[..5].iter().all(|&o| o == TickOutcome::Audio));
    assert!(outcomes[5..8].iter().all(|&o| o == TickOutcome::Interpolated));
    assert!(outcomes[8..].iter().all(|&o| o == TickOutcome::Silence));
    assert_eq!(transport.drained(), 1);

    let pcm = decode_all(Codec::Pcmu, &transport.frames());
    assert_eq!(pcm.len(), 20);

    let levels: Vec<f32> = pcm[4..8].iter().map(|f| rms(f)).collect();
    assert!(levels.windows(2).all(|w| w[0] > w[1]), "{:?}", levels);

    // Ramp-out on the first silent tick, digital silence afterwards
    assert!(pcm[9..].iter().flatten().all(|&s| s == 0));
}

#[test]
fn test_new_episode_after_recovery_drains_again() {
    // ---
    let (mut engine, transport) = engine(Codec::Pcma);
    let ai = engine.handle();

    ai.enqueue_pcm(&tone_bytes(3, 6000.0));
    for _ in 0..10 {
        engine.tick();
    }
    assert_eq!(transport.drained(), 1);

    ai.enqueue_pcm(&tone_bytes(2, 6000.0));
    assert_eq!(engine.tick(), TickOutcome::Audio);
    assert_eq!(engine.tick(), TickOutcome::Audio);
    for _ in 0..10 {
        engine.tick();
    }
    assert_eq!(transport.drained(), 2);
    assert_eq!(engine.stats().underruns, 2);
}

#[test]
fn test_barge_in_clears_queue() {
    // ---
    let (mut engine, _) = engine(Codec::Pcmu);
    let ai = engine.handle();
    ai.enqueue_pcm(&tone_bytes(50, 6000.0));

    for _ in 0..3 {
        assert_eq!(engine.tick(), TickOutcome::Audio);
    }
    ai.clear_queue();

    assert_eq!(ai.queued_frames(), 0);
    assert_eq!(engine.tick(), TickOutcome::Interpolated);
}

#[test]
fn test_fade_in_on_new_response() {
    // ---
    let (mut engine, transport) = engine(Codec::Pcmu);
    let ai = engine.handle();

    let dc: Vec<u8> = std::iter::repeat(10000i16.to_le_bytes())
        .take(20 * 480)
        .flatten()
        .collect();
    ai.enqueue_pcm(&dc);
    for _ in 0..10 {
        engine.tick();
    }

    ai.reset_fade_in();
    engine.tick();

    let pcm = decode_all(Codec::Pcmu, &transport.frames());
    let before = &pcm[9];
    let faded = &pcm[10];
    assert!((before[0] as i32 - 10000).abs() < 500);
    assert!(faded[0].abs() < 500, "first sample {}", faded[0]);
    assert!((faded[159] as i32 - 10000).abs() < 500);
}

#[test]
fn test_encoded_frame_size_for_every_codec() {
    // ---
    for codec in [Codec::Pcmu, Codec::Pcma, Codec::G722, Codec::Opus] {
        let (mut engine, transport) = engine(codec);
        let ai = engine.handle();

        // Odd chunk sizes, including a split sample
        let audio = tone_bytes(12, 5000.0);
        for chunk in audio.chunks(777) {
            ai.enqueue_pcm(chunk);
        }
        for _ in 0..30 {
            engine.tick();
        }

        let frames = transport.frames();
        assert_eq!(frames.len(), 30, "{}", codec);
        for (duration, payload) in &frames {
            assert_eq!(*duration, codec.timestamp_increment());
            match codec {
                Codec::Opus => assert!(!payload.is_empty()),
                _ => assert_eq!(payload.len(), 160, "{}", codec),
            }
        }

        for pcm in decode_all(codec, &frames) {
            assert_eq!(pcm.len(), codec.samples_per_frame());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_ticks_every_20ms() {
    // ---
    let (engine, transport) = engine(Codec::Pcmu);
    let ai = engine.handle();
    ai.enqueue_pcm(&tone_bytes(100, 6000.0));

    let task = spawn_playout(engine);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let (engine, stats) = task.stop().await.expect("stop");

    let sent = transport.frames().len();
    assert!((50..=51).contains(&sent), "sent {} frames", sent);
    assert_eq!(stats.frames_sent as usize, sent);
    assert!(stats.audio_frames > 0);
    assert_eq!(engine.stats().frames_sent, 0);

    // Stopping resets the engine and discards what was left
    assert_eq!(ai.queued_frames(), 0);
    assert!(engine.is_priming());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_task_handle_stops_playout() {
    // ---
    let (engine, transport) = engine(Codec::Pcma);
    let task = spawn_playout(engine);
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(task);

    let sent = transport.frames().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.frames().len(), sent);
}
