//! Loopback harness for the audio bridge.
//!
//! Plays a WAV file as the caller: encodes it into RTP frames, runs them
//! through a simulated network into the ingress pipeline and writes what
//! the AI would hear. That audio is then sent back as the AI's reply
//! through the egress playout engine on its real 20ms clock, and the
//! decoded result is written as what the caller would hear.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

use bridge::{
    read_wav, write_wav, CallLeg, CallLegConfig, NetworkSimulator, NetworkSimulatorConfig,
};
use rtp_ai_common::codec::DEFAULT_OPUS_PAYLOAD_TYPE;
use rtp_ai_common::frame::samples_to_le_bytes;
use rtp_ai_common::{
    init_tracing, samples_per_frame, AudioDecoder, AudioEncoder, BridgeError, Codec, CodecMap,
    ColorWhen, EgressEvents, IngressEvents, MetricsContext, MetricsServerConfig, OpusConfig,
    RtpFrame,
};

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

impl From<ColorArg> for ColorWhen {
    fn from(v: ColorArg) -> Self {
        match v {
            ColorArg::Auto => ColorWhen::Auto,
            ColorArg::Always => ColorWhen::Always,
            ColorArg::Never => ColorWhen::Never,
        }
    }
}

/// RTP ↔ AI bridge loopback - run a WAV file through both directions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Input WAV file (the caller's voice)
    #[arg(short, long)]
    input: PathBuf,

    /// Call codec: PCMU, PCMA, G722 or opus
    #[arg(short, long, default_value = "PCMU")]
    codec: String,

    /// Sample rate of the PCM exchanged with the AI
    #[arg(short, long, default_value = "16000")]
    target_rate: u32,

    /// Packet loss rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// Maximum network jitter in 20ms frames
    #[arg(long, default_value = "0")]
    jitter_frames: u32,

    /// Packet reordering rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    reorder: f64,

    /// Packet duplication rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    duplicate: f64,

    /// Seed for the network simulator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Where to write the audio delivered to the AI
    #[arg(long, default_value = "ingress_out.wav")]
    ingress_out: PathBuf,

    /// Where to write the audio delivered to the caller
    #[arg(long, default_value = "egress_out.wav")]
    egress_out: PathBuf,

    /// Jitter buffer priming depth in frames (3 to 12)
    #[arg(long, default_value = "3")]
    prime_depth: usize,

    /// Prometheus metrics bind address (serves `GET /metrics`)
    #[arg(long)]
    metrics_bind: Option<String>,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorArg,
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source address the simulated caller sends from
const CALLER: ([u8; 4], u16) = ([192, 0, 2, 10], 40000);

/// Stands in for the AI client: collects what the bridge delivers.
#[derive(Default)]
struct AiSide {
    samples: Mutex<Vec<i16>>,
}

impl IngressEvents for AiSide {
    fn on_pcm_frame_ready(&self, pcm: &[u8]) {
        // ---
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.extend(pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])));
    }

    fn on_call_error(&self, error: &BridgeError) {
        warn!("Ingress call error: {}", error);
    }
}

/// Stands in for the RTP transport: collects encoded payloads.
#[derive(Default)]
struct Transport {
    payloads: Mutex<Vec<Vec<u8>>>,
    drained: Notify,
}

impl EgressEvents for Transport {
    fn on_encoded_frame_ready(&self, _duration: u32, payload: &[u8]) {
        // ---
        self.payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_vec());
    }

    fn on_queue_drained(&self) {
        self.drained.notify_one();
    }

    fn on_call_error(&self, error: &BridgeError) {
        warn!("Egress call error: {}", error);
    }
}

fn check_rate(name: &str, value: f64) -> Result<()> {
    // ---
    if !(0.0..=1.0).contains(&value) {
        bail!("--{} must be between 0.0 and 1.0, got {}", name, value);
    }
    Ok(())
}

/// Encodes mono PCM at the codec's native rate into RTP frames.
fn packetize(samples: &[i16], codec: Codec) -> Result<Vec<RtpFrame>> {
    // ---
    let mut encoder = AudioEncoder::new(codec, &OpusConfig::default())?;
    let payload_type = codec
        .static_payload_type()
        .unwrap_or(DEFAULT_OPUS_PAYLOAD_TYPE);
    let frame_len = codec.samples_per_frame();

    let mut frames = Vec::with_capacity(samples.len().div_ceil(frame_len));
    let mut timestamp: u32 = 0;
    for (n, chunk) in samples.chunks(frame_len).enumerate() {
        let mut pcm = chunk.to_vec();
        pcm.resize(frame_len, 0);

        let payload = encoder
            .encode(&pcm)
            .with_context(|| format!("failed to encode frame {}", n))?;
        frames.push(RtpFrame::new(payload_type, timestamp, payload));
        timestamp = timestamp.wrapping_add(codec.timestamp_increment());
    }
    Ok(frames)
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();
    init_tracing(args.color.into())?;
    info!("Starting bridge-sim v{VERSION}");

    check_rate("loss", args.loss)?;
    check_rate("reorder", args.reorder)?;
    check_rate("duplicate", args.duplicate)?;

    let codec = Codec::from_encoding_name(&args.codec)
        .with_context(|| format!("unknown codec: {}", args.codec))?;
    info!(
        "Codec: {} ({}Hz), AI rate: {}Hz",
        codec,
        codec.native_rate(),
        args.target_rate
    );

    let metrics = match &args.metrics_bind {
        Some(bind) => {
            let metrics = MetricsContext::new("bridge_sim")?;
            let bind = bind.parse().context("invalid metrics bind")?;
            let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(bind));
            Some(metrics)
        }
        None => None,
    };

    let audio = read_wav(&args.input, codec.native_rate())?;
    let rtp_frames = packetize(&audio.samples, codec)?;
    info!("Caller: {:.2}s, {} RTP frames", audio.duration_secs(), rtp_frames.len());

    let mut config = CallLegConfig::default();
    config.ingress.target_rate = args.target_rate;
    config.ingress.jitter.prime_depth = args.prime_depth;
    config.playout.queue.ai_rate = args.target_rate;
    config.playout.queue.max_frames = config.playout.queue.max_frames.max(rtp_frames.len() + 1);

    let ai = Arc::new(AiSide::default());
    let transport = Arc::new(Transport::default());
    let leg = CallLeg::new(config, ai.clone(), transport.clone(), metrics);
    leg.on_codec_negotiated(CodecMap::single(codec))?;

    // --- Caller -> AI
    let mut network = NetworkSimulator::new(NetworkSimulatorConfig {
        loss_rate: args.loss,
        jitter_frames: args.jitter_frames,
        reorder_rate: args.reorder,
        duplicate_rate: args.duplicate,
        seed: Some(args.seed),
    });
    let caller = SocketAddr::from(CALLER);

    for frame in rtp_frames {
        network.send(frame);
        for arrived in network.tick() {
            leg.on_rtp_packet(caller, arrived);
        }
    }
    for arrived in network.drain() {
        leg.on_rtp_packet(caller, arrived);
    }
    leg.flush_ingress();

    let net = network.stats();
    info!(
        "Network: {} sent, {} lost, {} reordered, {} duplicated",
        net.packets_sent, net.packets_lost, net.packets_reordered, net.packets_duplicated
    );
    leg.ingress_stats().log();

    let heard_by_ai = {
        let mut samples = ai.samples.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *samples)
    };
    write_wav(&args.ingress_out, &heard_by_ai, args.target_rate)?;

    // --- AI -> caller, in real time
    let reply_secs = heard_by_ai.len() as f64 / args.target_rate.max(1) as f64;
    info!("Playing {:.2}s reply through egress", reply_secs);

    leg.reset_fade_in();
    leg.enqueue_pcm(&samples_to_le_bytes(&heard_by_ai));

    let deadline = Duration::from_secs_f64(reply_secs + 5.0);
    if tokio::time::timeout(deadline, transport.drained.notified())
        .await
        .is_err()
    {
        warn!("Egress did not drain within {:.1}s", deadline.as_secs_f64());
    }

    if let Some((engine, stats)) = leg.stop_playout().await? {
        info!("Egress playout for {} stopped", engine.codec());
        stats.log();
    }
    leg.on_call_reset();

    let payloads = {
        let mut payloads = transport.payloads.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *payloads)
    };
    let mut decoder = AudioDecoder::new(codec, &OpusConfig::default())?;
    let mut heard_by_caller = Vec::with_capacity(payloads.len() * codec.samples_per_frame());
    for payload in &payloads {
        match decoder.decode(payload) {
            Ok(pcm) => heard_by_caller.extend(pcm),
            Err(e) => warn!("Failed to decode egress payload: {}", e),
        }
    }
    write_wav(&args.egress_out, &heard_by_caller, codec.native_rate())?;

    info!(
        "Done: {} PCM frames to the AI, {} RTP payloads to the caller",
        heard_by_ai.len() / samples_per_frame(args.target_rate).max(1),
        payloads.len()
    );
    Ok(())
}
