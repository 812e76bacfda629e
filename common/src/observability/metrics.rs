//! Prometheus metrics for the audio bridge.
//!
//! One `MetricsContext` per process. Pipelines receive a clone through
//! `with_metrics` and only ever bump counters or observe histograms on
//! the real-time path.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Metric name prefix
const NAMESPACE: &str = "rtp_ai_bridge";

/// Buckets for per-frame work, 10µs to 20ms (one frame period)
const FRAME_WORK_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.02,
];

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9300`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Registry plus handles for every bridge metric.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Ingress (phone → AI)
    pub rtp_frames_received_total: IntCounter,
    pub rtp_frames_late_total: IntCounter,
    pub rtp_frames_duplicate_total: IntCounter,
    pub frames_concealed_total: IntCounter,
    pub jitter_resyncs_total: IntCounter,
    pub ingress_frames_emitted_total: IntCounter,
    pub jitter_buffer_depth_frames: IntGauge,

    // Egress (AI → phone)
    pub egress_frames_sent_total: IntCounter,
    pub egress_underruns_total: IntCounter,
    pub egress_queue_dropped_frames_total: IntCounter,
    pub egress_queue_depth_frames: IntGauge,

    // Both directions
    pub codec_failures_total: IntCounter,

    // Latency histograms (seconds)
    pub decode_seconds: Histogram,
    pub encode_seconds: Histogram,
    pub ingress_pipeline_seconds: Histogram,
    pub egress_tick_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    // ---
    let metric = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    // ---
    let metric = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Result<Histogram> {
    // ---
    let opts = HistogramOpts::new(name, help).buckets(FRAME_WORK_BUCKETS.to_vec());
    let metric = Histogram::with_opts(opts)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl MetricsContext {
    // ---
    /// Creates a registry and registers every bridge metric.
    ///
    /// `process_name` becomes the constant label `process=<name>`.
    ///
    /// # Errors
    ///
    /// Returns error if a metric fails to register (duplicate name).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some(NAMESPACE.into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;
        let r = &registry;

        Ok(Self {
            rtp_frames_received_total: counter(
                r,
                "rtp_frames_received_total",
                "RTP frames handed to the jitter buffer",
            )?,
            rtp_frames_late_total: counter(
                r,
                "rtp_frames_late_total",
                "RTP frames discarded because their slot was already played",
            )?,
            rtp_frames_duplicate_total: counter(
                r,
                "rtp_frames_duplicate_total",
                "RTP frames discarded as duplicates",
            )?,
            frames_concealed_total: counter(
                r,
                "frames_concealed_total",
                "Missing frames replaced by packet loss concealment",
            )?,
            jitter_resyncs_total: counter(
                r,
                "jitter_resyncs_total",
                "Jitter buffer resynchronizations after sustained loss",
            )?,
            ingress_frames_emitted_total: counter(
                r,
                "ingress_frames_emitted_total",
                "20ms PCM frames delivered to the AI side",
            )?,
            jitter_buffer_depth_frames: gauge(
                r,
                "jitter_buffer_depth_frames",
                "Frames currently held by the jitter buffer",
            )?,
            egress_frames_sent_total: counter(
                r,
                "egress_frames_sent_total",
                "Encoded frames handed to the transport",
            )?,
            egress_underruns_total: counter(
                r,
                "egress_underruns_total",
                "Playout ticks that found the AI audio queue empty",
            )?,
            egress_queue_dropped_frames_total: counter(
                r,
                "egress_queue_dropped_frames_total",
                "AI audio frames dropped because the queue was full",
            )?,
            egress_queue_depth_frames: gauge(
                r,
                "egress_queue_depth_frames",
                "Frames currently waiting in the AI audio queue",
            )?,
            codec_failures_total: counter(
                r,
                "codec_failures_total",
                "Frames a codec failed to decode or encode",
            )?,
            decode_seconds: histogram(r, "decode_seconds", "Payload decode duration in seconds")?,
            encode_seconds: histogram(r, "encode_seconds", "Payload encode duration in seconds")?,
            ingress_pipeline_seconds: histogram(
                r,
                "ingress_pipeline_seconds",
                "Decode through resample for one ingress frame, in seconds",
            )?,
            egress_tick_seconds: histogram(
                r,
                "egress_tick_seconds",
                "Work done by one playout tick, in seconds",
            )?,
            registry,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Renders the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails.
    pub fn render(&self) -> Result<Vec<u8>> {
        render_registry(&self.registry)
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// Callers decide whether to run it; the pipelines never do.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            Server::bind(&cfg.bind)
                .serve(make_svc)
                .await
                .map_err(|e| anyhow::anyhow!(e))
        })
    }
}

fn render_registry(registry: &Registry) -> Result<Vec<u8>> {
    // ---
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

fn plain_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    // ---
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    resp
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    // ---
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return Ok(plain_response(StatusCode::NOT_FOUND, "not found"));
    }

    match render_registry(&registry) {
        Ok(buffer) => {
            let mut resp = plain_response(StatusCode::OK, buffer);
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        Err(e) => Ok(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encode error: {e}"),
        )),
    }
}
