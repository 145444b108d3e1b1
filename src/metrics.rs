use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Dispatch metrics
    pub static ref DISPATCHES: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatches_total", "Total number of backend dispatches"),
        &["kind", "backend"]
    ).unwrap();

    pub static ref DISPATCH_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatch_errors_total", "Total number of failed dispatches by error code"),
        &["code"]
    ).unwrap();

    pub static ref API_REQUEST_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "api_request_duration_seconds",
            "Time to complete a chat or completion request on the local API"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    ).unwrap();

    pub static ref TUNNEL_TASK_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tunnel_task_duration_seconds",
            "Time from tunnel request arrival to terminal response message"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    ).unwrap();

    // Tunnel metrics
    pub static ref TUNNEL_MESSAGES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("tunnel_messages_sent_total", "Total tunnel messages published by type"),
        &["type"]
    ).unwrap();

    pub static ref STREAM_CHUNKS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("stream_chunks_dropped_total", "Streamed lines dropped before forwarding"),
        &["reason"]
    ).unwrap();

    pub static ref TUNNEL_TASKS_IN_FLIGHT: IntGauge = IntGauge::new(
        "tunnel_tasks_in_flight",
        "Tunnel inference tasks currently executing"
    ).unwrap();

    // Transport metrics
    pub static ref GOSSIP_MESSAGES_RECEIVED: IntCounter = IntCounter::new(
        "gossip_messages_received_total",
        "Total gossip messages received on the tunnel topic"
    ).unwrap();

    pub static ref GOSSIP_DECODE_ERRORS: IntCounter = IntCounter::new(
        "gossip_decode_errors_total",
        "Gossip messages discarded because they were not valid tunnel messages"
    ).unwrap();

    pub static ref RELAY_FORWARDS: IntCounter = IntCounter::new(
        "relay_forwards_total",
        "Messages addressed to this node forwarded to the relay endpoint"
    ).unwrap();

    pub static ref RELAY_FAILURES: IntCounter = IntCounter::new(
        "relay_failures_total",
        "Relay forwards that failed after retries"
    ).unwrap();

    pub static ref NETWORK_PEERS: IntGauge = IntGauge::new(
        "network_peers_connected",
        "Current number of gossip neighbors"
    ).unwrap();
}

static INIT: Once = Once::new();

/// Initialize metrics registry. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(DISPATCHES.clone())).unwrap();
        REGISTRY.register(Box::new(DISPATCH_ERRORS.clone())).unwrap();
        REGISTRY.register(Box::new(API_REQUEST_LATENCY.clone())).unwrap();
        REGISTRY.register(Box::new(TUNNEL_TASK_LATENCY.clone())).unwrap();

        REGISTRY.register(Box::new(TUNNEL_MESSAGES_SENT.clone())).unwrap();
        REGISTRY.register(Box::new(STREAM_CHUNKS_DROPPED.clone())).unwrap();
        REGISTRY.register(Box::new(TUNNEL_TASKS_IN_FLIGHT.clone())).unwrap();

        REGISTRY.register(Box::new(GOSSIP_MESSAGES_RECEIVED.clone())).unwrap();
        REGISTRY.register(Box::new(GOSSIP_DECODE_ERRORS.clone())).unwrap();
        REGISTRY.register(Box::new(RELAY_FORWARDS.clone())).unwrap();
        REGISTRY.register(Box::new(RELAY_FAILURES.clone())).unwrap();
        REGISTRY.register(Box::new(NETWORK_PEERS.clone())).unwrap();

        tracing::info!("Metrics registry initialized with {} collectors", REGISTRY.gather().len());
    });
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
