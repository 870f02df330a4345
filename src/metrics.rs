// Prometheus metrics definitions for the botdeck backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Bots currently registered (connected or not).
    pub static ref ACTIVE_BOTS: IntGauge =
        IntGauge::new("botdeck_active_bots", "Bots currently registered").unwrap();

    /// Live SSE event-stream subscribers.
    pub static ref SSE_CLIENTS: IntGauge =
        IntGauge::new("botdeck_sse_clients", "Live SSE stream subscribers").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total bots created.
    pub static ref BOTS_CREATED_TOTAL: IntCounter =
        IntCounter::new("botdeck_bots_created_total", "Total bots created").unwrap();

    /// Total reconnect operations.
    pub static ref RECONNECTS_TOTAL: IntCounter =
        IntCounter::new("botdeck_reconnects_total", "Total reconnect operations").unwrap();

    /// Total envelopes published on the event bus, by event type.
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("botdeck_events_published_total", "Envelopes published"),
        &["type"],
    )
    .unwrap();

    /// Total scripted tasks started, by task name.
    pub static ref TASKS_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("botdeck_tasks_started_total", "Scripted tasks started"),
        &["task"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Full snapshot refresh duration in milliseconds.
    pub static ref SNAPSHOT_REFRESH_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "botdeck_snapshot_refresh_duration_ms",
            "Snapshot refresh duration in ms",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0]),
    )
    .unwrap();
}

/// Register all metrics with the shared registry. Call once at startup;
/// duplicate registrations are ignored so tests can call it freely.
pub fn register() {
    let _ = REGISTRY.register(Box::new(ACTIVE_BOTS.clone()));
    let _ = REGISTRY.register(Box::new(SSE_CLIENTS.clone()));
    let _ = REGISTRY.register(Box::new(BOTS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECONNECTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASKS_STARTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SNAPSHOT_REFRESH_DURATION_MS.clone()));
}

/// Encode the registry in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
