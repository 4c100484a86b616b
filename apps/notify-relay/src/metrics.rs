use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

pub static ROUTE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("relay_route_total", "routed notifications by delivery outcome"),
        &["outcome"],
    )
    .expect("valid counter opts");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::with_opts(Opts::new(
        "relay_connections_active",
        "connections currently registered",
    ))
    .expect("valid gauge opts");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("relay_connections_total", "connections accepted"));

pub static UPGRADE_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| counter("relay_upgrade_failures_total", "failed websocket upgrades"));

pub static PENDING_ENQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "relay_pending_enqueued_total",
        "notifications stored for offline users",
    )
});

pub static DRAIN_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "relay_drain_delivered_total",
        "stored notifications delivered on reconnect",
    )
});

pub static DRAIN_REQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "relay_drain_requeued_total",
        "stored notifications put back after a failed reconnect drain",
    )
});

pub static HEARTBEAT_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "relay_heartbeat_timeouts_total",
        "connections dropped for missing the liveness window",
    )
});

pub static WRITE_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "relay_write_timeouts_total",
        "peer writes abandoned after the write timeout",
    )
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "metrics encode error");
    }
    buffer
}
