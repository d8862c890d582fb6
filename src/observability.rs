use std::net::SocketAddr;

// ── RED metrics (mutations) ─────────────────────────────────────

/// Counter: booking mutations. Labels: op, status.
pub const MUTATIONS_TOTAL: &str = "slotline_mutations_total";

/// Histogram: mutation latency in seconds, check + write. Labels: op.
pub const MUTATION_DURATION_SECONDS: &str = "slotline_mutation_duration_seconds";

/// Counter: availability checks. Labels: result (free | taken).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "slotline_availability_checks_total";

// ── Sync metrics (store + feed) ─────────────────────────────────

/// Counter: change events that altered a local store. Labels: kind.
pub const FEED_EVENTS_APPLIED_TOTAL: &str = "slotline_feed_events_applied_total";

/// Counter: change events lost to a lagging subscriber.
pub const FEED_LAGGED_TOTAL: &str = "slotline_feed_lagged_total";

/// Counter: snapshot loads. Labels: status.
pub const SNAPSHOT_LOADS_TOTAL: &str = "slotline_snapshot_loads_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
