use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts (create + update). Labels: status.
pub const BOOKINGS_TOTAL: &str = "stayd_bookings_total";

/// Counter: booking rejections caused by an overlapping reservation.
pub const BOOKING_CONFLICTS_TOTAL: &str = "stayd_booking_conflicts_total";

/// Counter: calendar rows written by materialization runs.
pub const CALENDAR_ROWS_MATERIALIZED_TOTAL: &str = "stayd_calendar_rows_materialized_total";

/// Histogram: duration of one calendar materialization run in seconds.
pub const CALENDAR_REFRESH_DURATION_SECONDS: &str = "stayd_calendar_refresh_duration_seconds";

/// Counter: materialization runs aborted on a data-integrity violation.
/// Anything above zero means the overlap invariant was breached somewhere.
pub const CALENDAR_INTEGRITY_FAILURES_TOTAL: &str = "stayd_calendar_integrity_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: venues currently loaded.
pub const VENUES_ACTIVE: &str = "stayd_venues_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayd_wal_flush_batch_size";

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
