use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: holds placed.
pub const HOLDS_PLACED_TOTAL: &str = "slotbook_holds_placed_total";

/// Counter: appointments booked from holds.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "slotbook_appointments_booked_total";

/// Counter: appointments cancelled.
pub const APPOINTMENTS_CANCELLED_TOTAL: &str = "slotbook_appointments_cancelled_total";

/// Counter: appointments rescheduled.
pub const APPOINTMENTS_RESCHEDULED_TOTAL: &str = "slotbook_appointments_rescheduled_total";

/// Counter: writes rejected by the conflict scan. Labels: reason
/// (appointment|hold).
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotbook_booking_conflicts_total";

/// Counter: creates answered from the idempotency index without a write.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "slotbook_idempotent_replays_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotbook_tenants_active";

/// Counter: expired holds reclaimed by the reaper.
pub const HOLDS_REAPED_TOTAL: &str = "slotbook_holds_reaped_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if port
/// is None. Call once from the embedding process.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install a default fmt tracing subscriber. Embedders with their own
/// subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
