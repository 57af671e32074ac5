use std::net::SocketAddr;

// ── Request-driven metrics ──────────────────────────────────────

/// Counter: HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "drivetime_http_requests_total";

/// Histogram: availability query latency in seconds.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "drivetime_availability_query_duration_seconds";

/// Counter: slots dropped by the not-bookable-online re-filter. Non-zero means
/// the primary query let them through.
pub const AVAILABILITY_DEFENSE_FILTERED_TOTAL: &str = "drivetime_availability_defense_filtered_total";

/// Counter: reserve attempts. Labels: outcome (reserved, conflict).
pub const SLOT_RESERVATIONS_TOTAL: &str = "drivetime_slot_reservations_total";

/// Counter: booking confirmations. Labels: outcome (booked, expired, failed).
pub const BOOKINGS_TOTAL: &str = "drivetime_bookings_total";

// ── Slot state changes ──────────────────────────────────────────

/// Counter: slots reopened by release operations.
pub const SLOTS_RELEASED_TOTAL: &str = "drivetime_slots_released_total";

/// Counter: slots closed by invalidate operations.
pub const SLOTS_INVALIDATED_TOTAL: &str = "drivetime_slots_invalidated_total";

/// Counter: lapsed holds reopened by the sweeper.
pub const HOLDS_EXPIRED_TOTAL: &str = "drivetime_holds_expired_total";

/// Counter: release/invalidate/enqueue steps that failed after a primary write.
/// Labels: step.
pub const RECONCILIATION_FAILURES_TOTAL: &str = "drivetime_reconciliation_failures_total";

// ── Recalculation ───────────────────────────────────────────────

/// Counter: recalculation requests. Labels: outcome (queued, coalesced, rejected).
pub const RECALC_ENQUEUED_TOTAL: &str = "drivetime_recalc_enqueued_total";

/// Counter: regenerations that failed every attempt.
pub const RECALC_FAILURES_TOTAL: &str = "drivetime_recalc_failures_total";

/// Histogram: slot regeneration duration in seconds.
pub const RECALC_DURATION_SECONDS: &str = "drivetime_recalc_duration_seconds";

// ── Resource utilization ────────────────────────────────────────

/// Gauge: number of active tenants (open slot stores).
pub const TENANTS_ACTIVE: &str = "drivetime_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "drivetime_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "drivetime_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
