use std::net::SocketAddr;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: availability validations. Labels: outcome.
pub const VALIDATIONS_TOTAL: &str = "equipalloc_validations_total";

/// Counter: allocation attempts. Labels: status.
pub const ALLOCATIONS_TOTAL: &str = "equipalloc_allocations_total";

/// Counter: release attempts. Labels: status.
pub const RELEASES_TOTAL: &str = "equipalloc_releases_total";

// ── Conflicts ───────────────────────────────────────────────────

/// Gauge: conflicts awaiting resolution.
pub const CONFLICTS_ACTIVE: &str = "equipalloc_conflicts_active";

/// Counter: conflicts raised (including replacements).
pub const CONFLICTS_RAISED_TOTAL: &str = "equipalloc_conflicts_raised_total";

/// Counter: conflicts resolved. Labels: choice.
pub const CONFLICTS_RESOLVED_TOTAL: &str = "equipalloc_conflicts_resolved_total";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: completed reconciliation passes.
pub const SYNC_PASSES_TOTAL: &str = "equipalloc_sync_passes_total";

/// Counter: per-item reconciliation failures.
pub const SYNC_FAILURES_TOTAL: &str = "equipalloc_sync_failures_total";

/// Histogram: reconciliation pass duration in seconds.
pub const SYNC_DURATION_SECONDS: &str = "equipalloc_sync_duration_seconds";

// ── Ledger ──────────────────────────────────────────────────────

/// Histogram: ledger group-commit flush duration in seconds.
pub const LEDGER_FLUSH_DURATION_SECONDS: &str = "equipalloc_ledger_flush_duration_seconds";

/// Histogram: ledger group-commit batch size (events per flush).
pub const LEDGER_FLUSH_BATCH_SIZE: &str = "equipalloc_ledger_flush_batch_size";

/// Counter: ledger batches that failed to persist.
pub const LEDGER_WRITE_FAILURES_TOTAL: &str = "equipalloc_ledger_write_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
