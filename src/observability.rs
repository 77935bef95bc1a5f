use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::error::AdError;

// ── Load path ────────────────────────────────────────────────────

/// Counter: outward load outcomes actually published. Labels: placement, outcome.
pub const LOAD_CALLBACKS_TOTAL: &str = "adstock_load_callbacks_total";

/// Counter: candidate fetches issued to the source loader. Labels: placement.
pub const CANDIDATE_FETCHES_TOTAL: &str = "adstock_candidate_fetches_total";

/// Counter: candidates dropped for having no resources. Labels: placement.
pub const CANDIDATES_REJECTED_TOTAL: &str = "adstock_candidates_rejected_total";

/// Counter: per-candidate download results. Labels: outcome.
pub const DOWNLOADS_TOTAL: &str = "adstock_downloads_total";

/// Histogram: resource download latency in seconds.
pub const DOWNLOAD_DURATION_SECONDS: &str = "adstock_download_duration_seconds";

// ── Stock ────────────────────────────────────────────────────────

/// Gauge: ready units per placement. Labels: placement.
pub const STOCK_SIZE: &str = "adstock_stock_size";

/// Counter: stocked units evicted on expiry. Labels: placement.
pub const EXPIRED_UNITS_TOTAL: &str = "adstock_expired_units_total";

/// Gauge: placements currently registered.
pub const PLACEMENTS_ACTIVE: &str = "adstock_placements_active";

// ── Presentation ─────────────────────────────────────────────────

/// Counter: show attempts. Labels: status.
pub const SHOWS_TOTAL: &str = "adstock_shows_total";

/// Counter: events handed to the router. Labels: event.
pub const EVENTS_TOTAL: &str = "adstock_events_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a download result to a short outcome label.
pub fn download_label(error: Option<&AdError>) -> &'static str {
    match error {
        None => "success",
        Some(e) if e.is_download_failure() => "download_failed",
        Some(_) => "server_error",
    }
}
