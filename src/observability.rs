use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: wire requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "viewings_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "viewings_request_duration_seconds";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: appointments persisted as Pending.
pub const APPOINTMENTS_CREATED_TOTAL: &str = "viewings_appointments_created_total";

/// Counter: requests refused because the slot was already held.
pub const BOOKING_CONFLICTS_TOTAL: &str = "viewings_booking_conflicts_total";

/// Counter: notifications the gate failed to deliver.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "viewings_notifications_failed_total";

/// Counter: notifications dropped because the dispatch queue was full.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "viewings_notifications_dropped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "viewings_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "viewings_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "viewings_connections_rejected_total";

/// Counter: failed password handshakes.
pub const AUTH_FAILURES_TOTAL: &str = "viewings_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "viewings_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "viewings_wal_flush_batch_size";

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

/// Map a request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Auth { .. } => "auth",
        Request::RequestAppointment { .. } => "request_appointment",
        Request::MyAppointmentsAsTenant { .. } => "my_appointments_as_tenant",
        Request::MyAppointmentsAsLandlord { .. } => "my_appointments_as_landlord",
        Request::UpdateStatus { .. } => "update_status",
        Request::Cancel { .. } => "cancel",
        Request::Slots { .. } => "slots",
        Request::GetAvailability { .. } => "get_availability",
        Request::SetAvailability { .. } => "set_availability",
        Request::SyncApartment { .. } => "sync_apartment",
        Request::SyncApproval { .. } => "sync_approval",
        Request::Subscribe { .. } => "subscribe",
        Request::Unsubscribe { .. } => "unsubscribe",
    }
}
