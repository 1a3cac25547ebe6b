use std::net::SocketAddr;

use crate::protocol::ClientMessage;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol messages handled. Labels: message, status.
pub const MESSAGES_TOTAL: &str = "courtside_messages_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "courtside_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "courtside_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courtside_connections_rejected_total";

/// Counter: failed auth attempts.
pub const AUTH_FAILURES_TOTAL: &str = "courtside_auth_failures_total";

/// Counter: bookings successfully created.
pub const BOOKINGS_TOTAL: &str = "courtside_bookings_total";

/// Counter: booking attempts rejected by the conflict checker.
pub const BOOKING_CONFLICTS_TOTAL: &str = "courtside_booking_conflicts_total";

/// Counter: messages delivered to court subscribers.
pub const BROADCASTS_TOTAL: &str = "courtside_broadcasts_total";

/// Counter: notifications handed to the mailer.
pub const NOTIFICATIONS_TOTAL: &str = "courtside_notifications_total";

/// Counter: notification deliveries that failed (best-effort, logged only).
pub const NOTIFICATION_FAILURES_TOTAL: &str = "courtside_notification_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtside_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtside_wal_flush_batch_size";

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

/// Map a message variant to a short label for metrics.
pub fn message_label(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Auth { .. } => "auth",
        ClientMessage::Register { .. } => "register",
        ClientMessage::Sub { .. } => "sub",
        ClientMessage::Unsub { .. } => "unsub",
        ClientMessage::Book { .. } => "book",
        ClientMessage::Reschedule { .. } => "reschedule",
        ClientMessage::Cancel { .. } => "cancel",
        ClientMessage::Courts => "courts",
        ClientMessage::Bookings => "bookings",
        ClientMessage::Availability { .. } => "availability",
        ClientMessage::CreateCourt { .. } => "create_court",
        ClientMessage::DeleteCourt { .. } => "delete_court",
        ClientMessage::AddWorker { .. } => "add_worker",
        ClientMessage::AddSlot { .. } => "add_slot",
        ClientMessage::RemoveSlot { .. } => "remove_slot",
        ClientMessage::CreateEquipment { .. } => "create_equipment",
        ClientMessage::AssignEquipment { .. } => "assign_equipment",
        ClientMessage::ReturnEquipment { .. } => "return_equipment",
        ClientMessage::Equipment => "equipment",
    }
}
