use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rackd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rackd_query_duration_seconds";

/// Counter: drop checks evaluated. Labels: outcome.
pub const DROP_DECISIONS_TOTAL: &str = "rackd_drop_decisions_total";

/// Counter: moves rejected at commit time. Labels: reason.
pub const COMMITS_REJECTED_TOTAL: &str = "rackd_commits_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "rackd_connections_active";
pub const CONNECTIONS_TOTAL: &str = "rackd_connections_total";

/// Counter: connections refused at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rackd_connections_rejected_total";

/// Gauge: properties with an open rack.
pub const PROPERTIES_ACTIVE: &str = "rackd_properties_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rackd_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "rackd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::SetRoomStatus { .. } => "set_room_status",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::Move { moves } if moves.len() > 1 => "batch_move",
        Command::Move { .. } => "move",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::SelectRooms => "select_rooms",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectDropCheck { .. } => "select_drop_check",
        Command::SelectAlternatives { .. } => "select_alternatives",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn batch_moves_get_their_own_label() {
        let (a, b) = (Ulid::new(), Ulid::new());
        assert_eq!(command_label(&Command::Move { moves: vec![(a, b)] }), "move");
        assert_eq!(
            command_label(&Command::Move { moves: vec![(a, b), (b, a)] }),
            "batch_move"
        );
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
