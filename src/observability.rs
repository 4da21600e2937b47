use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "swimslot_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "swimslot_command_duration_seconds";

/// Counter: bookings turned away at the capacity check. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "swimslot_bookings_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "swimslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "swimslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "swimslot_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "swimslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "swimslot_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "swimslot_compactions_total";

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
        Command::RegisterInstructor { .. } => "register_instructor",
        Command::UpdateInstructorStyles { .. } => "update_instructor_styles",
        Command::RemoveInstructor { .. } => "remove_instructor",
        Command::GetInstructor { .. } => "get_instructor",
        Command::RegisterSwimmer { .. } => "register_swimmer",
        Command::UpdateSwimmerStyles { .. } => "update_swimmer_styles",
        Command::RemoveSwimmer { .. } => "remove_swimmer",
        Command::GetSwimmer { .. } => "get_swimmer",
        Command::SetAvailability { .. } => "set_availability",
        Command::ApplyAvailability { .. } => "apply_availability",
        Command::GenerateSlots { .. } => "generate_slots",
        Command::CreateSlot(_) => "create_slot",
        Command::UpdateSlot { .. } => "update_slot",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::GetSlot { .. } => "get_slot",
        Command::FindOverlapping { .. } => "find_overlapping",
        Command::BookLesson { .. } => "book_lesson",
        Command::CancelLesson { .. } => "cancel_lesson",
        Command::SetLessonStatus { .. } => "set_lesson_status",
        Command::GetLesson { .. } => "get_lesson",
        Command::GetInstructorSchedule { .. } => "get_instructor_schedule",
        Command::GetAvailableSlots { .. } => "get_available_slots",
        Command::GetWeeklySchedule { .. } => "get_weekly_schedule",
        Command::GetSwimmerLessons { .. } => "get_swimmer_lessons",
        Command::GetWeeklyStatistics { .. } => "get_weekly_statistics",
        Command::GetAvailableInstructors { .. } => "get_available_instructors",
        Command::GetConflicts { .. } => "get_conflicts",
        Command::GetLessonConflicts { .. } => "get_lesson_conflicts",
    }
}
