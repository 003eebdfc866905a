//! Logging configuration for the focus-session engine
//!
//! Structured logging setup with appropriate levels and formatting.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::{Config, LogFormat};
use crate::models::{ActiveSession, SessionPhase};

/// Initialize the application logging system
pub fn init_logging(config: &Config) {
    let default_filter = format!(
        "pomodoro_sync={},tower_http=info,axum::rejection=trace",
        config.log_level
    );

    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = Registry::default().with(env_filter);

    let result = match config.log_format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact()
                    .with_ansi(true),
            )
            .try_init(),
    };

    match result {
        Ok(()) => tracing::info!("Logging system initialized"),
        // A subscriber was already installed (tests, embedding hosts)
        Err(e) => tracing::debug!(error = %e, "Logging already initialized"),
    }
}

/// Create a span for session operations
#[macro_export]
macro_rules! session_span {
    ($operation:expr, $user_id:expr) => {
        tracing::info_span!(
            "session_operation",
            operation = %$operation,
            user_id = %$user_id,
            session_id = tracing::field::Empty,
            status = tracing::field::Empty,
        )
    };
}

/// Create a span for database operations
#[macro_export]
macro_rules! db_span {
    ($operation:expr, $table:expr) => {
        tracing::debug_span!(
            "database_operation",
            operation = %$operation,
            table = %$table,
            rows_affected = tracing::field::Empty,
        )
    };
}

/// Log application startup
pub fn log_startup() {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Pomodoro sync engine starting up"
    );
}

/// Log a session state change
pub fn log_session_transition(operation: &str, session: &ActiveSession) {
    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        operation = %operation,
        status = %session.status,
        phase = %session.phase,
        time_remaining_seconds = session.time_remaining_seconds,
        "Session state changed"
    );
}

/// Log an interval that ran to completion
pub fn log_interval_completed(session: &ActiveSession, finished: SessionPhase) {
    tracing::info!(
        session_id = %session.id,
        task_id = ?session.task_id,
        finished = %finished,
        next_phase = %session.phase,
        completed_work_sessions = session.completed_work_sessions,
        completed_break_sessions = session.completed_break_sessions,
        "Interval completed"
    );
}

/// Log a guard violation that was absorbed as a no-op
pub fn log_guard_violation(operation: &str, user_id: &str, reason: &str) {
    tracing::warn!(
        operation = %operation,
        user_id = %user_id,
        reason = %reason,
        "Session action ignored"
    );
}

/// Log a rollback of an optimistic update after a failed write
pub fn log_rollback(operation: &str, user_id: &str, error: &str) {
    tracing::error!(
        operation = %operation,
        user_id = %user_id,
        error = %error,
        "Session write failed, local state rolled back"
    );
}

/// Log stale sessions reclaimed by a sweep
pub fn log_stale_sessions_reclaimed(user_id: &str, max_age_hours: i64, session_ids: &[String]) {
    if session_ids.is_empty() {
        tracing::debug!(user_id = %user_id, max_age_hours, "No stale sessions found");
    } else {
        tracing::info!(
            user_id = %user_id,
            max_age_hours,
            reclaimed = session_ids.len(),
            session_ids = ?session_ids,
            "Stale sessions terminated"
        );
    }
}
