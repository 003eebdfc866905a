//! Models module for the focus-session engine
//!
//! Contains the session, statistics and change-feed data models.

pub mod active_session;
pub mod change_event;
pub mod task_stats;

// Re-export commonly used types
pub use active_session::{
    next_phase_after_completion, ActiveSession, FinishedInterval, SessionPhase, SessionStatus,
    TaskRef, TimerSessionError, TimerSettings,
};
pub use change_event::{ChangeEvent, ChangeFilter, ChangeKind, ChangeRecord, Table};
pub use task_stats::{SessionCompletionEvent, SessionHistoryEntry, TaskPomodoroStats};
