//! Task Pomodoro Statistics Model
//!
//! Cumulative per-(task, user) counters maintained incrementally from
//! completion events, plus the completion event and history entry shapes
//! they are derived from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::active_session::SessionPhase;

/// Cumulative counters for one task of one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPomodoroStats {
    pub task_id: String,
    pub user_id: String,

    pub work_sessions_count: u32,
    pub work_duration_total_minutes: u32,
    pub break_sessions_count: u32,
    pub break_duration_total_minutes: u32,
    pub last_work_session_at: Option<DateTime<Utc>>,

    /// None until the row has been persisted
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskPomodoroStats {
    /// Zero-valued stats for a task with no completions yet
    pub fn zero(task_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            work_sessions_count: 0,
            work_duration_total_minutes: 0,
            break_sessions_count: 0,
            break_duration_total_minutes: 0,
            last_work_session_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Fold one completed interval into the counters
    pub fn record(&mut self, event: &SessionCompletionEvent) {
        if event.session_type == SessionPhase::Work {
            self.work_sessions_count = self.work_sessions_count.saturating_add(1);
            self.work_duration_total_minutes = self
                .work_duration_total_minutes
                .saturating_add(event.duration_minutes);
            self.last_work_session_at = Some(event.completed_at);
        } else {
            self.break_sessions_count = self.break_sessions_count.saturating_add(1);
            self.break_duration_total_minutes = self
                .break_duration_total_minutes
                .saturating_add(event.duration_minutes);
        }

        if self.created_at.is_none() {
            self.created_at = Some(event.completed_at);
        }
        self.updated_at = Some(event.completed_at);
    }

    pub fn is_empty(&self) -> bool {
        self.work_sessions_count == 0 && self.break_sessions_count == 0
    }

    /// Average minutes per completed work session
    pub fn average_work_session_minutes(&self) -> f64 {
        if self.work_sessions_count > 0 {
            f64::from(self.work_duration_total_minutes) / f64::from(self.work_sessions_count)
        } else {
            0.0
        }
    }
}

/// Emitted the instant an interval finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCompletionEvent {
    pub task_id: Option<String>,
    pub session_type: SessionPhase,
    pub user_id: String,
    /// Configured duration of the finished interval
    pub duration_minutes: u32,
    pub completed_at: DateTime<Utc>,
}

/// Append-only record of a completed or interrupted interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub id: String,
    pub user_id: String,
    pub task_id: Option<String>,
    pub duration_minutes: u32,
    pub session_type: SessionPhase,
    /// Interrupted intervals are excluded from duration totals
    pub interrupted: bool,
    pub completed_at: DateTime<Utc>,
}

impl SessionHistoryEntry {
    pub fn new(
        user_id: impl Into<String>,
        task_id: Option<String>,
        session_type: SessionPhase,
        duration_minutes: u32,
        interrupted: bool,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            task_id,
            duration_minutes,
            session_type,
            interrupted,
            completed_at,
        }
    }
}
