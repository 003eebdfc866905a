//! Change-feed event types
//!
//! Typed payloads pushed by the durable store whenever a session or stats
//! row is inserted, updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::active_session::ActiveSession;
use super::task_stats::TaskPomodoroStats;

/// Tables that publish to the change-feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Table {
    ActiveSessions,
    TaskPomodoroStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row carried by a change event; for deletes this is the removed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record")]
pub enum ChangeRecord {
    #[serde(rename = "active_sessions")]
    Session(ActiveSession),
    #[serde(rename = "task_pomodoro_stats")]
    TaskStats(TaskPomodoroStats),
}

impl ChangeRecord {
    pub fn table(&self) -> Table {
        match self {
            ChangeRecord::Session(_) => Table::ActiveSessions,
            ChangeRecord::TaskStats(_) => Table::TaskPomodoroStats,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            ChangeRecord::Session(session) => &session.user_id,
            ChangeRecord::TaskStats(stats) => &stats.user_id,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            ChangeRecord::Session(session) => session.task_id.as_deref(),
            ChangeRecord::TaskStats(stats) => Some(&stats.task_id),
        }
    }
}

/// One committed change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    #[serde(flatten)]
    pub record: ChangeRecord,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, record: ChangeRecord, committed_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            record,
            committed_at,
        }
    }

    pub fn session(kind: ChangeKind, session: ActiveSession, committed_at: DateTime<Utc>) -> Self {
        Self::new(kind, ChangeRecord::Session(session), committed_at)
    }

    pub fn task_stats(kind: ChangeKind, stats: TaskPomodoroStats, committed_at: DateTime<Utc>) -> Self {
        Self::new(kind, ChangeRecord::TaskStats(stats), committed_at)
    }
}

/// Column predicate scoping a change-feed subscription
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeFilter {
    pub table: Option<Table>,
    pub user_id: Option<String>,
    pub task_id: Option<String>,
}

impl ChangeFilter {
    /// Every change of one user's sessions
    pub fn sessions_for_user(user_id: impl Into<String>) -> Self {
        Self {
            table: Some(Table::ActiveSessions),
            user_id: Some(user_id.into()),
            task_id: None,
        }
    }

    /// Every change of one (task, user) stats row
    pub fn stats_for(task_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            table: Some(Table::TaskPomodoroStats),
            user_id: Some(user_id.into()),
            task_id: Some(task_id.into()),
        }
    }

    /// Every change touching one user, any table
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            table: None,
            user_id: Some(user_id.into()),
            task_id: None,
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(table) = self.table {
            if event.record.table() != table {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.record.user_id() != user_id {
                return false;
            }
        }
        if let Some(task_id) = &self.task_id {
            if event.record.task_id() != Some(task_id.as_str()) {
                return false;
            }
        }
        true
    }
}
