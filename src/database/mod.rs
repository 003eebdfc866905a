//! Database abstraction layer
//!
//! Traits for the durable record store, the change-feed and the history log,
//! with an in-memory implementation for tests and embedding and a SQLite
//! implementation built on SQLx.

pub mod change_feed;
pub mod connection;
pub mod memory;
pub mod sqlite_store;

pub use change_feed::{ChangeFeed, ChangeFeedHub, ChangeStream};
pub use connection::DatabaseManager;
pub use memory::MemoryStore;
pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{ActiveSession, SessionCompletionEvent, SessionHistoryEntry, TaskPomodoroStats};

/// Durable storage of active sessions
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &str) -> AppResult<Option<ActiveSession>>;

    /// Non-terminated sessions of a user, most recently written first
    async fn list_active(&self, user_id: &str) -> AppResult<Vec<ActiveSession>>;

    async fn insert(&self, session: &ActiveSession) -> AppResult<()>;

    /// Write the full record.
    ///
    /// Fails with `SessionNotFound` if it does not exist and with
    /// `SessionTerminated` if the stored record has already ended.
    async fn update(&self, session: &ActiveSession) -> AppResult<()>;

    /// Write the full record only while the stored one is not terminated and
    /// was last written at `expected_updated_at` (compared in milliseconds).
    ///
    /// Returns whether the record was written. Nothing is published otherwise.
    async fn update_if_unchanged(&self, session: &ActiveSession, expected_updated_at: DateTime<Utc>) -> AppResult<bool>;

    async fn delete(&self, id: &str) -> AppResult<()>;

    /// Bulk-terminate the listed sessions that are not already terminated.
    ///
    /// Returns the ids that actually changed.
    async fn terminate_many(&self, ids: &[String], at: DateTime<Utc>) -> AppResult<Vec<String>>;
}

/// Durable storage of cumulative per-task counters
#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn get_stats(&self, task_id: &str, user_id: &str) -> AppResult<Option<TaskPomodoroStats>>;

    /// Single bulk read; tasks without a row are simply absent
    async fn get_stats_many(&self, user_id: &str, task_ids: &[String]) -> AppResult<Vec<TaskPomodoroStats>>;

    /// Atomically create-or-increment the row for the event's task
    async fn record_completion(&self, task_id: &str, event: &SessionCompletionEvent) -> AppResult<TaskPomodoroStats>;
}

/// Append-only interval history
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, entry: &SessionHistoryEntry) -> AppResult<()>;

    async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<SessionHistoryEntry>>;
}
