//! SQLite-backed record store
//!
//! Implements the session, stats and history traits over a SQLx pool and
//! publishes every committed change to the in-process change-feed.
//! Timestamps are stored as Unix milliseconds, enums as their snake_case text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite};
use tracing::Instrument;

use super::change_feed::ChangeFeedHub;
use super::connection::DatabaseManager;
use super::{HistoryLog, SessionRepository, StatsRepository};
use crate::db_span;
use crate::error::{AppError, AppResult};
use crate::models::{
    ActiveSession, ChangeEvent, ChangeKind, SessionCompletionEvent, SessionHistoryEntry, SessionPhase,
    SessionStatus, TaskPomodoroStats,
};

const SESSION_COLUMNS: &str = "id, user_id, task_id, task_title, status, phase, work_duration, \
     short_break_duration, long_break_duration, sessions_until_long_break, completed_work_sessions, \
     completed_break_sessions, start_time, pause_time, time_remaining_seconds, interval_duration, \
     show_floating_indicator, show_card, created_at, updated_at";

const STATS_COLUMNS: &str = "task_id, user_id, work_sessions_count, work_duration_total_minutes, \
     break_sessions_count, break_duration_total_minutes, last_work_session_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ActiveSessionRow {
    id: String,
    user_id: String,
    task_id: Option<String>,
    task_title: Option<String>,
    status: String,
    phase: String,
    work_duration: i64,
    short_break_duration: i64,
    long_break_duration: i64,
    sessions_until_long_break: i64,
    completed_work_sessions: i64,
    completed_break_sessions: i64,
    start_time: Option<i64>,
    pause_time: Option<i64>,
    time_remaining_seconds: i64,
    interval_duration: Option<i64>,
    show_floating_indicator: bool,
    show_card: bool,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ActiveSessionRow> for ActiveSession {
    type Error = AppError;

    fn try_from(row: ActiveSessionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SessionStatus>()
            .map_err(|_| AppError::CorruptRecord(format!("session {} has status {}", row.id, row.status)))?;
        let phase = row
            .phase
            .parse::<SessionPhase>()
            .map_err(|_| AppError::CorruptRecord(format!("session {} has phase {}", row.id, row.phase)))?;

        Ok(ActiveSession {
            status,
            phase,
            work_duration: to_u32(row.work_duration, "work_duration")?,
            short_break_duration: to_u32(row.short_break_duration, "short_break_duration")?,
            long_break_duration: to_u32(row.long_break_duration, "long_break_duration")?,
            sessions_until_long_break: to_u32(row.sessions_until_long_break, "sessions_until_long_break")?,
            completed_work_sessions: to_u32(row.completed_work_sessions, "completed_work_sessions")?,
            completed_break_sessions: to_u32(row.completed_break_sessions, "completed_break_sessions")?,
            start_time: row.start_time.map(|ms| from_millis(ms, "start_time")).transpose()?,
            pause_time: row.pause_time.map(|ms| from_millis(ms, "pause_time")).transpose()?,
            time_remaining_seconds: row.time_remaining_seconds,
            interval_duration: row
                .interval_duration
                .map(|minutes| to_u32(minutes, "interval_duration"))
                .transpose()?,
            show_floating_indicator: row.show_floating_indicator,
            show_card: row.show_card,
            created_at: from_millis(row.created_at, "created_at")?,
            updated_at: from_millis(row.updated_at, "updated_at")?,
            id: row.id,
            user_id: row.user_id,
            task_id: row.task_id,
            task_title: row.task_title,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskStatsRow {
    task_id: String,
    user_id: String,
    work_sessions_count: i64,
    work_duration_total_minutes: i64,
    break_sessions_count: i64,
    break_duration_total_minutes: i64,
    last_work_session_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TaskStatsRow> for TaskPomodoroStats {
    type Error = AppError;

    fn try_from(row: TaskStatsRow) -> Result<Self, Self::Error> {
        Ok(TaskPomodoroStats {
            task_id: row.task_id,
            user_id: row.user_id,
            work_sessions_count: to_u32(row.work_sessions_count, "work_sessions_count")?,
            work_duration_total_minutes: to_u32(row.work_duration_total_minutes, "work_duration_total_minutes")?,
            break_sessions_count: to_u32(row.break_sessions_count, "break_sessions_count")?,
            break_duration_total_minutes: to_u32(row.break_duration_total_minutes, "break_duration_total_minutes")?,
            last_work_session_at: row
                .last_work_session_at
                .map(|ms| from_millis(ms, "last_work_session_at"))
                .transpose()?,
            created_at: Some(from_millis(row.created_at, "created_at")?),
            updated_at: Some(from_millis(row.updated_at, "updated_at")?),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: String,
    user_id: String,
    task_id: Option<String>,
    duration_minutes: i64,
    session_type: String,
    interrupted: bool,
    completed_at: i64,
}

impl TryFrom<HistoryRow> for SessionHistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let session_type = row
            .session_type
            .parse::<SessionPhase>()
            .map_err(|_| AppError::CorruptRecord(format!("history {} has type {}", row.id, row.session_type)))?;

        Ok(SessionHistoryEntry {
            duration_minutes: to_u32(row.duration_minutes, "duration_minutes")?,
            completed_at: from_millis(row.completed_at, "completed_at")?,
            session_type,
            interrupted: row.interrupted,
            id: row.id,
            user_id: row.user_id,
            task_id: row.task_id,
        })
    }
}

fn to_u32(value: i64, column: &str) -> AppResult<u32> {
    u32::try_from(value).map_err(|_| AppError::CorruptRecord(format!("{} out of range: {}", column, value)))
}

fn from_millis(millis: i64, column: &str) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::CorruptRecord(format!("{} is not a valid timestamp: {}", column, millis)))
}

/// Durable store over SQLite
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeedHub,
}

impl SqliteStore {
    pub fn new(db: &DatabaseManager, feed: ChangeFeedHub) -> Self {
        Self {
            pool: db.pool.clone(),
            feed,
        }
    }

    /// Feed this store publishes committed changes to
    pub fn feed(&self) -> &ChangeFeedHub {
        &self.feed
    }

    /// Overwrite a non-terminated row, optionally only if its `updated_at`
    /// still matches; returns the number of rows written
    async fn write_session(&self, record: &ActiveSession, expected_updated_at: Option<i64>) -> AppResult<u64> {
        let mut sql = String::from(
            r#"
            UPDATE active_sessions SET
                user_id = ?, task_id = ?, task_title = ?, status = ?, phase = ?,
                work_duration = ?, short_break_duration = ?, long_break_duration = ?,
                sessions_until_long_break = ?, completed_work_sessions = ?, completed_break_sessions = ?,
                start_time = ?, pause_time = ?, time_remaining_seconds = ?, interval_duration = ?,
                show_floating_indicator = ?, show_card = ?, created_at = ?, updated_at = ?
            WHERE id = ? AND status != 'terminated'
            "#,
        );
        if expected_updated_at.is_some() {
            sql.push_str(" AND updated_at = ?");
        }

        let mut query = sqlx::query(&sql)
            .bind(&record.user_id)
            .bind(&record.task_id)
            .bind(&record.task_title)
            .bind(record.status.to_string())
            .bind(record.phase.to_string())
            .bind(i64::from(record.work_duration))
            .bind(i64::from(record.short_break_duration))
            .bind(i64::from(record.long_break_duration))
            .bind(i64::from(record.sessions_until_long_break))
            .bind(i64::from(record.completed_work_sessions))
            .bind(i64::from(record.completed_break_sessions))
            .bind(record.start_time.map(|t| t.timestamp_millis()))
            .bind(record.pause_time.map(|t| t.timestamp_millis()))
            .bind(record.time_remaining_seconds)
            .bind(record.interval_duration.map(i64::from))
            .bind(record.show_floating_indicator)
            .bind(record.show_card)
            .bind(record.created_at.timestamp_millis())
            .bind(record.updated_at.timestamp_millis())
            .bind(&record.id);
        if let Some(expected) = expected_updated_at {
            query = query.bind(expected);
        }

        let result = query
            .execute(&self.pool)
            .instrument(db_span!("UPDATE", "active_sessions"))
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_session(&self, id: &str) -> AppResult<Option<ActiveSession>> {
        let sql = format!("SELECT {} FROM active_sessions WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query_as::<_, ActiveSessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ActiveSession::try_from).transpose()
    }
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn get(&self, id: &str) -> AppResult<Option<ActiveSession>> {
        self.fetch_session(id)
            .instrument(db_span!("SELECT", "active_sessions"))
            .await
    }

    async fn list_active(&self, user_id: &str) -> AppResult<Vec<ActiveSession>> {
        let sql = format!(
            "SELECT {} FROM active_sessions WHERE user_id = ? AND status != 'terminated' ORDER BY updated_at DESC",
            SESSION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ActiveSessionRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT", "active_sessions"))
            .await?;

        rows.into_iter().map(ActiveSession::try_from).collect()
    }

    async fn insert(&self, session: &ActiveSession) -> AppResult<()> {
        let mut record = session.clone();
        record.clamp_time_remaining();

        let sql = format!(
            "INSERT INTO active_sessions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SESSION_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.task_id)
            .bind(&record.task_title)
            .bind(record.status.to_string())
            .bind(record.phase.to_string())
            .bind(i64::from(record.work_duration))
            .bind(i64::from(record.short_break_duration))
            .bind(i64::from(record.long_break_duration))
            .bind(i64::from(record.sessions_until_long_break))
            .bind(i64::from(record.completed_work_sessions))
            .bind(i64::from(record.completed_break_sessions))
            .bind(record.start_time.map(|t| t.timestamp_millis()))
            .bind(record.pause_time.map(|t| t.timestamp_millis()))
            .bind(record.time_remaining_seconds)
            .bind(record.interval_duration.map(i64::from))
            .bind(record.show_floating_indicator)
            .bind(record.show_card)
            .bind(record.created_at.timestamp_millis())
            .bind(record.updated_at.timestamp_millis())
            .execute(&self.pool)
            .instrument(db_span!("INSERT", "active_sessions"))
            .await?;

        self.feed
            .publish(ChangeEvent::session(ChangeKind::Insert, record, Utc::now()));
        Ok(())
    }

    async fn update(&self, session: &ActiveSession) -> AppResult<()> {
        let mut record = session.clone();
        record.clamp_time_remaining();

        if self.write_session(&record, None).await? == 0 {
            // Tell a missing row apart from an ended one
            return match self.fetch_session(&record.id).await? {
                Some(_) => Err(AppError::SessionTerminated),
                None => Err(AppError::SessionNotFound),
            };
        }

        self.feed
            .publish(ChangeEvent::session(ChangeKind::Update, record, Utc::now()));
        Ok(())
    }

    async fn update_if_unchanged(&self, session: &ActiveSession, expected_updated_at: DateTime<Utc>) -> AppResult<bool> {
        let mut record = session.clone();
        record.clamp_time_remaining();

        let written = self
            .write_session(&record, Some(expected_updated_at.timestamp_millis()))
            .await?;
        if written == 0 {
            return Ok(false);
        }

        self.feed
            .publish(ChangeEvent::session(ChangeKind::Update, record, Utc::now()));
        Ok(true)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let Some(existing) = self.fetch_session(id).await? else {
            return Ok(());
        };

        let result = sqlx::query("DELETE FROM active_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span!("DELETE", "active_sessions"))
            .await?;

        if result.rows_affected() > 0 {
            self.feed
                .publish(ChangeEvent::session(ChangeKind::Delete, existing, Utc::now()));
        }
        Ok(())
    }

    async fn terminate_many(&self, ids: &[String], at: DateTime<Utc>) -> AppResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let span = db_span!("UPDATE", "active_sessions");
        let mut tx = self.pool.begin().await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM active_sessions WHERE status != 'terminated' AND id IN (",
            SESSION_COLUMNS
        ));
        let mut separated = select.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
        let rows = select
            .build_query_as::<ActiveSessionRow>()
            .fetch_all(&mut *tx)
            .await?;

        let mut sessions = rows
            .into_iter()
            .map(ActiveSession::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        if sessions.is_empty() {
            return Ok(Vec::new());
        }

        let mut update = QueryBuilder::<Sqlite>::new(
            "UPDATE active_sessions SET status = 'terminated', start_time = NULL, pause_time = NULL, \
             interval_duration = NULL, updated_at = ",
        );
        update.push_bind(at.timestamp_millis());
        update.push(" WHERE status != 'terminated' AND id IN (");
        let mut separated = update.separated(", ");
        for session in &sessions {
            separated.push_bind(session.id.clone());
        }
        separated.push_unseparated(")");
        let result = update.build().execute(&mut *tx).await?;
        tx.commit().await?;

        span.record("rows_affected", result.rows_affected());

        let committed_at = Utc::now();
        let mut terminated = Vec::with_capacity(sessions.len());
        for session in &mut sessions {
            session.terminate(at);
            terminated.push(session.id.clone());
            self.feed
                .publish(ChangeEvent::session(ChangeKind::Update, session.clone(), committed_at));
        }
        Ok(terminated)
    }
}

#[async_trait]
impl StatsRepository for SqliteStore {
    async fn get_stats(&self, task_id: &str, user_id: &str) -> AppResult<Option<TaskPomodoroStats>> {
        let sql = format!(
            "SELECT {} FROM task_pomodoro_stats WHERE task_id = ? AND user_id = ?",
            STATS_COLUMNS
        );
        let row = sqlx::query_as::<_, TaskStatsRow>(&sql)
            .bind(task_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span!("SELECT", "task_pomodoro_stats"))
            .await?;

        row.map(TaskPomodoroStats::try_from).transpose()
    }

    async fn get_stats_many(&self, user_id: &str, task_ids: &[String]) -> AppResult<Vec<TaskPomodoroStats>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM task_pomodoro_stats WHERE user_id = ",
            STATS_COLUMNS
        ));
        builder.push_bind(user_id.to_string());
        builder.push(" AND task_id IN (");
        let mut separated = builder.separated(", ");
        for task_id in task_ids {
            separated.push_bind(task_id.clone());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<TaskStatsRow>()
            .fetch_all(&self.pool)
            .instrument(db_span!("SELECT", "task_pomodoro_stats"))
            .await?;

        rows.into_iter().map(TaskPomodoroStats::try_from).collect()
    }

    async fn record_completion(&self, task_id: &str, event: &SessionCompletionEvent) -> AppResult<TaskPomodoroStats> {
        // Increment computed from a zero row, added on conflict
        let mut delta = TaskPomodoroStats::zero(task_id, &event.user_id);
        delta.record(event);
        let completed_at = event.completed_at.timestamp_millis();

        let sql = format!(
            r#"
            INSERT INTO task_pomodoro_stats ({columns})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (task_id, user_id) DO UPDATE SET
                work_sessions_count = work_sessions_count + excluded.work_sessions_count,
                work_duration_total_minutes = work_duration_total_minutes + excluded.work_duration_total_minutes,
                break_sessions_count = break_sessions_count + excluded.break_sessions_count,
                break_duration_total_minutes = break_duration_total_minutes + excluded.break_duration_total_minutes,
                last_work_session_at = COALESCE(excluded.last_work_session_at, last_work_session_at),
                updated_at = excluded.updated_at
            RETURNING {columns}
            "#,
            columns = STATS_COLUMNS
        );
        let row = sqlx::query_as::<_, TaskStatsRow>(&sql)
            .bind(&delta.task_id)
            .bind(&delta.user_id)
            .bind(i64::from(delta.work_sessions_count))
            .bind(i64::from(delta.work_duration_total_minutes))
            .bind(i64::from(delta.break_sessions_count))
            .bind(i64::from(delta.break_duration_total_minutes))
            .bind(delta.last_work_session_at.map(|t| t.timestamp_millis()))
            .bind(completed_at)
            .bind(completed_at)
            .fetch_one(&self.pool)
            .instrument(db_span!("UPSERT", "task_pomodoro_stats"))
            .await?;

        let stats = TaskPomodoroStats::try_from(row)?;
        let kind = if stats.work_sessions_count + stats.break_sessions_count == 1 {
            ChangeKind::Insert
        } else {
            ChangeKind::Update
        };
        self.feed
            .publish(ChangeEvent::task_stats(kind, stats.clone(), Utc::now()));
        Ok(stats)
    }
}

#[async_trait]
impl HistoryLog for SqliteStore {
    async fn append(&self, entry: &SessionHistoryEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pomodoro_history (id, user_id, task_id, duration_minutes, session_type, interrupted, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.task_id)
        .bind(i64::from(entry.duration_minutes))
        .bind(entry.session_type.to_string())
        .bind(entry.interrupted)
        .bind(entry.completed_at.timestamp_millis())
        .execute(&self.pool)
        .instrument(db_span!("INSERT", "pomodoro_history"))
        .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<SessionHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, user_id, task_id, duration_minutes, session_type, interrupted, completed_at
            FROM pomodoro_history
            WHERE user_id = ?
            ORDER BY completed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .instrument(db_span!("SELECT", "pomodoro_history"))
        .await?;

        rows.into_iter().map(SessionHistoryEntry::try_from).collect()
    }
}
