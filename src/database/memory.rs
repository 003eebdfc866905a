//! In-memory record store
//!
//! Same contract as the SQLite store, kept in process memory. Used by tests
//! and embedding hosts; `set_fail_writes` makes every write fail so rollback
//! paths can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::change_feed::ChangeFeedHub;
use super::{HistoryLog, SessionRepository, StatsRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    ActiveSession, ChangeEvent, ChangeKind, SessionCompletionEvent, SessionHistoryEntry, TaskPomodoroStats,
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, ActiveSession>,
    stats: HashMap<(String, String), TaskPomodoroStats>,
    history: Vec<SessionHistoryEntry>,
}

/// Process-local store; clones share the same tables and feed
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    feed: ChangeFeedHub,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(feed: ChangeFeedHub) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            feed,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn feed(&self) -> &ChangeFeedHub {
        &self.feed
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every stored session regardless of status
    pub async fn all_sessions(&self) -> Vec<ActiveSession> {
        self.tables.read().await.sessions.values().cloned().collect()
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::persistence("store is rejecting writes"));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(ChangeFeedHub::default())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("fail_writes", &self.fail_writes.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn get(&self, id: &str) -> AppResult<Option<ActiveSession>> {
        Ok(self.tables.read().await.sessions.get(id).cloned())
    }

    async fn list_active(&self, user_id: &str) -> AppResult<Vec<ActiveSession>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ActiveSession> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_terminated())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn insert(&self, session: &ActiveSession) -> AppResult<()> {
        self.check_writable()?;

        let mut record = session.clone();
        record.clamp_time_remaining();
        {
            let mut tables = self.tables.write().await;
            if tables.sessions.contains_key(&record.id) {
                return Err(AppError::persistence(format!("session {} already exists", record.id)));
            }
            tables.sessions.insert(record.id.clone(), record.clone());
        }

        self.feed
            .publish(ChangeEvent::session(ChangeKind::Insert, record, Utc::now()));
        Ok(())
    }

    async fn update(&self, session: &ActiveSession) -> AppResult<()> {
        self.check_writable()?;

        let mut record = session.clone();
        record.clamp_time_remaining();
        {
            let mut tables = self.tables.write().await;
            let Some(existing) = tables.sessions.get_mut(&record.id) else {
                return Err(AppError::SessionNotFound);
            };
            if existing.is_terminated() {
                return Err(AppError::SessionTerminated);
            }
            *existing = record.clone();
        }

        self.feed
            .publish(ChangeEvent::session(ChangeKind::Update, record, Utc::now()));
        Ok(())
    }

    async fn update_if_unchanged(&self, session: &ActiveSession, expected_updated_at: DateTime<Utc>) -> AppResult<bool> {
        self.check_writable()?;

        let mut record = session.clone();
        record.clamp_time_remaining();
        {
            let mut tables = self.tables.write().await;
            let Some(existing) = tables.sessions.get_mut(&record.id) else {
                return Ok(false);
            };
            let unchanged = existing.updated_at.timestamp_millis() == expected_updated_at.timestamp_millis();
            if existing.is_terminated() || !unchanged {
                return Ok(false);
            }
            *existing = record.clone();
        }

        self.feed
            .publish(ChangeEvent::session(ChangeKind::Update, record, Utc::now()));
        Ok(true)
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.check_writable()?;

        let removed = self.tables.write().await.sessions.remove(id);
        if let Some(session) = removed {
            self.feed
                .publish(ChangeEvent::session(ChangeKind::Delete, session, Utc::now()));
        }
        Ok(())
    }

    async fn terminate_many(&self, ids: &[String], at: DateTime<Utc>) -> AppResult<Vec<String>> {
        self.check_writable()?;

        let changed: Vec<ActiveSession> = {
            let mut tables = self.tables.write().await;
            ids.iter()
                .filter_map(|id| {
                    let session = tables.sessions.get_mut(id)?;
                    if session.is_terminated() {
                        return None;
                    }
                    session.terminate(at);
                    Some(session.clone())
                })
                .collect()
        };

        let committed_at = Utc::now();
        let mut terminated = Vec::with_capacity(changed.len());
        for session in changed {
            terminated.push(session.id.clone());
            self.feed
                .publish(ChangeEvent::session(ChangeKind::Update, session, committed_at));
        }
        Ok(terminated)
    }
}

#[async_trait]
impl StatsRepository for MemoryStore {
    async fn get_stats(&self, task_id: &str, user_id: &str) -> AppResult<Option<TaskPomodoroStats>> {
        let key = (task_id.to_string(), user_id.to_string());
        Ok(self.tables.read().await.stats.get(&key).cloned())
    }

    async fn get_stats_many(&self, user_id: &str, task_ids: &[String]) -> AppResult<Vec<TaskPomodoroStats>> {
        let tables = self.tables.read().await;
        Ok(task_ids
            .iter()
            .filter_map(|task_id| tables.stats.get(&(task_id.clone(), user_id.to_string())).cloned())
            .collect())
    }

    async fn record_completion(&self, task_id: &str, event: &SessionCompletionEvent) -> AppResult<TaskPomodoroStats> {
        self.check_writable()?;

        let (stats, kind) = {
            let mut tables = self.tables.write().await;
            let key = (task_id.to_string(), event.user_id.clone());
            let kind = if tables.stats.contains_key(&key) {
                ChangeKind::Update
            } else {
                ChangeKind::Insert
            };
            let stats = tables
                .stats
                .entry(key)
                .or_insert_with(|| TaskPomodoroStats::zero(task_id, &event.user_id));
            stats.record(event);
            (stats.clone(), kind)
        };

        self.feed
            .publish(ChangeEvent::task_stats(kind, stats.clone(), Utc::now()));
        Ok(stats)
    }
}

#[async_trait]
impl HistoryLog for MemoryStore {
    async fn append(&self, entry: &SessionHistoryEntry) -> AppResult<()> {
        self.check_writable()?;
        self.tables.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<SessionHistoryEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<SessionHistoryEntry> = tables
            .history
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(entries)
    }
}
