//! Session Store
//!
//! Owns one execution context's view of the user's active session and
//! drives it through the state machine. Every action is applied
//! optimistically (published through the local broadcast hub), then the
//! full record is persisted. When the write fails the view is rolled back to
//! what the store holds and the error is returned; there is no retry.
//!
//! Guard violations (pausing a stopped session, starting twice) are absorbed
//! as no-ops with a warning and return the current view unchanged.
//!
//! Completing an interval is a claim: the write only lands if the stored
//! record is still the one this context completed from, so an interval held
//! by several devices is counted once. A context that loses the claim adopts
//! the stored value.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, field, info, warn, Instrument, Span};

use super::action_policy::{resolve_primary_action, PrimaryAction};
use super::broadcast_hub::LocalBroadcastHub;
use super::session_cell::SessionListener;
use super::staleness::{StalenessReconciler, RESUME_LOOKUP_MAX_AGE_HOURS};
use super::subscription::Subscription;
use super::time_provider::TimeProvider;
use crate::database::{HistoryLog, SessionRepository};
use crate::error::{AppError, AppResult};
use crate::logging::{log_guard_violation, log_interval_completed, log_rollback, log_session_transition};
use crate::models::{
    ActiveSession, FinishedInterval, SessionCompletionEvent, SessionHistoryEntry, SessionPhase, TaskRef,
    TimerSessionError, TimerSettings,
};
use crate::session_span;

const COMPLETION_CHANNEL_CAPACITY: usize = 256;

/// What happened to one action on the held session
#[derive(Debug)]
enum Applied {
    /// Written to the store
    Committed(Option<ActiveSession>),
    /// Nothing written; carries the view that was kept or adopted
    Unchanged(Option<ActiveSession>),
}

impl Applied {
    fn committed(&self) -> bool {
        matches!(self, Applied::Committed(_))
    }

    fn into_view(self) -> Option<ActiveSession> {
        match self {
            Applied::Committed(view) | Applied::Unchanged(view) => view,
        }
    }
}

/// Per-store behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Settings used when a new session is created
    pub defaults: TimerSettings,
    /// Delete session records once they are terminated
    pub delete_terminated: bool,
    pub resume_max_age_hours: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            defaults: TimerSettings::default(),
            delete_terminated: false,
            resume_max_age_hours: RESUME_LOOKUP_MAX_AGE_HOURS,
        }
    }
}

pub struct SessionStore {
    user_id: String,
    defaults: RwLock<TimerSettings>,
    focused_task: RwLock<Option<TaskRef>>,
    sessions: Arc<dyn SessionRepository>,
    history: Arc<dyn HistoryLog>,
    hub: Arc<LocalBroadcastHub>,
    completions: broadcast::Sender<SessionCompletionEvent>,
    time_provider: Arc<dyn TimeProvider>,
    delete_terminated: bool,
    resume_max_age_hours: i64,
    /// Serializes actions issued from this context
    op_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(
        user_id: impl Into<String>,
        sessions: Arc<dyn SessionRepository>,
        history: Arc<dyn HistoryLog>,
        hub: Arc<LocalBroadcastHub>,
        time_provider: Arc<dyn TimeProvider>,
        options: StoreOptions,
    ) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            user_id: user_id.into(),
            defaults: RwLock::new(options.defaults),
            focused_task: RwLock::new(None),
            sessions,
            history,
            hub,
            completions,
            time_provider,
            delete_terminated: options.delete_terminated,
            resume_max_age_hours: options.resume_max_age_hours,
            op_lock: Mutex::new(()),
        }
    }

    /// Emit completion events on a shared channel instead of a private one
    pub fn with_completion_channel(mut self, completions: broadcast::Sender<SessionCompletionEvent>) -> Self {
        self.completions = completions;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn hub(&self) -> &Arc<LocalBroadcastHub> {
        &self.hub
    }

    /// The current session as seen by this context
    pub fn active_session(&self) -> Option<ActiveSession> {
        self.hub.current()
    }

    pub fn subscribe_to_session(&self, listener: SessionListener) -> Subscription {
        self.hub.subscribe(listener)
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<SessionCompletionEvent> {
        self.completions.subscribe()
    }

    pub async fn settings(&self) -> TimerSettings {
        *self.defaults.read().await
    }

    pub async fn focused_task(&self) -> Option<TaskRef> {
        self.focused_task.read().await.clone()
    }

    /// Reconcile the view with the store.
    ///
    /// A value seeded from the shared slot only stands in until this runs: it
    /// is replaced by the stored record, or by the most recent resumable
    /// session once that record has ended.
    pub async fn load(&self) -> AppResult<Option<ActiveSession>> {
        let _guard = self.op_lock.lock().await;

        let seed = self.hub.current();
        if let Some(seed) = &seed {
            let stored = self.sessions.get(&seed.id).await?.filter(|s| !s.is_terminated());
            if let Some(stored) = stored {
                self.hub.apply_remote(Some(stored.clone()));
                return Ok(Some(stored));
            }
            debug!(session_id = %seed.id, "Seeded session has ended");
        }

        let reconciler = StalenessReconciler::new(self.sessions.clone(), self.time_provider.clone());
        let found = reconciler
            .find_resumable(&self.user_id, self.resume_max_age_hours)
            .await?;
        if let Some(session) = &found {
            info!(session_id = %session.id, status = %session.status, "Resuming existing session");
        }
        if found.is_some() || seed.is_some() {
            self.hub.apply_remote(found.clone());
        }
        Ok(found)
    }

    pub async fn start_work(&self) -> AppResult<Option<ActiveSession>> {
        self.start(SessionPhase::Work).await
    }

    pub async fn start_break(&self, kind: SessionPhase) -> AppResult<Option<ActiveSession>> {
        if !kind.is_break() {
            return Err(AppError::bad_request("start_break requires a break phase"));
        }
        self.start(kind).await
    }

    /// Start `phase`, on the staged session or on a new one when none is held
    pub async fn start(&self, phase: SessionPhase) -> AppResult<Option<ActiveSession>> {
        let _guard = self.op_lock.lock().await;
        let span = session_span!("start", self.user_id);

        match self.hub.current() {
            Some(current) => self
                .transition_locked("start", current, move |s, now| s.start(phase, now).map(|()| None))
                .instrument(span)
                .await
                .map(Applied::into_view),
            None => self.create_and_start(phase).instrument(span).await,
        }
    }

    pub async fn pause(&self) -> AppResult<Option<ActiveSession>> {
        self.transition("pause", |s, now| s.pause(now).map(|()| None))
            .await
    }

    pub async fn resume(&self) -> AppResult<Option<ActiveSession>> {
        self.transition("resume", |s, now| s.resume(now).map(|()| None))
            .await
    }

    /// End the logical session; the view becomes empty
    pub async fn stop(&self) -> AppResult<Option<ActiveSession>> {
        self.transition("stop", |s, now| s.stop(now)).await
    }

    /// Abandon the current interval and stage the next phase
    pub async fn skip(&self) -> AppResult<Option<ActiveSession>> {
        self.transition("skip", |s, now| s.skip(now)).await
    }

    /// Finish the running interval now
    pub async fn complete_interval(&self) -> AppResult<Option<ActiveSession>> {
        self.transition("complete", |s, now| s.complete_interval(now).map(Some))
            .await
    }

    /// Complete the running interval if its countdown has reached zero.
    ///
    /// Returns whether an interval was completed.
    pub async fn tick(&self) -> AppResult<bool> {
        let _guard = self.op_lock.lock().await;

        let Some(current) = self.hub.current() else {
            return Ok(false);
        };
        if !current.is_due(self.time_provider.now_utc()) {
            return Ok(false);
        }

        let span = session_span!("complete", self.user_id);
        let applied = self
            .transition_locked("complete", current, |s, now| s.complete_interval(now).map(Some))
            .instrument(span)
            .await?;
        Ok(applied.committed())
    }

    /// Replace the default settings and apply them to the held session.
    ///
    /// The defaults only change once the held session, if any, is persisted.
    pub async fn update_settings(&self, settings: TimerSettings) -> AppResult<Option<ActiveSession>> {
        settings.validate()?;

        if self.hub.current().is_none() {
            *self.defaults.write().await = settings;
            return Ok(None);
        }
        let view = self
            .transition("update_settings", move |s, now| s.apply_settings(settings, now).map(|()| None))
            .await?;
        *self.defaults.write().await = settings;
        Ok(view)
    }

    /// Focus a task for the next session; a session attributed to another task is stopped
    pub async fn focus_task(&self, task: Option<TaskRef>) -> AppResult<Option<ActiveSession>> {
        let next_task_id = task.as_ref().map(|t| t.task_id.clone());
        *self.focused_task.write().await = task;

        let attributed_elsewhere = self
            .hub
            .current()
            .is_some_and(|s| s.task_id.is_some() && s.task_id != next_task_id);
        if attributed_elsewhere {
            return self.stop().await;
        }
        Ok(self.hub.current())
    }

    /// Perform whatever the primary control means for the current session
    pub async fn trigger_primary_action(&self) -> AppResult<Option<ActiveSession>> {
        let current = self.hub.current();
        let running = current.as_ref().is_some_and(ActiveSession::is_running);
        let action = resolve_primary_action(current.as_ref(), running);
        debug!(user_id = %self.user_id, action = %action, "Primary action resolved");

        match action {
            PrimaryAction::Pause => self.pause().await,
            PrimaryAction::Resume => self.resume().await,
            PrimaryAction::StartWork | PrimaryAction::StartShortBreak | PrimaryAction::StartLongBreak => {
                let phase = action.starts_phase().unwrap_or(SessionPhase::Work);
                self.start(phase).await
            }
        }
    }

    /// Periodically complete due intervals until the handle is released
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> Subscription {
        let store = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(e) = store.tick().await {
                    warn!(user_id = %store.user_id, error = %e, "Ticker failed to complete interval");
                }
            }
        });
        Subscription::from_task(handle)
    }

    async fn transition<F>(&self, op: &'static str, apply: F) -> AppResult<Option<ActiveSession>>
    where
        F: FnOnce(&mut ActiveSession, DateTime<Utc>) -> Result<Option<FinishedInterval>, TimerSessionError>,
    {
        let _guard = self.op_lock.lock().await;
        let span = session_span!(op, self.user_id);

        let Some(current) = self.hub.current() else {
            log_guard_violation(op, &self.user_id, "no active session");
            return Ok(None);
        };
        self.transition_locked(op, current, apply)
            .instrument(span)
            .await
            .map(Applied::into_view)
    }

    /// Apply `apply` to `current`, publish, persist and run post-commit effects.
    ///
    /// Callers hold `op_lock`.
    async fn transition_locked<F>(&self, op: &'static str, current: ActiveSession, apply: F) -> AppResult<Applied>
    where
        F: FnOnce(&mut ActiveSession, DateTime<Utc>) -> Result<Option<FinishedInterval>, TimerSessionError>,
    {
        let now = self.time_provider.now_utc();
        let mut next = current.clone();

        let finished = match apply(&mut next, now) {
            Ok(finished) => finished,
            Err(e) => {
                log_guard_violation(op, &self.user_id, &e.to_string());
                return Ok(Applied::Unchanged(Some(current)));
            }
        };
        next.clamp_time_remaining();

        let span = Span::current();
        span.record("session_id", field::display(&next.id));
        span.record("status", field::display(next.status));

        self.hub.publish(Some(next.clone()));

        let claims_completion = finished.as_ref().is_some_and(|f| !f.interrupted);
        let written = if claims_completion {
            self.sessions.update_if_unchanged(&next, current.updated_at).await
        } else {
            self.sessions.update(&next).await.map(|()| true)
        };
        match written {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    user_id = %self.user_id,
                    session_id = %next.id,
                    "Interval already completed by another context"
                );
                let adopted = self.restore_from_store(Some(&next.id), Some(current)).await;
                return Ok(Applied::Unchanged(adopted));
            }
            Err(e) => {
                self.rollback(op, Some(&next.id), Some(current), &e).await;
                return Err(e);
            }
        }
        log_session_transition(op, &next);

        if let Some(finished) = finished {
            self.record_finished(&next, &finished, now).await;
        }
        if next.is_terminated() {
            self.purge_terminated(&[next.id.clone()]).await;
            return Ok(Applied::Committed(None));
        }
        Ok(Applied::Committed(Some(next)))
    }

    async fn create_and_start(&self, phase: SessionPhase) -> AppResult<Option<ActiveSession>> {
        let now = self.time_provider.now_utc();
        let settings = *self.defaults.read().await;
        let task = self.focused_task.read().await.clone();

        let mut session = ActiveSession::new(self.user_id.as_str(), task, settings, phase, now);
        session.start(phase, now)?;
        Span::current().record("session_id", field::display(&session.id));

        self.hub.publish(Some(session.clone()));

        let persisted: AppResult<Vec<String>> = async {
            let others: Vec<String> = self
                .sessions
                .list_active(&self.user_id)
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect();
            let terminated = self.sessions.terminate_many(&others, now).await?;
            self.sessions.insert(&session).await?;
            Ok(terminated)
        }
        .await;

        match persisted {
            Ok(terminated) => {
                if !terminated.is_empty() {
                    info!(
                        user_id = %self.user_id,
                        superseded = terminated.len(),
                        "Terminated previous active sessions"
                    );
                    self.purge_terminated(&terminated).await;
                }
                log_session_transition("start", &session);
                Ok(Some(session))
            }
            Err(e) => {
                // Nothing new was committed, so restore whatever the store holds
                self.rollback("start", None, None, &e).await;
                Err(e)
            }
        }
    }

    /// Restore the view after a failed write
    async fn rollback(
        &self,
        op: &str,
        session_id: Option<&str>,
        previous: Option<ActiveSession>,
        error: &AppError,
    ) {
        log_rollback(op, &self.user_id, &error.to_string());
        self.restore_from_store(session_id, previous).await;
    }

    /// Publish what the store holds and return the resulting view.
    ///
    /// Re-reads `session_id` when given, or the user's most recent active
    /// session otherwise; falls back to `previous` when that read fails.
    async fn restore_from_store(&self, session_id: Option<&str>, previous: Option<ActiveSession>) -> Option<ActiveSession> {
        let fetched = match session_id {
            Some(id) => self.sessions.get(id).await,
            None => self
                .sessions
                .list_active(&self.user_id)
                .await
                .map(|sessions| sessions.into_iter().next()),
        };

        let restored = match fetched {
            Ok(found) => found,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Store read failed, restoring pre-action state");
                previous
            }
        };
        self.hub.publish(restored);
        self.hub.current()
    }

    async fn record_finished(&self, session: &ActiveSession, finished: &FinishedInterval, now: DateTime<Utc>) {
        let entry = SessionHistoryEntry::new(
            self.user_id.as_str(),
            session.task_id.clone(),
            finished.phase,
            finished.duration_minutes,
            finished.interrupted,
            now,
        );
        if let Err(e) = self.history.append(&entry).await {
            warn!(user_id = %self.user_id, error = %e, "Failed to append session history");
        }

        if finished.interrupted {
            return;
        }

        log_interval_completed(session, finished.phase);
        let event = SessionCompletionEvent {
            task_id: session.task_id.clone(),
            session_type: finished.phase,
            user_id: self.user_id.clone(),
            duration_minutes: finished.duration_minutes,
            completed_at: now,
        };
        if self.completions.send(event).is_err() {
            debug!(user_id = %self.user_id, "No completion listeners");
        }
    }

    async fn purge_terminated(&self, ids: &[String]) {
        if !self.delete_terminated {
            return;
        }
        for id in ids {
            if let Err(e) = self.sessions.delete(id).await {
                warn!(session_id = %id, error = %e, "Failed to delete terminated session");
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("user_id", &self.user_id)
            .field("context_id", &self.hub.context_id())
            .finish_non_exhaustive()
    }
}
