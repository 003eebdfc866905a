//! Session API Endpoints
//!
//! REST endpoints driving a user's active session through the engine's
//! long-lived context for that user.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{ActiveSession, SessionHistoryEntry, SessionPhase, TaskRef, TimerSettings};
use crate::services::{resolve_primary_action, PrimaryAction, SessionStore};

/// Actions accepted on `POST /session/:action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionAction {
    StartWork,
    StartShortBreak,
    StartLongBreak,
    Pause,
    Resume,
    Stop,
    Skip,
    Primary,
    Focus,
}

/// Optional action body; a task focuses it before the action runs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    pub task_id: Option<String>,
    pub task_title: Option<String>,
}

impl ActionRequest {
    fn task(&self) -> Option<TaskRef> {
        self.task_id.as_ref().map(|task_id| TaskRef {
            task_id: task_id.clone(),
            task_title: self.task_title.clone(),
        })
    }
}

/// Session view returned by every session endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub session: Option<ActiveSession>,
    /// Remaining seconds at response time, accounting for a running countdown
    pub remaining_seconds: Option<i64>,
    pub primary_action: PrimaryAction,
}

impl SessionResponse {
    pub fn from_session(session: Option<ActiveSession>) -> Self {
        let remaining_seconds = session.as_ref().map(|s| s.remaining_at(Utc::now()));
        let running = session.as_ref().is_some_and(ActiveSession::is_running);
        let primary_action = resolve_primary_action(session.as_ref(), running);
        Self {
            session,
            remaining_seconds,
            primary_action,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsResponse {
    pub settings: TimerSettings,
    pub session: Option<ActiveSession>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepQuery {
    pub max_age_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub terminated: Vec<String>,
}

/// Get the user's current session
pub async fn get_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<SessionResponse>> {
    let context = state.engine.context(&user_id).await?;
    Ok(Json(SessionResponse::from_session(context.store().active_session())))
}

/// Run a session action
pub async fn session_action(
    State(state): State<AppState>,
    Path((user_id, action)): Path<(String, String)>,
    body: Option<Json<ActionRequest>>,
) -> AppResult<Json<SessionResponse>> {
    let action: SessionAction = action
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown session action: {}", action)))?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let context = state.engine.context(&user_id).await?;
    let store = context.store();

    if let Some(task) = request.task() {
        store.focus_task(Some(task)).await?;
    }

    let session = run_action(store, action, &request).await?;
    Ok(Json(SessionResponse::from_session(session)))
}

async fn run_action(
    store: &SessionStore,
    action: SessionAction,
    request: &ActionRequest,
) -> AppResult<Option<ActiveSession>> {
    match action {
        SessionAction::StartWork => store.start_work().await,
        SessionAction::StartShortBreak => store.start_break(SessionPhase::ShortBreak).await,
        SessionAction::StartLongBreak => store.start_break(SessionPhase::LongBreak).await,
        SessionAction::Pause => store.pause().await,
        SessionAction::Resume => store.resume().await,
        SessionAction::Stop => store.stop().await,
        SessionAction::Skip => store.skip().await,
        SessionAction::Primary => store.trigger_primary_action().await,
        // Without a task in the body this clears the focused task
        SessionAction::Focus if request.task_id.is_none() => store.focus_task(None).await,
        SessionAction::Focus => Ok(store.active_session()),
    }
}

/// Get the user's default timer settings
pub async fn get_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<SettingsResponse>> {
    let context = state.engine.context(&user_id).await?;
    let store = context.store();
    Ok(Json(SettingsResponse {
        settings: store.settings().await,
        session: store.active_session(),
    }))
}

/// Replace the user's timer settings
pub async fn update_settings(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(settings): Json<TimerSettings>,
) -> AppResult<Json<SettingsResponse>> {
    let context = state.engine.context(&user_id).await?;
    let store = context.store();
    let session = store.update_settings(settings).await?;

    Ok(Json(SettingsResponse {
        settings: store.settings().await,
        session,
    }))
}

/// Terminate the user's stale sessions
pub async fn sweep_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<SweepQuery>,
) -> AppResult<Json<SweepResponse>> {
    if query.max_age_hours.is_some_and(|hours| hours < 0) {
        return Err(AppError::validation_error("max_age_hours must not be negative"));
    }
    let terminated = state
        .engine
        .sweep_stale_sessions(&user_id, query.max_age_hours)
        .await?;
    Ok(Json(SweepResponse { terminated }))
}

/// The user's interval history, newest first
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<SessionHistoryEntry>>> {
    Ok(Json(state.engine.history(&user_id).await?))
}
