//! Task statistics endpoints

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::models::TaskPomodoroStats;

/// Upper bound on tasks per batch request
pub const MAX_BATCH_TASKS: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchStatsRequest {
    pub task_ids: Vec<String>,
}

/// Cumulative stats of one task
pub async fn get_task_stats(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
) -> Json<TaskPomodoroStats> {
    Json(state.engine.get_task_stats(&task_id, &user_id).await)
}

/// Cumulative stats of many tasks, keyed by task id
pub async fn get_batch_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<BatchStatsRequest>,
) -> AppResult<Json<HashMap<String, TaskPomodoroStats>>> {
    if request.task_ids.len() > MAX_BATCH_TASKS {
        return Err(AppError::BadRequest(format!(
            "At most {} task ids per request",
            MAX_BATCH_TASKS
        )));
    }

    Ok(Json(
        state
            .engine
            .get_batch_task_stats(&user_id, &request.task_ids)
            .await,
    ))
}
