//! API module for the focus-session engine
//!
//! REST endpoints exposing the engine per user, plus health.

pub mod session;
pub mod stats;

use std::sync::Arc;

use axum::{
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};

use crate::services::FocusEngine;
use crate::websocket;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FocusEngine>,
}

impl AppState {
    pub fn new(engine: Arc<FocusEngine>) -> Self {
        Self { engine }
    }
}

/// Build the full router: REST API plus the change-feed WebSocket
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/users/:user_id/session", get(session::get_session))
        .route("/api/users/:user_id/session/:action", post(session::session_action))
        .route(
            "/api/users/:user_id/settings",
            get(session::get_settings).put(session::update_settings),
        )
        .route("/api/users/:user_id/sweep", post(session::sweep_sessions))
        .route("/api/users/:user_id/history", get(session::get_history))
        .route("/api/users/:user_id/tasks/:task_id/stats", get(stats::get_task_stats))
        .route("/api/users/:user_id/stats/batch", post(stats::get_batch_stats))
        .route("/ws/users/:user_id", get(websocket::change_feed_socket))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().timestamp()
    }))
}
