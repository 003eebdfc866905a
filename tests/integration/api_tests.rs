//! HTTP surface exercised through the router without binding a socket.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use pomodoro_sync::api::{create_router, AppState};
use pomodoro_sync::database::{ChangeFeedHub, MemoryStore};
use pomodoro_sync::services::{EngineOptions, FocusEngine};

fn app() -> Router {
    let feed = ChangeFeedHub::new(64);
    let store = Arc::new(MemoryStore::new(feed.clone()));
    let engine = Arc::new(FocusEngine::new(store, Arc::new(feed), EngineOptions::default()));
    create_router(AppState::new(engine))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_empty_session_offers_start_work() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/users/user-1/session", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["session"].is_null());
    assert_eq!(body["primary_action"], "start_work");
}

#[tokio::test]
async fn test_start_then_pause() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/users/user-1/session/start-work",
        Some(json!({ "task_id": "task-1", "task_title": "Write report" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "running");
    assert_eq!(body["session"]["phase"], "work");
    assert_eq!(body["session"]["task_id"], "task-1");
    assert_eq!(body["primary_action"], "pause");

    let (status, body) = send(&app, Method::POST, "/api/users/user-1/session/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "paused");
    assert_eq!(body["primary_action"], "resume");

    let (_, body) = send(&app, Method::GET, "/api/users/user-1/session", None).await;
    assert_eq!(body["session"]["status"], "paused");
}

#[tokio::test]
async fn test_stop_clears_session() {
    let app = app();
    send(&app, Method::POST, "/api/users/user-1/session/primary", None).await;
    let (status, body) = send(&app, Method::POST, "/api/users/user-1/session/stop", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["session"].is_null());
}

#[tokio::test]
async fn test_unknown_action_is_rejected() {
    let app = app();
    let (status, body) = send(&app, Method::POST, "/api/users/user-1/session/explode", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/users/user-1/settings",
        Some(json!({
            "work_duration": 0,
            "short_break_duration": 5,
            "long_break_duration": 15,
            "sessions_until_long_break": 4
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "TimerSessionError");
}

#[tokio::test]
async fn test_settings_update_applies_to_new_sessions() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/users/user-1/settings",
        Some(json!({
            "work_duration": 50,
            "short_break_duration": 10,
            "long_break_duration": 30,
            "sessions_until_long_break": 3
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["settings"]["work_duration"], 50);

    let (_, body) = send(&app, Method::POST, "/api/users/user-1/session/start-work", None).await;
    assert_eq!(body["session"]["time_remaining_seconds"], 3000);
}

#[tokio::test]
async fn test_unknown_task_stats_are_zero() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/api/users/user-1/tasks/task-1/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task_id"], "task-1");
    assert_eq!(body["work_sessions_count"], 0);
}

#[tokio::test]
async fn test_batch_stats_cover_every_task() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/users/user-1/stats/batch",
        Some(json!({ "task_ids": ["task-1", "task-2"] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let batch = body.as_object().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch["task-2"]["work_sessions_count"], 0);
}

#[tokio::test]
async fn test_sweep_rejects_negative_age() {
    let app = app();
    let (status, body) = send(&app, Method::POST, "/api/users/user-1/sweep?max_age_hours=-1", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");

    let (status, body) = send(&app, Method::POST, "/api/users/user-1/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["terminated"], json!([]));
}

#[tokio::test]
async fn test_history_lists_skipped_interval() {
    let app = app();
    send(&app, Method::POST, "/api/users/user-1/session/start-work", None).await;
    send(&app, Method::POST, "/api/users/user-1/session/skip", None).await;

    let (status, body) = send(&app, Method::GET, "/api/users/user-1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["interrupted"], true);
}
