//! Engine harness and polling helpers shared by the integration suites

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pomodoro_sync::database::{ChangeFeedHub, MemoryStore};
use pomodoro_sync::models::TaskRef;
use pomodoro_sync::services::{EngineOptions, FocusEngine, MockTimeProvider};

pub struct Harness {
    pub engine: Arc<FocusEngine>,
    pub store: Arc<MemoryStore>,
    pub feed: ChangeFeedHub,
    pub clock: MockTimeProvider,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let feed = ChangeFeedHub::new(256);
        let store = Arc::new(MemoryStore::new(feed.clone()));
        let clock = MockTimeProvider::new_from_ymd_hms(2025, 1, 7, 9, 0, 0).expect("valid start time");
        let engine = Arc::new(FocusEngine::with_time_provider(
            store.clone(),
            Arc::new(feed.clone()),
            options,
            Arc::new(clock.clone()),
        ));

        Self {
            engine,
            store,
            feed,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.current_time()
    }
}

pub fn task(id: &str) -> TaskRef {
    TaskRef {
        task_id: id.to_string(),
        task_title: Some(format!("Task {}", id)),
    }
}

/// Poll `check` until it holds, letting background tasks run in between
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Async variant of [`eventually`]
pub async fn eventually_async<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}

/// Give spawned listeners a chance to drain their queues
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
