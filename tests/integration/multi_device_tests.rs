//! Several devices and tabs of one user acting on the same session record.

use std::sync::Arc;

use pomodoro_sync::database::{HistoryLog, SessionRepository};
use pomodoro_sync::models::SessionStatus;
use pomodoro_sync::services::{FocusContext, InMemorySharedSlot, SharedSlot, SESSION_CHANNEL_KEY};
use super::{eventually, eventually_async, settle, task, Harness};

/// A device with its own storage, so nothing is mirrored to it locally
async fn open_device(h: &Harness) -> FocusContext {
    h.engine
        .open_context_with_slot("user-1", Arc::new(InMemorySharedSlot::new()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_late_tab_after_remote_stop_shows_nothing() {
    let h = Harness::new();
    let tab_a = h.engine.open_context("user-1").await.unwrap();
    let started = tab_a.store().start_work().await.unwrap().unwrap();

    let phone = open_device(&h).await;
    assert_eq!(phone.store().active_session(), Some(started.clone()));
    h.clock.advance_seconds(30);
    assert!(phone.store().stop().await.unwrap().is_none());

    // Opened right away, whether or not tab_a has heard of the stop yet
    let tab_c = h.engine.open_context("user-1").await.unwrap();
    assert!(tab_c.store().active_session().is_none());

    h.clock.advance_seconds(5);
    assert!(tab_c.store().pause().await.unwrap().is_none());
    assert!(tab_c.store().resume().await.unwrap().is_none());

    let stored = h.store.get(&started.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Terminated);
    assert!(h.store.list_active("user-1").await.unwrap().is_empty());

    let view = tab_a.store().clone();
    assert!(eventually(move || view.active_session().is_none()).await);
}

#[tokio::test]
async fn test_late_tab_after_remote_supersede_follows_new_session() {
    let h = Harness::new();
    let tab_a = h.engine.open_context("user-1").await.unwrap();
    let first = tab_a.store().start_work().await.unwrap().unwrap();

    let phone = open_device(&h).await;
    h.clock.advance_seconds(30);
    phone.store().stop().await.unwrap();
    let second = phone.store().start_work().await.unwrap().unwrap();
    assert_ne!(second.id, first.id);

    let tab_c = h.engine.open_context("user-1").await.unwrap();
    assert_eq!(tab_c.store().active_session().map(|s| s.id), Some(second.id.clone()));

    h.clock.advance_seconds(10);
    let paused = tab_c.store().pause().await.unwrap().unwrap();
    assert_eq!(paused.id, second.id);

    let active = h.store.list_active("user-1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);
    assert_eq!(
        h.store.get(&first.id).await.unwrap().unwrap().status,
        SessionStatus::Terminated
    );

    let view = tab_a.store().clone();
    assert!(eventually(move || view.active_session() == Some(paused.clone())).await);
}

#[tokio::test]
async fn test_ended_session_is_cleared_from_shared_storage() {
    let h = Harness::new();
    let slot = InMemorySharedSlot::new();
    let tab_a = h
        .engine
        .open_context_with_slot("user-1", Arc::new(slot.clone()))
        .await
        .unwrap();
    tab_a.store().start_work().await.unwrap();
    assert!(slot.read(SESSION_CHANNEL_KEY).is_some());

    let phone = open_device(&h).await;
    phone.store().stop().await.unwrap();

    let shared = slot.clone();
    assert!(eventually(move || shared.read(SESSION_CHANNEL_KEY).is_none()).await);
    assert!(tab_a.store().active_session().is_none());
}

#[tokio::test]
async fn test_interval_due_on_two_devices_is_counted_once() {
    let h = Harness::new();
    let laptop = open_device(&h).await;
    laptop.store().focus_task(Some(task("task-1"))).await.unwrap();
    let started = laptop.store().start_work().await.unwrap().unwrap();

    let phone = open_device(&h).await;
    assert_eq!(phone.store().active_session(), Some(started.clone()));
    let mut completions = h.engine.subscribe_completions();

    h.clock.advance_minutes(25);
    assert!(laptop.store().tick().await.unwrap());
    assert!(!phone.store().tick().await.unwrap());

    let stored = h.store.get(&started.id).await.unwrap().unwrap();
    assert_eq!(stored.completed_work_sessions, 1);
    assert_eq!(stored.status, SessionStatus::Stopped);
    assert_eq!(phone.store().active_session(), Some(stored.clone()));

    let event = completions.recv().await.unwrap();
    assert_eq!(event.duration_minutes, 25);
    settle().await;
    assert!(completions.try_recv().is_err());

    let engine = h.engine.clone();
    let recorded = eventually_async(|| {
        let engine = engine.clone();
        async move { engine.get_task_stats("task-1", "user-1").await.work_sessions_count == 1 }
    })
    .await;
    assert!(recorded);
    settle().await;
    let stats = h.engine.get_task_stats("task-1", "user-1").await;
    assert_eq!(stats.work_sessions_count, 1);
    assert_eq!(stats.work_duration_total_minutes, 25);
    assert_eq!(h.store.list_for_user("user-1").await.unwrap().len(), 1);

    let view = laptop.store().clone();
    assert!(eventually(move || view.active_session() == Some(stored.clone())).await);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_context() {
    let h = Harness::new();

    let (first, second) = tokio::join!(h.engine.context("user-1"), h.engine.context("user-1"));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.engine.known_users().await, vec!["user-1".to_string()]);
    let again = h.engine.context("user-1").await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}
