//! Session lifecycle through the engine: transitions, completion, rollback,
//! cross-context mirroring and remote authority.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pomodoro_sync::database::{HistoryLog, SessionRepository};
use pomodoro_sync::error::AppResult;
use pomodoro_sync::models::{
    ActiveSession, SessionHistoryEntry, SessionPhase, SessionStatus, TimerSettings,
};
use pomodoro_sync::services::{
    InMemorySharedSlot, LocalBroadcastHub, MockTimeProvider, PrimaryAction, SessionStore, SharedSlot,
    StoreOptions,
};
use super::{eventually, eventually_async, settle, task, Harness};

#[tokio::test]
async fn test_pause_ten_seconds_after_start() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let started = store.start_work().await.unwrap().unwrap();
    assert_eq!(started.time_remaining_seconds, 1500);

    h.clock.advance_seconds(10);
    let paused = store.pause().await.unwrap().unwrap();

    assert_eq!(paused.time_remaining_seconds, 1490);
    assert_eq!(paused.status, SessionStatus::Paused);
    assert!(paused.start_time.is_none());
    assert_eq!(paused.pause_time, Some(h.now()));
    assert_eq!(h.store.get(&paused.id).await.unwrap(), Some(paused));
}

#[tokio::test]
async fn test_work_completion_scenario() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();
    let mut completions = h.engine.subscribe_completions();

    store.focus_task(Some(task("task-1"))).await.unwrap();
    store.start_work().await.unwrap();
    h.clock.advance_minutes(25);
    assert!(store.tick().await.unwrap());

    let session = store.active_session().unwrap();
    assert_eq!(session.completed_work_sessions, 1);
    assert_eq!(session.status, SessionStatus::Stopped);
    assert_eq!(session.phase, SessionPhase::ShortBreak);
    assert_eq!(session.time_remaining_seconds, 300);

    let event = completions.recv().await.unwrap();
    assert_eq!(event.session_type, SessionPhase::Work);
    assert_eq!(event.duration_minutes, 25);
    assert_eq!(event.task_id.as_deref(), Some("task-1"));
    assert!(completions.try_recv().is_err());

    let engine = h.engine.clone();
    let updated = eventually_async(|| {
        let engine = engine.clone();
        async move {
            let stats = engine.get_task_stats("task-1", "user-1").await;
            stats.work_sessions_count == 1 && stats.work_duration_total_minutes == 25
        }
    })
    .await;
    assert!(updated, "stats should reflect exactly one 25-minute work session");
}

#[tokio::test]
async fn test_settings_changed_mid_interval_credit_the_started_length() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();
    let mut completions = h.engine.subscribe_completions();

    store.focus_task(Some(task("task-1"))).await.unwrap();
    store.start_work().await.unwrap();
    h.clock.advance_minutes(5);
    let longer = TimerSettings {
        work_duration: 50,
        ..TimerSettings::default()
    };
    let updated = store.update_settings(longer).await.unwrap().unwrap();
    assert_eq!(updated.work_duration, 50);
    assert_eq!(updated.interval_duration, Some(25));

    h.clock.advance_minutes(20);
    assert!(store.tick().await.unwrap());
    assert_eq!(completions.recv().await.unwrap().duration_minutes, 25);

    // The next work interval runs at the new length
    settle().await;
    store.skip().await.unwrap();
    let next = store.start_work().await.unwrap().unwrap();
    assert_eq!(next.time_remaining_seconds, 3000);
    assert_eq!(next.interval_duration, Some(50));
}

#[tokio::test]
async fn test_long_break_cadence_through_store() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let settings = TimerSettings {
        sessions_until_long_break: 2,
        ..TimerSettings::default()
    };
    store.update_settings(settings).await.unwrap();

    let mut staged_breaks = Vec::new();
    for _ in 0..4 {
        store.start_work().await.unwrap();
        h.clock.advance_minutes(25);
        store.tick().await.unwrap();
        let staged = store.active_session().unwrap().phase;
        staged_breaks.push(staged);

        store.start_break(staged).await.unwrap();
        h.clock.advance_minutes(15);
        store.tick().await.unwrap();
        assert_eq!(store.active_session().unwrap().phase, SessionPhase::Work);
    }

    assert_eq!(
        staged_breaks,
        vec![
            SessionPhase::ShortBreak,
            SessionPhase::LongBreak,
            SessionPhase::ShortBreak,
            SessionPhase::LongBreak,
        ]
    );
    let session = store.active_session().unwrap();
    assert_eq!(session.completed_work_sessions, 4);
    assert_eq!(session.completed_break_sessions, 4);
}

#[tokio::test]
async fn test_skip_is_excluded_from_stats_but_logged() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();
    let mut completions = h.engine.subscribe_completions();

    store.focus_task(Some(task("task-1"))).await.unwrap();
    store.start_work().await.unwrap();
    h.clock.advance_minutes(10);
    let skipped = store.skip().await.unwrap().unwrap();

    assert_eq!(skipped.status, SessionStatus::Stopped);
    assert_eq!(skipped.phase, SessionPhase::ShortBreak);
    assert_eq!(skipped.completed_work_sessions, 0);

    let history = h.engine.history("user-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].interrupted);
    assert_eq!(history[0].duration_minutes, 10);

    settle().await;
    assert!(completions.try_recv().is_err());
    assert!(h.engine.get_task_stats("task-1", "user-1").await.is_empty());
}

#[tokio::test]
async fn test_overrun_never_persists_negative_remaining() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    store.start_work().await.unwrap();
    h.clock.advance_hours(3);
    let paused = store.pause().await.unwrap().unwrap();

    assert_eq!(paused.time_remaining_seconds, 0);
    let stored = h.store.get(&paused.id).await.unwrap().unwrap();
    assert_eq!(stored.time_remaining_seconds, 0);
}

#[tokio::test]
async fn test_stop_clears_view_and_terminates_record() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let started = store.start_work().await.unwrap().unwrap();
    assert!(store.stop().await.unwrap().is_none());
    assert!(store.active_session().is_none());

    let stored = h.store.get(&started.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Terminated);
    assert!(stored.start_time.is_none());

    // Terminated sessions accept nothing; the next start creates a new one
    let next = store.start_work().await.unwrap().unwrap();
    assert_ne!(next.id, started.id);
}

#[tokio::test]
async fn test_terminated_sessions_can_be_deleted() {
    let h = Harness::with_options(pomodoro_sync::services::EngineOptions {
        delete_terminated: true,
        ..Default::default()
    });
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let started = store.start_work().await.unwrap().unwrap();
    store.stop().await.unwrap();
    assert!(h.store.get(&started.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_focusing_another_task_stops_session() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    store.focus_task(Some(task("task-1"))).await.unwrap();
    let started = store.start_work().await.unwrap().unwrap();
    assert_eq!(started.task_id.as_deref(), Some("task-1"));

    // Same task keeps the session
    assert!(store.focus_task(Some(task("task-1"))).await.unwrap().is_some());

    assert!(store.focus_task(Some(task("task-2"))).await.unwrap().is_none());
    let next = store.start_work().await.unwrap().unwrap();
    assert_eq!(next.task_id.as_deref(), Some("task-2"));
}

#[tokio::test]
async fn test_primary_action_cycle() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let running = store.trigger_primary_action().await.unwrap().unwrap();
    assert_eq!(running.status, SessionStatus::Running);
    assert_eq!(running.phase, SessionPhase::Work);

    h.clock.advance_seconds(5);
    let paused = store.trigger_primary_action().await.unwrap().unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);

    let resumed = store.trigger_primary_action().await.unwrap().unwrap();
    assert_eq!(resumed.status, SessionStatus::Running);

    h.clock.advance_minutes(25);
    store.tick().await.unwrap();
    let staged = store.active_session().unwrap();
    assert_eq!(
        pomodoro_sync::services::resolve_primary_action(Some(&staged), false),
        PrimaryAction::StartShortBreak
    );
    let on_break = store.trigger_primary_action().await.unwrap().unwrap();
    assert_eq!(on_break.phase, SessionPhase::ShortBreak);
    assert!(on_break.is_running());
}

#[tokio::test]
async fn test_failed_write_rolls_back_to_store_value() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let running = store.start_work().await.unwrap().unwrap();
    h.store.set_fail_writes(true);
    h.clock.advance_seconds(30);

    assert!(store.pause().await.is_err());
    assert_eq!(store.active_session(), Some(running.clone()));
    assert_eq!(h.store.get(&running.id).await.unwrap(), Some(running));
}

#[tokio::test]
async fn test_failed_start_rolls_back_to_empty() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    h.store.set_fail_writes(true);
    assert!(store.start_work().await.is_err());
    assert!(store.active_session().is_none());
    assert!(h.store.all_sessions().await.is_empty());
}

#[tokio::test]
async fn test_single_active_session_across_devices() {
    let h = Harness::new();
    let laptop = h.engine.open_context("user-1").await.unwrap();
    let first = laptop.store().start_work().await.unwrap().unwrap();

    // A second device: its own slot, nothing held yet
    let phone = SessionStore::new(
        "user-1",
        h.store.clone(),
        h.store.clone(),
        Arc::new(LocalBroadcastHub::new(Arc::new(InMemorySharedSlot::new()))),
        Arc::new(h.clock.clone()),
        StoreOptions::default(),
    );
    let second = phone.start_work().await.unwrap().unwrap();
    assert_ne!(second.id, first.id);

    let active = h.store.list_active("user-1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);

    let terminated = h.store.get(&first.id).await.unwrap().unwrap();
    assert_eq!(terminated.status, SessionStatus::Terminated);

    // The laptop follows the store
    let laptop_store = laptop.store().clone();
    let second_id = second.id.clone();
    assert!(eventually(move || laptop_store.active_session().map(|s| s.id) == Some(second_id.clone())).await);
}

#[tokio::test]
async fn test_remote_update_overrides_local_view() {
    let h = Harness::new();
    let ctx = h.engine.open_context("user-1").await.unwrap();
    let store = ctx.store();

    let local = store.start_work().await.unwrap().unwrap();

    // Another device pauses the same record directly in the store
    let mut remote = local.clone();
    remote.pause(h.now() + chrono::Duration::seconds(42)).unwrap();
    h.store.update(&remote).await.unwrap();

    let view = store.clone();
    let expected = remote.clone();
    assert!(eventually(move || view.active_session() == Some(expected.clone())).await);
}

#[tokio::test]
async fn test_contexts_sharing_a_slot_mirror_each_other() {
    let h = Harness::new();
    let tab_a = h.engine.open_context("user-1").await.unwrap();
    let tab_b = h.engine.open_context("user-1").await.unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let _sub = tab_b.store().subscribe_to_session(Arc::new(move |_: Option<&ActiveSession>| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let started = tab_a.store().start_work().await.unwrap();
    assert_eq!(tab_b.store().active_session(), started);
    assert!(notified.load(Ordering::SeqCst) >= 1);

    tab_b.store().pause().await.unwrap();
    assert_eq!(tab_a.store().active_session().unwrap().status, SessionStatus::Paused);

    // A late tab seeds itself from the slot
    let tab_c = h.engine.open_context("user-1").await.unwrap();
    assert_eq!(tab_c.store().active_session(), tab_a.store().active_session());
}

/// Store whose every call waits forever
struct UnresponsiveStore;

#[async_trait]
impl SessionRepository for UnresponsiveStore {
    async fn get(&self, _id: &str) -> AppResult<Option<ActiveSession>> {
        std::future::pending().await
    }

    async fn list_active(&self, _user_id: &str) -> AppResult<Vec<ActiveSession>> {
        std::future::pending().await
    }

    async fn insert(&self, _session: &ActiveSession) -> AppResult<()> {
        std::future::pending().await
    }

    async fn update(&self, _session: &ActiveSession) -> AppResult<()> {
        std::future::pending().await
    }

    async fn update_if_unchanged(&self, _session: &ActiveSession, _expected: DateTime<Utc>) -> AppResult<bool> {
        std::future::pending().await
    }

    async fn delete(&self, _id: &str) -> AppResult<()> {
        std::future::pending().await
    }

    async fn terminate_many(&self, _ids: &[String], _at: DateTime<Utc>) -> AppResult<Vec<String>> {
        std::future::pending().await
    }
}

#[async_trait]
impl HistoryLog for UnresponsiveStore {
    async fn append(&self, _entry: &SessionHistoryEntry) -> AppResult<()> {
        std::future::pending().await
    }

    async fn list_for_user(&self, _user_id: &str) -> AppResult<Vec<SessionHistoryEntry>> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_contexts_converge_without_remote_store() {
    let slot: Arc<dyn SharedSlot> = Arc::new(InMemorySharedSlot::new());
    let clock = MockTimeProvider::new_from_now();
    let backend = Arc::new(UnresponsiveStore);

    let open = || {
        Arc::new(SessionStore::new(
            "user-1",
            backend.clone(),
            backend.clone(),
            Arc::new(LocalBroadcastHub::new(slot.clone())),
            Arc::new(clock.clone()),
            StoreOptions::default(),
        ))
    };
    let tab_a = open();
    let tab_b = open();

    let writer = tab_a.clone();
    let pending = tokio::spawn(async move { writer.start_work().await });

    let observer = tab_b.clone();
    assert!(eventually(move || observer.active_session().is_some_and(|s| s.is_running())).await);
    assert_eq!(tab_a.active_session(), tab_b.active_session());

    pending.abort();
}
