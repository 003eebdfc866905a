//! Stale-session reclamation and resume lookup against a shared store.

use chrono::{DateTime, Duration, Utc};
use pomodoro_sync::database::SessionRepository;
use pomodoro_sync::models::{ActiveSession, SessionPhase, SessionStatus, TimerSettings};
use pomodoro_sync::services::DEFAULT_SWEEP_MAX_AGE_HOURS;
use super::Harness;

fn paused_at(user: &str, at: DateTime<Utc>) -> ActiveSession {
    let mut session = ActiveSession::new(user, None, TimerSettings::default(), SessionPhase::Work, at);
    session.start(SessionPhase::Work, at).unwrap();
    session.pause(at + Duration::minutes(5)).unwrap();
    session
}

fn stopped_at(user: &str, at: DateTime<Utc>) -> ActiveSession {
    ActiveSession::new(user, None, TimerSettings::default(), SessionPhase::ShortBreak, at)
}

fn running_since(user: &str, at: DateTime<Utc>) -> ActiveSession {
    let mut session = ActiveSession::new(user, None, TimerSettings::default(), SessionPhase::Work, at);
    session.start(SessionPhase::Work, at).unwrap();
    session
}

#[tokio::test]
async fn test_sweep_terminates_only_stale_sessions() {
    let h = Harness::new();
    let now = h.now();

    let old_paused = paused_at("user-1", now - Duration::hours(30));
    let old_stopped = stopped_at("user-1", now - Duration::hours(25));
    let recent_paused = paused_at("user-1", now - Duration::hours(2));
    let old_running = running_since("user-1", now - Duration::hours(72));
    let other_user = paused_at("user-2", now - Duration::hours(30));
    for session in [&old_paused, &old_stopped, &recent_paused, &old_running, &other_user] {
        h.store.insert(session).await.unwrap();
    }

    let mut terminated = h.engine.sweep_stale_sessions("user-1", None).await.unwrap();
    terminated.sort();
    let mut expected = vec![old_paused.id.clone(), old_stopped.id.clone()];
    expected.sort();
    assert_eq!(terminated, expected);

    for id in &expected {
        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminated);
        assert!(stored.pause_time.is_none());
        assert_eq!(stored.updated_at, now);
    }
    for untouched in [&recent_paused, &old_running, &other_user] {
        assert_eq!(h.store.get(&untouched.id).await.unwrap().as_ref(), Some(untouched));
    }

    // Nothing left to reclaim
    assert!(h.engine.sweep_stale_sessions("user-1", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_age_exactly_at_threshold_is_kept() {
    let h = Harness::new();
    let boundary = paused_at("user-1", h.now() - Duration::hours(DEFAULT_SWEEP_MAX_AGE_HOURS) - Duration::minutes(5));
    h.store.insert(&boundary).await.unwrap();

    assert!(h.engine.sweep_stale_sessions("user-1", None).await.unwrap().is_empty());

    h.clock.advance_seconds(1);
    assert_eq!(
        h.engine.sweep_stale_sessions("user-1", None).await.unwrap(),
        vec![boundary.id.clone()]
    );
}

#[tokio::test]
async fn test_custom_max_age() {
    let h = Harness::new();
    let paused = paused_at("user-1", h.now() - Duration::hours(3));
    h.store.insert(&paused).await.unwrap();

    assert!(h.engine.sweep_stale_sessions("user-1", Some(4)).await.unwrap().is_empty());
    assert_eq!(
        h.engine.sweep_stale_sessions("user-1", Some(2)).await.unwrap(),
        vec![paused.id.clone()]
    );
}

#[tokio::test]
async fn test_concurrent_sweeps_reclaim_each_session_once() {
    let h = Harness::new();
    let now = h.now();

    let mut stale_ids = Vec::new();
    for hours in [26, 30, 50, 100] {
        let session = paused_at("user-1", now - Duration::hours(hours));
        stale_ids.push(session.id.clone());
        h.store.insert(&session).await.unwrap();
    }
    h.store
        .insert(&paused_at("user-1", now - Duration::hours(1)))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        h.engine.sweep_stale_sessions("user-1", None),
        h.engine.sweep_stale_sessions("user-1", None),
    );
    let mut reclaimed: Vec<String> = first.unwrap().into_iter().chain(second.unwrap()).collect();
    reclaimed.sort();
    stale_ids.sort();
    assert_eq!(reclaimed, stale_ids);

    let active = h.store.list_active("user-1").await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_resume_lookup_uses_wider_window() {
    let h = Harness::new();
    let paused = paused_at("user-1", h.now() - Duration::hours(36));
    h.store.insert(&paused).await.unwrap();

    let reconciler = h.engine.reconciler();
    let found = reconciler.find_resumable("user-1", 48).await.unwrap();
    assert_eq!(found.map(|s| s.id), Some(paused.id.clone()));

    assert!(reconciler.find_resumable("user-1", 24).await.unwrap().is_none());

    // The lookup never reaps
    let stored = h.store.get(&paused.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Paused);
}

#[tokio::test]
async fn test_open_context_resumes_recent_session() {
    let h = Harness::new();
    let paused = paused_at("user-1", h.now() - Duration::hours(1));
    h.store.insert(&paused).await.unwrap();

    let ctx = h.engine.open_context("user-1").await.unwrap();
    assert_eq!(ctx.store().active_session(), Some(paused.clone()));

    let resumed = ctx.store().resume().await.unwrap().unwrap();
    assert!(resumed.is_running());
    assert_eq!(resumed.time_remaining_seconds, paused.time_remaining_seconds);
}

#[tokio::test]
async fn test_open_context_reaps_before_loading() {
    let h = Harness::new();
    let stale = paused_at("user-1", h.now() - Duration::hours(30));
    h.store.insert(&stale).await.unwrap();

    let ctx = h.engine.open_context("user-1").await.unwrap();
    assert!(ctx.store().active_session().is_none());

    let stored = h.store.get(&stale.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Terminated);
}
