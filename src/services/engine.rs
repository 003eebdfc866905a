//! Focus Engine
//!
//! Composition root wiring the record store, change-feed, stats aggregator
//! and staleness reconciler to per-context session stores. Nothing here is
//! global: any number of engines can coexist, each with its own stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::broadcast_hub::{InMemorySharedSlot, LocalBroadcastHub, SharedSlot};
use super::remote_listener::RemoteChangeListener;
use super::session_store::{SessionStore, StoreOptions};
use super::staleness::{StalenessReconciler, DEFAULT_SWEEP_MAX_AGE_HOURS, RESUME_LOOKUP_MAX_AGE_HOURS};
use super::stats_aggregator::{CumulativeStatsAggregator, StatsListener};
use super::subscription::Subscription;
use super::time_provider::{SystemTimeProvider, TimeProvider};
use crate::config::Config;
use crate::database::{ChangeFeed, HistoryLog, SessionRepository, StatsRepository};
use crate::error::AppResult;
use crate::models::{SessionCompletionEvent, SessionHistoryEntry, TaskPomodoroStats, TimerSettings};

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub timer_defaults: TimerSettings,
    pub stale_max_age_hours: i64,
    pub resume_max_age_hours: i64,
    /// Period of each context's completion ticker; None disables it
    pub tick_interval: Option<Duration>,
    pub delete_terminated: bool,
    pub completion_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timer_defaults: TimerSettings::default(),
            stale_max_age_hours: DEFAULT_SWEEP_MAX_AGE_HOURS,
            resume_max_age_hours: RESUME_LOOKUP_MAX_AGE_HOURS,
            tick_interval: None,
            delete_terminated: false,
            completion_capacity: 1000,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timer_defaults: config.timer_defaults,
            stale_max_age_hours: config.stale_session_max_age_hours,
            resume_max_age_hours: config.resume_lookup_max_age_hours,
            tick_interval: Some(Duration::from_millis(config.tick_interval_ms)),
            delete_terminated: config.delete_terminated_sessions,
            completion_capacity: config.channel_capacity,
        }
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            defaults: self.timer_defaults,
            delete_terminated: self.delete_terminated,
            resume_max_age_hours: self.resume_max_age_hours,
        }
    }
}

/// One execution context: a session store plus its remote listener and ticker.
///
/// Dropping the context tears both down.
pub struct FocusContext {
    store: Arc<SessionStore>,
    _remote: Subscription,
    _ticker: Subscription,
}

impl FocusContext {
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}

impl std::fmt::Debug for FocusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusContext").field("store", &self.store).finish()
    }
}

pub struct FocusEngine {
    sessions: Arc<dyn SessionRepository>,
    history: Arc<dyn HistoryLog>,
    feed: Arc<dyn ChangeFeed>,
    time_provider: Arc<dyn TimeProvider>,
    aggregator: Arc<CumulativeStatsAggregator>,
    reconciler: StalenessReconciler,
    completions: broadcast::Sender<SessionCompletionEvent>,
    options: EngineOptions,
    /// Same-origin slot per user, shared by that user's contexts
    slots: RwLock<HashMap<String, Arc<dyn SharedSlot>>>,
    /// Long-lived context per user serving API requests
    contexts: RwLock<HashMap<String, Arc<FocusContext>>>,
    _completion_consumer: Subscription,
}

impl FocusEngine {
    /// Build an engine over one store implementing every repository trait
    pub fn new<S>(store: Arc<S>, feed: Arc<dyn ChangeFeed>, options: EngineOptions) -> Self
    where
        S: SessionRepository + StatsRepository + HistoryLog + 'static,
    {
        Self::with_time_provider(store, feed, options, Arc::new(SystemTimeProvider::new()))
    }

    pub fn with_time_provider<S>(
        store: Arc<S>,
        feed: Arc<dyn ChangeFeed>,
        options: EngineOptions,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self
    where
        S: SessionRepository + StatsRepository + HistoryLog + 'static,
    {
        let sessions: Arc<dyn SessionRepository> = store.clone();
        let stats: Arc<dyn StatsRepository> = store.clone();
        let history: Arc<dyn HistoryLog> = store;

        let aggregator = Arc::new(CumulativeStatsAggregator::new(stats, feed.clone()));
        let (completions, receiver) = broadcast::channel(options.completion_capacity.max(1));
        let consumer = aggregator.spawn_completion_consumer(receiver);

        Self {
            reconciler: StalenessReconciler::new(sessions.clone(), time_provider.clone()),
            sessions,
            history,
            feed,
            time_provider,
            aggregator,
            completions,
            options,
            slots: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            _completion_consumer: consumer,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn aggregator(&self) -> &Arc<CumulativeStatsAggregator> {
        &self.aggregator
    }

    pub fn reconciler(&self) -> &StalenessReconciler {
        &self.reconciler
    }

    pub fn feed(&self) -> &Arc<dyn ChangeFeed> {
        &self.feed
    }

    /// Receive every completion event emitted by this engine's contexts
    pub fn subscribe_completions(&self) -> broadcast::Receiver<SessionCompletionEvent> {
        self.completions.subscribe()
    }

    async fn slot_for(&self, user_id: &str) -> Arc<dyn SharedSlot> {
        if let Some(slot) = self.slots.read().await.get(user_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(InMemorySharedSlot::new()) as Arc<dyn SharedSlot>)
            .clone()
    }

    /// Open a new execution context sharing the user's slot
    pub async fn open_context(&self, user_id: &str) -> AppResult<FocusContext> {
        let slot = self.slot_for(user_id).await;
        self.open_context_with_slot(user_id, slot).await
    }

    /// Open a context over a caller-provided slot
    pub async fn open_context_with_slot(&self, user_id: &str, slot: Arc<dyn SharedSlot>) -> AppResult<FocusContext> {
        if let Err(e) = self
            .reconciler
            .sweep(user_id, self.options.stale_max_age_hours)
            .await
        {
            warn!(user_id = %user_id, error = %e, "Stale sweep on open failed");
        }

        let hub = Arc::new(LocalBroadcastHub::new(slot));
        let store = Arc::new(
            SessionStore::new(
                user_id,
                self.sessions.clone(),
                self.history.clone(),
                hub.clone(),
                self.time_provider.clone(),
                self.options.store_options(),
            )
            .with_completion_channel(self.completions.clone()),
        );

        let remote = RemoteChangeListener::subscribe(self.feed.as_ref(), user_id, hub.clone());
        let ticker = match self.options.tick_interval {
            Some(period) => store.spawn_ticker(period),
            None => Subscription::noop(),
        };

        store.load().await?;
        info!(user_id = %user_id, context_id = %hub.context_id(), "Focus context opened");

        Ok(FocusContext {
            store,
            _remote: remote,
            _ticker: ticker,
        })
    }

    /// The user's long-lived context, opened on first use
    pub async fn context(&self, user_id: &str) -> AppResult<Arc<FocusContext>> {
        if let Some(context) = self.contexts.read().await.get(user_id) {
            return Ok(context.clone());
        }

        // Opened outside the map lock; a context inserted meanwhile is kept and ours dropped
        let opened = Arc::new(self.open_context(user_id).await?);
        let context = self
            .contexts
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert(opened)
            .clone();
        Ok(context)
    }

    /// Users with a long-lived context
    pub async fn known_users(&self) -> Vec<String> {
        self.contexts.read().await.keys().cloned().collect()
    }

    pub async fn sweep_stale_sessions(&self, user_id: &str, max_age_hours: Option<i64>) -> AppResult<Vec<String>> {
        let max_age_hours = max_age_hours.unwrap_or(self.options.stale_max_age_hours);
        self.reconciler.sweep(user_id, max_age_hours).await
    }

    pub async fn get_task_stats(&self, task_id: &str, user_id: &str) -> TaskPomodoroStats {
        self.aggregator.get_stats(task_id, user_id).await
    }

    pub async fn get_batch_task_stats(&self, user_id: &str, task_ids: &[String]) -> HashMap<String, TaskPomodoroStats> {
        self.aggregator.get_batch_stats(user_id, task_ids).await
    }

    /// Interval history of a user, newest first
    pub async fn history(&self, user_id: &str) -> AppResult<Vec<SessionHistoryEntry>> {
        self.history.list_for_user(user_id).await
    }

    pub fn subscribe_to_task_stats(&self, task_id: &str, user_id: &str, callback: StatsListener) -> Subscription {
        self.aggregator.subscribe_to_task_stats(task_id, user_id, callback)
    }

    /// Periodically sweep every known user until the handle is released
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> Subscription {
        let engine = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately; contexts already sweep on open
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                for user_id in engine.known_users().await {
                    if let Err(e) = engine.sweep_stale_sessions(&user_id, None).await {
                        warn!(user_id = %user_id, error = %e, "Periodic stale sweep failed");
                    }
                }
            }
        });
        Subscription::from_task(handle)
    }
}

impl std::fmt::Debug for FocusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
