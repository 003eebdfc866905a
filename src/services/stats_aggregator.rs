//! Cumulative Stats Aggregator
//!
//! Maintains per-task pomodoro counters incrementally from completion
//! events. Reads never fail: a missing row or a failed read yields zeros.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::subscription::Subscription;
use crate::database::{ChangeFeed, StatsRepository};
use crate::error::AppResult;
use crate::models::{ChangeFilter, ChangeRecord, SessionCompletionEvent, TaskPomodoroStats};

/// Callback receiving the latest stats row of a task
pub type StatsListener = Arc<dyn Fn(&TaskPomodoroStats) + Send + Sync>;

pub struct CumulativeStatsAggregator {
    stats: Arc<dyn StatsRepository>,
    feed: Arc<dyn ChangeFeed>,
}

impl CumulativeStatsAggregator {
    pub fn new(stats: Arc<dyn StatsRepository>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self { stats, feed }
    }

    pub async fn get_stats(&self, task_id: &str, user_id: &str) -> TaskPomodoroStats {
        match self.stats.get_stats(task_id, user_id).await {
            Ok(Some(stats)) => stats,
            Ok(None) => TaskPomodoroStats::zero(task_id, user_id),
            Err(e) => {
                warn!(task_id = %task_id, user_id = %user_id, error = %e, "Stats read failed, using zeros");
                TaskPomodoroStats::zero(task_id, user_id)
            }
        }
    }

    /// Stats for many tasks in one bulk read; every requested task gets an entry
    pub async fn get_batch_stats(&self, user_id: &str, task_ids: &[String]) -> HashMap<String, TaskPomodoroStats> {
        let found = match self.stats.get_stats_many(user_id, task_ids).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id = %user_id, tasks = task_ids.len(), error = %e, "Batch stats read failed, using zeros");
                Vec::new()
            }
        };

        let mut by_task: HashMap<String, TaskPomodoroStats> =
            found.into_iter().map(|s| (s.task_id.clone(), s)).collect();
        for task_id in task_ids {
            by_task
                .entry(task_id.clone())
                .or_insert_with(|| TaskPomodoroStats::zero(task_id, user_id));
        }
        by_task
    }

    /// Fold one completed interval into its task's counters.
    ///
    /// Returns None for events that are not attributed to a task.
    pub async fn handle_completion(&self, event: &SessionCompletionEvent) -> AppResult<Option<TaskPomodoroStats>> {
        let Some(task_id) = event.task_id.as_deref() else {
            debug!(user_id = %event.user_id, "Completion without a task, stats unchanged");
            return Ok(None);
        };

        let stats = self.stats.record_completion(task_id, event).await?;
        debug!(
            task_id = %task_id,
            session_type = %event.session_type,
            work_sessions_count = stats.work_sessions_count,
            "Task stats updated"
        );
        Ok(Some(stats))
    }

    /// Consume completion events until the channel closes or the handle is released
    pub fn spawn_completion_consumer(
        self: &Arc<Self>,
        mut completions: broadcast::Receiver<SessionCompletionEvent>,
    ) -> Subscription {
        let aggregator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match completions.recv().await {
                    Ok(event) => {
                        if let Err(e) = aggregator.handle_completion(&event).await {
                            warn!(error = %e, task_id = ?event.task_id, "Failed to record completion");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Completion consumer lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Completion consumer stopped");
        });
        Subscription::from_task(handle)
    }

    /// Invoke `callback` whenever the (task, user) stats row changes
    pub fn subscribe_to_task_stats(&self, task_id: &str, user_id: &str, callback: StatsListener) -> Subscription {
        let mut stream = self.feed.subscribe(ChangeFilter::stats_for(task_id, user_id));
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if let ChangeRecord::TaskStats(stats) = &event.record {
                    callback(stats);
                }
            }
        });
        Subscription::from_task(handle)
    }
}
