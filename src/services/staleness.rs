//! Staleness Reconciler
//!
//! Reclaims sessions abandoned by crashed or closed contexts. A paused
//! session ages from its pause time, a stopped one from its last write;
//! running sessions are never considered stale.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::Instrument;

use super::time_provider::TimeProvider;
use crate::database::SessionRepository;
use crate::error::AppResult;
use crate::logging::log_stale_sessions_reclaimed;
use crate::models::{ActiveSession, SessionStatus};
use crate::session_span;

/// Age after which cleanup sweeps terminate a session
pub const DEFAULT_SWEEP_MAX_AGE_HOURS: i64 = 24;

/// Age up to which a session is still offered for resumption
pub const RESUME_LOOKUP_MAX_AGE_HOURS: i64 = 48;

/// Age of a session at `now`, or None when it can never be stale
pub fn session_age(session: &ActiveSession, now: DateTime<Utc>) -> Option<Duration> {
    match session.status {
        SessionStatus::Paused => Some(now - session.pause_time.unwrap_or(session.updated_at)),
        SessionStatus::Stopped => Some(now - session.updated_at),
        SessionStatus::Running | SessionStatus::Terminated => None,
    }
}

/// Whether a session is older than `max_age_hours` at `now`
pub fn is_stale(session: &ActiveSession, now: DateTime<Utc>, max_age_hours: i64) -> bool {
    session_age(session, now).is_some_and(|age| age > Duration::hours(max_age_hours))
}

pub struct StalenessReconciler {
    sessions: Arc<dyn SessionRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl StalenessReconciler {
    pub fn new(sessions: Arc<dyn SessionRepository>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            sessions,
            time_provider,
        }
    }

    /// Terminate every stale session of a user in one bulk write.
    ///
    /// Returns the ids that were terminated by this call; running it again
    /// finds nothing left to do.
    pub async fn sweep(&self, user_id: &str, max_age_hours: i64) -> AppResult<Vec<String>> {
        let span = session_span!("sweep", user_id);
        async {
            let now = self.time_provider.now_utc();
            let stale: Vec<String> = self
                .sessions
                .list_active(user_id)
                .await?
                .into_iter()
                .filter(|s| is_stale(s, now, max_age_hours))
                .map(|s| s.id)
                .collect();

            let terminated = if stale.is_empty() {
                Vec::new()
            } else {
                self.sessions.terminate_many(&stale, now).await?
            };

            log_stale_sessions_reclaimed(user_id, max_age_hours, &terminated);
            Ok(terminated)
        }
        .instrument(span)
        .await
    }

    /// Most recent non-terminated session young enough to resume; never reaps
    pub async fn find_resumable(&self, user_id: &str, max_age_hours: i64) -> AppResult<Option<ActiveSession>> {
        let now = self.time_provider.now_utc();
        Ok(self
            .sessions
            .list_active(user_id)
            .await?
            .into_iter()
            .find(|s| !is_stale(s, now, max_age_hours)))
    }
}
