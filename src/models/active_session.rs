//! Active Session Model
//!
//! The single in-flight pomodoro timer for a user, together with the state
//! machine that drives it. Transitions here are pure: they take the current
//! wall-clock time as an argument and never touch storage, so the same rules
//! apply to local optimistic updates and to tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of an active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    /// Not counting down; the staged phase has not begun
    Stopped,
    Running,
    /// A running countdown was interrupted mid-flight
    Paused,
    /// Final state, accepts no further transitions
    Terminated,
}

/// Kind of interval currently configured on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionPhase {
    Work,
    ShortBreak,
    LongBreak,
}

impl SessionPhase {
    /// Whether this phase is one of the break phases
    pub fn is_break(&self) -> bool {
        matches!(self, SessionPhase::ShortBreak | SessionPhase::LongBreak)
    }

    /// Get display name for this phase
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionPhase::Work => "Work Session",
            SessionPhase::ShortBreak => "Short Break",
            SessionPhase::LongBreak => "Long Break",
        }
    }
}

/// Interval durations (minutes) and long-break cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_until_long_break: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_duration: 25,
            short_break_duration: 5,
            long_break_duration: 15,
            sessions_until_long_break: 4,
        }
    }
}

impl TimerSettings {
    pub const MAX_WORK_MINUTES: u32 = 180;
    pub const MAX_BREAK_MINUTES: u32 = 60;
    pub const MAX_SESSIONS_UNTIL_LONG_BREAK: u32 = 12;

    /// Configured duration in minutes for a phase
    pub fn duration_minutes(&self, phase: SessionPhase) -> u32 {
        match phase {
            SessionPhase::Work => self.work_duration,
            SessionPhase::ShortBreak => self.short_break_duration,
            SessionPhase::LongBreak => self.long_break_duration,
        }
    }

    /// Validate duration and cadence bounds
    pub fn validate(&self) -> Result<(), TimerSessionError> {
        if self.work_duration == 0 || self.work_duration > Self::MAX_WORK_MINUTES {
            return Err(TimerSessionError::InvalidDuration {
                phase: SessionPhase::Work,
                minutes: self.work_duration,
            });
        }
        if self.short_break_duration == 0 || self.short_break_duration > Self::MAX_BREAK_MINUTES {
            return Err(TimerSessionError::InvalidDuration {
                phase: SessionPhase::ShortBreak,
                minutes: self.short_break_duration,
            });
        }
        if self.long_break_duration == 0 || self.long_break_duration > Self::MAX_BREAK_MINUTES {
            return Err(TimerSessionError::InvalidDuration {
                phase: SessionPhase::LongBreak,
                minutes: self.long_break_duration,
            });
        }
        if self.sessions_until_long_break == 0
            || self.sessions_until_long_break > Self::MAX_SESSIONS_UNTIL_LONG_BREAK
        {
            return Err(TimerSessionError::InvalidCadence(self.sessions_until_long_break));
        }
        Ok(())
    }
}

/// Task a session's work time is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: String,
    pub task_title: Option<String>,
}

/// The single in-flight timer for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: String,
    pub user_id: String,
    pub task_id: Option<String>,
    /// Denormalized snapshot for display
    pub task_title: Option<String>,

    pub status: SessionStatus,
    pub phase: SessionPhase,

    /// Minutes
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_until_long_break: u32,

    pub completed_work_sessions: u32,
    pub completed_break_sessions: u32,

    pub start_time: Option<DateTime<Utc>>,
    pub pause_time: Option<DateTime<Utc>>,
    pub time_remaining_seconds: i64,
    /// Minutes loaded when the interval in progress started
    #[serde(default)]
    pub interval_duration: Option<u32>,

    pub show_floating_indicator: bool,
    pub show_card: bool,

    pub created_at: DateTime<Utc>,
    /// Last state-changing write
    pub updated_at: DateTime<Utc>,
}

/// An interval that ended, either completed or abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedInterval {
    pub phase: SessionPhase,
    pub duration_minutes: u32,
    pub interrupted: bool,
}

impl ActiveSession {
    /// Create a stopped session with `phase` staged and its full duration loaded
    pub fn new(
        user_id: impl Into<String>,
        task: Option<TaskRef>,
        settings: TimerSettings,
        phase: SessionPhase,
        now: DateTime<Utc>,
    ) -> Self {
        let (task_id, task_title) = match task {
            Some(task) => (Some(task.task_id), task.task_title),
            None => (None, None),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            task_id,
            task_title,
            status: SessionStatus::Stopped,
            phase,
            work_duration: settings.work_duration,
            short_break_duration: settings.short_break_duration,
            long_break_duration: settings.long_break_duration,
            sessions_until_long_break: settings.sessions_until_long_break,
            completed_work_sessions: 0,
            completed_break_sessions: 0,
            start_time: None,
            pause_time: None,
            time_remaining_seconds: i64::from(settings.duration_minutes(phase)) * 60,
            interval_duration: None,
            show_floating_indicator: true,
            show_card: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn settings(&self) -> TimerSettings {
        TimerSettings {
            work_duration: self.work_duration,
            short_break_duration: self.short_break_duration,
            long_break_duration: self.long_break_duration,
            sessions_until_long_break: self.sessions_until_long_break,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.status == SessionStatus::Terminated
    }

    /// Full duration of the currently staged phase in seconds
    pub fn phase_duration_seconds(&self) -> i64 {
        i64::from(self.settings().duration_minutes(self.phase)) * 60
    }

    /// Remaining seconds as seen at `now`, accounting for a running countdown
    pub fn remaining_at(&self, now: DateTime<Utc>) -> i64 {
        match (self.status, self.start_time) {
            (SessionStatus::Running, Some(started)) => {
                let elapsed = (now - started).num_seconds().max(0);
                (self.time_remaining_seconds - elapsed).max(0)
            }
            _ => self.time_remaining_seconds.max(0),
        }
    }

    /// Whether a running countdown has reached zero at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_running() && self.remaining_at(now) == 0
    }

    /// Clamp remaining time so no write ever carries a negative value
    pub fn clamp_time_remaining(&mut self) {
        if self.time_remaining_seconds < 0 {
            self.time_remaining_seconds = 0;
        }
    }

    /// Start counting down `phase`
    pub fn start(&mut self, phase: SessionPhase, now: DateTime<Utc>) -> Result<(), TimerSessionError> {
        if self.status != SessionStatus::Stopped {
            return Err(self.invalid("start"));
        }

        self.phase = phase;
        self.status = SessionStatus::Running;
        self.start_time = Some(now);
        self.pause_time = None;
        self.time_remaining_seconds = self.phase_duration_seconds();
        self.interval_duration = Some(self.settings().duration_minutes(phase));
        self.touch(now);
        Ok(())
    }

    /// Freeze the countdown
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TimerSessionError> {
        if self.status != SessionStatus::Running {
            return Err(self.invalid("pause"));
        }

        self.time_remaining_seconds = self.remaining_at(now);
        self.status = SessionStatus::Paused;
        self.pause_time = Some(now);
        self.start_time = None;
        self.touch(now);
        Ok(())
    }

    /// Continue a paused countdown from the frozen remaining time
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TimerSessionError> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid("resume"));
        }

        self.status = SessionStatus::Running;
        self.start_time = Some(now);
        self.pause_time = None;
        self.touch(now);
        Ok(())
    }

    /// Finish the running interval and stage the next phase
    pub fn complete_interval(&mut self, now: DateTime<Utc>) -> Result<FinishedInterval, TimerSessionError> {
        if self.status != SessionStatus::Running {
            return Err(self.invalid("complete"));
        }

        let finished = FinishedInterval {
            phase: self.phase,
            duration_minutes: self.interval_minutes(),
            interrupted: false,
        };

        if self.phase == SessionPhase::Work {
            self.completed_work_sessions += 1;
        } else {
            self.completed_break_sessions += 1;
        }

        let next = next_phase_after_completion(
            self.phase,
            self.completed_work_sessions,
            self.sessions_until_long_break,
        );
        self.stage(next, now);
        Ok(finished)
    }

    /// Abandon the current interval without counting it.
    ///
    /// Returns the interrupted interval when one was actually in progress.
    pub fn skip(&mut self, now: DateTime<Utc>) -> Result<Option<FinishedInterval>, TimerSessionError> {
        if self.is_terminated() {
            return Err(self.invalid("skip"));
        }

        let interrupted = self.in_progress_interval(now);
        let next = match self.phase {
            SessionPhase::Work => SessionPhase::ShortBreak,
            SessionPhase::ShortBreak | SessionPhase::LongBreak => SessionPhase::Work,
        };
        self.stage(next, now);
        Ok(interrupted)
    }

    /// End the logical session
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<Option<FinishedInterval>, TimerSessionError> {
        if self.is_terminated() {
            return Err(self.invalid("stop"));
        }

        let interrupted = self.in_progress_interval(now);
        self.terminate(now);
        Ok(interrupted)
    }

    /// Move to `terminated` and clear timing, bypassing guards
    pub fn terminate(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Terminated;
        self.start_time = None;
        self.pause_time = None;
        self.interval_duration = None;
        self.touch(now);
    }

    /// Replace durations and cadence; a stopped session reloads its staged phase
    pub fn apply_settings(&mut self, settings: TimerSettings, now: DateTime<Utc>) -> Result<(), TimerSessionError> {
        if self.is_terminated() {
            return Err(self.invalid("update settings"));
        }
        settings.validate()?;

        self.work_duration = settings.work_duration;
        self.short_break_duration = settings.short_break_duration;
        self.long_break_duration = settings.long_break_duration;
        self.sessions_until_long_break = settings.sessions_until_long_break;

        if self.status == SessionStatus::Stopped {
            self.time_remaining_seconds = self.phase_duration_seconds();
        }
        self.touch(now);
        Ok(())
    }

    /// Check the status/timing invariants
    pub fn validate(&self) -> Result<(), TimerSessionError> {
        if self.time_remaining_seconds < 0 {
            return Err(TimerSessionError::NegativeRemaining(self.time_remaining_seconds));
        }

        let consistent = match self.status {
            SessionStatus::Running => self.start_time.is_some() && self.pause_time.is_none(),
            SessionStatus::Paused => self.pause_time.is_some() && self.start_time.is_none(),
            SessionStatus::Stopped | SessionStatus::Terminated => {
                self.start_time.is_none() && self.pause_time.is_none()
            }
        };
        if !consistent {
            return Err(TimerSessionError::InconsistentTiming(self.status));
        }

        if self.updated_at < self.created_at {
            return Err(TimerSessionError::InvalidTimestamps);
        }
        Ok(())
    }

    fn in_progress_interval(&self, now: DateTime<Utc>) -> Option<FinishedInterval> {
        match self.status {
            SessionStatus::Running | SessionStatus::Paused => {
                let elapsed_seconds = (i64::from(self.interval_minutes()) * 60 - self.remaining_at(now)).max(0);
                Some(FinishedInterval {
                    phase: self.phase,
                    duration_minutes: u32::try_from(elapsed_seconds / 60).unwrap_or(u32::MAX),
                    interrupted: true,
                })
            }
            SessionStatus::Stopped | SessionStatus::Terminated => None,
        }
    }

    fn stage(&mut self, phase: SessionPhase, now: DateTime<Utc>) {
        self.phase = phase;
        self.status = SessionStatus::Stopped;
        self.start_time = None;
        self.pause_time = None;
        self.time_remaining_seconds = self.phase_duration_seconds();
        self.interval_duration = None;
        self.touch(now);
    }

    /// Length of the interval in progress; settings changed since it started do not count
    fn interval_minutes(&self) -> u32 {
        self.interval_duration
            .unwrap_or_else(|| self.settings().duration_minutes(self.phase))
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn invalid(&self, action: &'static str) -> TimerSessionError {
        TimerSessionError::InvalidTransition {
            action,
            status: self.status,
        }
    }
}

/// Phase staged after a completed interval.
///
/// `completed_work_sessions` is the count after the completion was recorded.
pub fn next_phase_after_completion(
    finished: SessionPhase,
    completed_work_sessions: u32,
    sessions_until_long_break: u32,
) -> SessionPhase {
    match finished {
        SessionPhase::Work => {
            let cadence = sessions_until_long_break.max(1);
            if completed_work_sessions > 0 && completed_work_sessions % cadence == 0 {
                SessionPhase::LongBreak
            } else {
                SessionPhase::ShortBreak
            }
        }
        SessionPhase::ShortBreak | SessionPhase::LongBreak => SessionPhase::Work,
    }
}

/// Active session validation and transition errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimerSessionError {
    #[error("Cannot {action} a session that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: SessionStatus,
    },

    #[error("{} duration {minutes} is invalid", .phase.display_name())]
    InvalidDuration { phase: SessionPhase, minutes: u32 },

    #[error("Sessions until long break {0} is invalid (must be 1-12)")]
    InvalidCadence(u32),

    #[error("Remaining time {0} is negative")]
    NegativeRemaining(i64),

    #[error("Timing fields are inconsistent with status {0}")]
    InconsistentTiming(SessionStatus),

    #[error("Session timestamps are inconsistent")]
    InvalidTimestamps,
}
