//! Primary action resolution
//!
//! Maps the current session to the single action a "primary" control
//! (space bar, main button) should perform.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::{ActiveSession, SessionPhase, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrimaryAction {
    StartWork,
    StartShortBreak,
    StartLongBreak,
    Resume,
    Pause,
}

impl PrimaryAction {
    /// Phase started by this action, if it starts one
    pub fn starts_phase(&self) -> Option<SessionPhase> {
        match self {
            PrimaryAction::StartWork => Some(SessionPhase::Work),
            PrimaryAction::StartShortBreak => Some(SessionPhase::ShortBreak),
            PrimaryAction::StartLongBreak => Some(SessionPhase::LongBreak),
            PrimaryAction::Resume | PrimaryAction::Pause => None,
        }
    }

    fn start(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Work => PrimaryAction::StartWork,
            SessionPhase::ShortBreak => PrimaryAction::StartShortBreak,
            SessionPhase::LongBreak => PrimaryAction::StartLongBreak,
        }
    }
}

/// Decide the primary action; total over every status and phase
pub fn resolve_primary_action(session: Option<&ActiveSession>, is_running: bool) -> PrimaryAction {
    if is_running {
        return PrimaryAction::Pause;
    }

    match session {
        Some(session) => match session.status {
            SessionStatus::Running => PrimaryAction::Pause,
            SessionStatus::Paused => PrimaryAction::Resume,
            SessionStatus::Stopped => PrimaryAction::start(session.phase),
            SessionStatus::Terminated => PrimaryAction::StartWork,
        },
        None => PrimaryAction::StartWork,
    }
}
