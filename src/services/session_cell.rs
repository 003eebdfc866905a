//! Session Cell
//!
//! The per-context "current session" value. Both the local broadcast hub and
//! the remote change listener write into it; UI observers subscribe to it.
//! Writes are idempotent: storing a value equal to the held one notifies no one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::subscription::Subscription;
use crate::models::ActiveSession;

/// Callback invoked with the new current session (None once terminated)
pub type SessionListener = Arc<dyn Fn(Option<&ActiveSession>) + Send + Sync>;

#[derive(Default)]
struct CellState {
    value: Option<ActiveSession>,
    listeners: HashMap<u64, SessionListener>,
    next_listener_id: u64,
}

/// Single mutable current-session slot for one execution context
#[derive(Default)]
pub struct SessionCell {
    state: Mutex<CellState>,
}

impl SessionCell {
    pub fn new(initial: Option<ActiveSession>) -> Self {
        Self {
            state: Mutex::new(CellState {
                value: initial,
                ..CellState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<ActiveSession> {
        self.lock().value.clone()
    }

    /// Replace the held value; returns whether observers were notified.
    ///
    /// Terminated sessions are stored as None.
    pub fn set(&self, value: Option<ActiveSession>) -> bool {
        let value = value.filter(|session| !session.is_terminated());

        let listeners: Vec<SessionListener> = {
            let mut state = self.lock();
            if state.value == value {
                return false;
            }
            state.value = value.clone();
            state.listeners.values().cloned().collect()
        };

        // Listeners run outside the lock so they may read the cell
        for listener in listeners {
            listener(value.as_ref());
        }
        true
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Register a listener; it stays registered until the handle is released
    pub fn subscribe(self: &Arc<Self>, listener: SessionListener) -> Subscription {
        let id = {
            let mut state = self.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            state.listeners.insert(id, listener);
            id
        };

        let cell: Weak<SessionCell> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(cell) = cell.upgrade() {
                cell.lock().listeners.remove(&id);
            }
        })
    }
}

impl std::fmt::Debug for SessionCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionCell")
            .field("value", &state.value)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
