//! Local Broadcast Hub
//!
//! Mirrors the current session between execution contexts (tabs/windows)
//! that share one same-origin storage slot, without waiting for the remote
//! store. A publishing context writes the slot and its own cell; every other
//! context watching the slot updates its cell only, never re-publishing and
//! never writing to the store. Values pushed by the remote store go through
//! the same path so the slot never outlives the record it mirrors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};
use uuid::Uuid;

use super::session_cell::{SessionCell, SessionListener};
use super::subscription::Subscription;
use crate::models::ActiveSession;

/// Fixed slot key the current session is mirrored under
pub const SESSION_CHANNEL_KEY: &str = "pomodoro:active-session";

/// Identity of one execution context sharing a slot
pub type ContextId = String;

/// Callback for slot changes made by another context
pub type SlotWatcher = Arc<dyn Fn(Option<&str>) + Send + Sync>;

/// Same-origin key/value storage with change notification.
///
/// Like browser storage events, a write notifies watchers registered by
/// every context except the writing one.
pub trait SharedSlot: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;

    fn write(&self, origin: &str, key: &str, value: Option<String>);

    fn watch(&self, context: &str, key: &str, watcher: SlotWatcher) -> Subscription;
}

struct SlotWatch {
    context: ContextId,
    key: String,
    watcher: SlotWatcher,
}

#[derive(Default)]
struct SlotState {
    values: HashMap<String, String>,
    watches: HashMap<u64, SlotWatch>,
    next_watch_id: u64,
}

/// In-process [`SharedSlot`]; clones share the same storage
#[derive(Default, Clone)]
pub struct InMemorySharedSlot {
    state: Arc<Mutex<SlotState>>,
}

impl InMemorySharedSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SharedSlot for InMemorySharedSlot {
    fn read(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    fn write(&self, origin: &str, key: &str, value: Option<String>) {
        let watchers: Vec<SlotWatcher> = {
            let mut state = self.lock();
            let previous = match &value {
                Some(v) => state.values.insert(key.to_string(), v.clone()),
                None => state.values.remove(key),
            };
            // Storage events only fire on an actual change
            if previous == value {
                return;
            }
            state
                .watches
                .values()
                .filter(|w| w.key == key && w.context != origin)
                .map(|w| w.watcher.clone())
                .collect()
        };

        for watcher in watchers {
            watcher(value.as_deref());
        }
    }

    fn watch(&self, context: &str, key: &str, watcher: SlotWatcher) -> Subscription {
        let id = {
            let mut state = self.lock();
            let id = state.next_watch_id;
            state.next_watch_id += 1;
            state.watches.insert(
                id,
                SlotWatch {
                    context: context.to_string(),
                    key: key.to_string(),
                    watcher,
                },
            );
            id
        };

        let state: Weak<Mutex<SlotState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .watches
                    .remove(&id);
            }
        })
    }
}

/// Per-context hub mirroring the current session through a [`SharedSlot`]
pub struct LocalBroadcastHub {
    context_id: ContextId,
    slot: Arc<dyn SharedSlot>,
    cell: Arc<SessionCell>,
    _watch: Subscription,
}

impl LocalBroadcastHub {
    /// Create a hub for a new context, seeding its cell from the slot
    pub fn new(slot: Arc<dyn SharedSlot>) -> Self {
        let context_id = Uuid::new_v4().to_string();

        let seed = slot
            .read(SESSION_CHANNEL_KEY)
            .and_then(|raw| decode_session(&raw));
        let cell = Arc::new(SessionCell::new(seed));

        let watched_cell = Arc::downgrade(&cell);
        let watch = slot.watch(
            &context_id,
            SESSION_CHANNEL_KEY,
            Arc::new(move |raw: Option<&str>| {
                let Some(cell) = watched_cell.upgrade() else {
                    return;
                };
                let session = raw.and_then(decode_session);
                if cell.set(session) {
                    debug!("Session mirrored from another context");
                }
            }),
        );

        Self {
            context_id,
            slot,
            cell,
            _watch: watch,
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// The context's current-session cell
    pub fn cell(&self) -> &Arc<SessionCell> {
        &self.cell
    }

    pub fn current(&self) -> Option<ActiveSession> {
        self.cell.get()
    }

    /// Mirror a local mutation to the slot and this context's observers.
    ///
    /// Returns whether this context's view changed.
    pub fn publish(&self, session: Option<ActiveSession>) -> bool {
        let session = session.filter(|s| !s.is_terminated());

        let encoded = match session.as_ref().map(serde_json::to_string).transpose() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to encode session for broadcast");
                None
            }
        };
        self.slot.write(&self.context_id, SESSION_CHANNEL_KEY, encoded);
        self.cell.set(session)
    }

    /// Mirror a value that is already committed to the store.
    ///
    /// Writes the slot as well as the cell, so contexts opened later seed
    /// from it instead of from a session that has since ended. Returns
    /// whether this context's view changed.
    pub fn apply_remote(&self, session: Option<ActiveSession>) -> bool {
        let changed = self.publish(session);
        if changed {
            debug!(context_id = %self.context_id, "Mirrored committed session to shared slot");
        }
        changed
    }

    pub fn subscribe(&self, listener: SessionListener) -> Subscription {
        self.cell.subscribe(listener)
    }
}

fn decode_session(raw: &str) -> Option<ActiveSession> {
    match serde_json::from_str::<ActiveSession>(raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed session in shared slot");
            None
        }
    }
}
