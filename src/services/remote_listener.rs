//! Remote Change Listener
//!
//! Applies change-feed events for one user's sessions to a context's
//! broadcast hub, so writes made by other devices become visible to every
//! context sharing its slot. The store is authoritative: a pushed value
//! always replaces the optimistic local one.

use std::sync::Arc;

use tracing::{debug, info};

use super::broadcast_hub::LocalBroadcastHub;
use super::subscription::Subscription;
use crate::database::ChangeFeed;
use crate::models::{ChangeEvent, ChangeFilter, ChangeKind, ChangeRecord};

pub struct RemoteChangeListener;

impl RemoteChangeListener {
    /// Apply one event to the hub; returns whether the context's view changed
    pub fn apply_event(hub: &LocalBroadcastHub, user_id: &str, event: &ChangeEvent) -> bool {
        let ChangeRecord::Session(incoming) = &event.record else {
            return false;
        };
        if incoming.user_id != user_id {
            return false;
        }

        let held = hub.current();
        let is_held = held.as_ref().is_some_and(|s| s.id == incoming.id);

        match event.kind {
            ChangeKind::Delete => {
                if is_held {
                    hub.apply_remote(None)
                } else {
                    false
                }
            }
            ChangeKind::Insert | ChangeKind::Update => {
                if is_held || held.is_none() {
                    // Terminated values clear the view and the slot
                    hub.apply_remote(Some(incoming.clone()))
                } else if event.kind == ChangeKind::Insert && !incoming.is_terminated() {
                    debug!(session_id = %incoming.id, "Adopting session started elsewhere");
                    hub.apply_remote(Some(incoming.clone()))
                } else {
                    false
                }
            }
        }
    }

    /// Listen for the user's session changes until the handle is released
    pub fn subscribe(feed: &dyn ChangeFeed, user_id: &str, hub: Arc<LocalBroadcastHub>) -> Subscription {
        let mut stream = feed.subscribe(ChangeFilter::sessions_for_user(user_id));
        let user_id = user_id.to_string();

        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if Self::apply_event(&hub, &user_id, &event) {
                    debug!(user_id = %user_id, kind = %event.kind, "Applied remote session change");
                }
            }
            info!(user_id = %user_id, "Session change-feed closed");
        });

        Subscription::from_task(handle)
    }
}
