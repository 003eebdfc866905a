//! Change Feed
//!
//! In-process realtime feed of committed row changes. Stores publish after
//! every successful write; subscribers receive the events matching their
//! filter through a tokio broadcast channel.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::{ChangeEvent, ChangeFilter};

/// Source of change events for subscribers
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream;
}

/// Fan-out hub for committed changes
#[derive(Debug, Clone)]
pub struct ChangeFeedHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeedHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a committed change; returns how many subscribers were reached
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Change published with no subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeedHub {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ChangeFeed for ChangeFeedHub {
    fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        ChangeStream {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

/// Filtered stream of change events; dropping it unsubscribes
#[derive(Debug)]
pub struct ChangeStream {
    receiver: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl ChangeStream {
    /// Next matching event, or None once the feed is closed.
    ///
    /// A subscriber that fell behind skips the missed events; periodic
    /// sweeps and fresh reads act as the backstop.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change-feed subscriber lagged, skipping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already queued
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change-feed subscriber lagged, skipping events");
                }
                Err(_) => return None,
            }
        }
    }
}
