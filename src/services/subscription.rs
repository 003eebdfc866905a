//! Unsubscribe handles
//!
//! Every push-style subscription in the engine returns a [`Subscription`].
//! Dropping it or calling [`Subscription::unsubscribe`] releases the
//! underlying listener slot or background task exactly once.

use std::fmt;
use tokio::task::JoinHandle;

type CancelFn = Box<dyn FnOnce() + Send + Sync>;

/// Handle that tears a subscription down when dropped
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<CancelFn>,
}

impl Subscription {
    /// Subscription released by running `cancel`
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription backed by a spawned task, aborted on teardown
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self::new(move || handle.abort())
    }

    /// Handle with nothing to release
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
