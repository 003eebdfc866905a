//! Services module for the focus-session engine
//!
//! Contains the session state machine driver, cross-context and remote
//! synchronization, staleness reconciliation and statistics aggregation.

pub mod action_policy;
pub mod broadcast_hub;
pub mod engine;
pub mod remote_listener;
pub mod session_cell;
pub mod session_store;
pub mod staleness;
pub mod stats_aggregator;
pub mod subscription;
pub mod time_provider;

// Re-export commonly used services
pub use action_policy::{resolve_primary_action, PrimaryAction};
pub use broadcast_hub::{InMemorySharedSlot, LocalBroadcastHub, SharedSlot, SESSION_CHANNEL_KEY};
pub use engine::{EngineOptions, FocusContext, FocusEngine};
pub use remote_listener::RemoteChangeListener;
pub use session_cell::{SessionCell, SessionListener};
pub use session_store::{SessionStore, StoreOptions};
pub use staleness::{StalenessReconciler, DEFAULT_SWEEP_MAX_AGE_HOURS, RESUME_LOOKUP_MAX_AGE_HOURS};
pub use stats_aggregator::{CumulativeStatsAggregator, StatsListener};
pub use subscription::Subscription;
pub use time_provider::{MockTimeProvider, SystemTimeProvider, TimeProvider};
