//! Pomodoro focus-session engine
//!
//! Keeps a user's single active pomodoro session consistent across
//! execution contexts and devices: an explicit state machine, optimistic
//! local updates mirrored between contexts, a durable store with a
//! change-feed, stale-session reclamation and cumulative per-task stats.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::{FocusContext, FocusEngine};
