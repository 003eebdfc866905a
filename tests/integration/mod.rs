//! Integration Tests Module
//!
//! Engine, store and HTTP suites run against the in-memory and SQLite
//! backends with a hand-driven clock.

pub mod engine_utils;

// Re-export integration test utilities
pub use engine_utils::{eventually, eventually_async, settle, task, Harness};

mod api_tests;
mod multi_device_tests;
mod session_lifecycle_tests;
mod staleness_sweep_tests;
