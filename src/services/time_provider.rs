//! Clock abstraction
//!
//! Countdowns and staleness ages are computed against this trait so tests can
//! drive time by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

pub trait TimeProvider: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Time passed since `earlier`, never negative
    fn elapsed_since(&self, earlier: DateTime<Utc>) -> Duration {
        (self.now_utc() - earlier).max(Duration::zero())
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl SystemTimeProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock with millisecond resolution.
///
/// Clones share the same instant, so a test can keep one handle while the
/// engine holds another.
#[derive(Debug, Clone)]
pub struct MockTimeProvider {
    millis: Arc<AtomicI64>,
}

impl MockTimeProvider {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn new_from_now() -> Self {
        Self::new(Utc::now())
    }

    /// None when the date is not a valid calendar instant
    pub fn new_from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self::new)
    }

    pub fn set_time(&self, instant: DateTime<Utc>) {
        self.millis.store(instant.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }

    pub fn advance_hours(&self, hours: i64) {
        self.advance(Duration::hours(hours));
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

impl Default for MockTimeProvider {
    fn default() -> Self {
        Self::new_from_now()
    }
}

impl TimeProvider for MockTimeProvider {
    fn now_utc(&self) -> DateTime<Utc> {
        self.current_time()
    }
}
