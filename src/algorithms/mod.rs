//! Rate limiting algorithms module
//!
//! Window arithmetic shared by the counter store backends. Backends own the
//! locking or remote atomicity; the types here are plain values.

pub mod fixed_window;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use fixed_window::FixedWindow;

/// Result of recording one hit against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Hits recorded in the current window, including this one.
    pub hits: u64,
    /// Whole seconds until the current window closes, rounded up.
    pub expires_in_seconds: u64,
}

impl CounterSnapshot {
    pub fn new(hits: u64, expires_in_seconds: u64) -> Self {
        Self {
            hits,
            expires_in_seconds,
        }
    }

    /// True for the hit that opened a fresh window.
    pub fn started_window(&self) -> bool {
        self.hits == 1
    }
}

/// Round a remaining duration up to whole seconds.
///
/// An open window never reports zero, so a `Retry-After` derived from it is
/// always at least one second.
pub fn ceil_seconds(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

/// Same rounding for a remaining time expressed in milliseconds.
pub fn ceil_seconds_from_millis(remaining_ms: u64) -> u64 {
    remaining_ms.div_ceil(1000)
}
