//! Fixed window counter
//!
//! A window opens on the first hit after the previous one closed and counts
//! every hit until `length` has elapsed from that first hit. A window that has
//! elapsed is never reused: the next hit replaces it with a fresh one.

use super::{ceil_seconds, CounterSnapshot};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    hits: u64,
    started_at: Instant,
    length: Duration,
}

impl FixedWindow {
    /// Open a window with its first hit already recorded.
    pub fn start(now: Instant, length: Duration) -> Self {
        Self {
            hits: 1,
            started_at: now,
            length,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn ends_at(&self) -> Instant {
        self.started_at + self.length
    }

    pub fn is_elapsed(&self, now: Instant) -> bool {
        now >= self.ends_at()
    }

    /// Record a hit, rolling over to a new window if this one has closed.
    ///
    /// `length` only applies when a new window is opened; an open window keeps
    /// the length it started with.
    pub fn hit(&mut self, now: Instant, length: Duration) -> CounterSnapshot {
        if self.is_elapsed(now) {
            *self = Self::start(now, length);
        } else {
            self.hits = self.hits.saturating_add(1);
        }
        self.snapshot(now)
    }

    pub fn expires_in(&self, now: Instant) -> Duration {
        self.ends_at().saturating_duration_since(now)
    }

    pub fn snapshot(&self, now: Instant) -> CounterSnapshot {
        CounterSnapshot::new(self.hits, ceil_seconds(self.expires_in(now)))
    }
}
