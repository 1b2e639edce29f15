//! Counter store backends
//!
//! The guard talks to a [`CounterStore`] only through `increment`, so the
//! in-process map and the shared Redis backend are interchangeable.

pub mod memory;
pub mod redis;

use crate::algorithms::CounterSnapshot;
use crate::error::ThrottlerResult;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::InMemoryCounterStore;
pub use self::redis::RedisCounterStore;

/// Shared key -> (hits, expiry) tracker.
///
/// Implementations must be linearizable per key: N concurrent increments of
/// one key within a window return the hit counts `1..=N`, each exactly once.
/// Unrelated keys must not need to coordinate.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one hit for `key` in a fixed window of `window` length.
    ///
    /// Fails with [`ThrottlerError::StorageUnavailable`](crate::error::ThrottlerError::StorageUnavailable)
    /// when the backend cannot be reached.
    async fn increment(&self, key: &str, window: Duration) -> ThrottlerResult<CounterSnapshot>;

    /// Cheap liveness probe used by readiness checks.
    async fn ping(&self) -> ThrottlerResult<()>;

    /// Short backend name for health output.
    fn backend(&self) -> &'static str;
}
