use super::CounterStore;
use crate::algorithms::{CounterSnapshot, FixedWindow};
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_SHARDS: usize = 16;

type Shard = Mutex<HashMap<String, FixedWindow>>;

/// In-process counter store for single-instance deployments.
///
/// Buckets are spread over independently locked shards so unrelated keys do
/// not contend. Each increment holds one shard lock for a map lookup and an
/// addition, which keeps a `std` mutex appropriate inside async handlers.
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    shards: Arc<[Shard]>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_shards(clock, DEFAULT_SHARDS)
    }

    pub fn with_shards(clock: Arc<dyn Clock>, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into();

        Self { shards, clock }
    }

    fn shard(&self, key: &str) -> ThrottlerResult<MutexGuard<'_, HashMap<String, FixedWindow>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;

        self.shards[index]
            .lock()
            .map_err(|_| ThrottlerError::StorageUnavailable("counter shard lock poisoned".into()))
    }

    /// Drop buckets whose window has closed. Returns how many were removed.
    ///
    /// Purely an optimization: a stale bucket is treated as a new window on
    /// its next increment whether or not it was purged.
    pub fn purge_expired(&self) -> ThrottlerResult<usize> {
        let now = self.clock.now();
        let mut removed = 0;

        for shard in self.shards.iter() {
            let mut buckets = shard
                .lock()
                .map_err(|_| ThrottlerError::StorageUnavailable("counter shard lock poisoned".into()))?;
            let before = buckets.len();
            buckets.retain(|_, window| !window.is_elapsed(now));
            removed += before - buckets.len();
        }

        Ok(removed)
    }

    /// Number of buckets currently held, stale ones included.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().map(|b| b.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically purge closed windows until the returned task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.purge_expired() {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Purged expired throttle buckets"),
                    Err(e) => debug!(error = %e, "Throttle bucket sweep failed"),
                }
            }
        })
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> ThrottlerResult<CounterSnapshot> {
        let now = self.clock.now();
        let mut buckets = self.shard(key)?;

        let snapshot = match buckets.get_mut(key) {
            Some(bucket) => bucket.hit(now, window),
            None => {
                let bucket = FixedWindow::start(now, window);
                let snapshot = bucket.snapshot(now);
                buckets.insert(key.to_string(), bucket);
                snapshot
            }
        };

        Ok(snapshot)
    }

    async fn ping(&self) -> ThrottlerResult<()> {
        drop(self.shard("")?);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
