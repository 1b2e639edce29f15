use crate::policy::PolicyRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// How a throttled request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Admitted,
    Rejected,
    StorageError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThrottleMetrics {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub rejected_requests: u64,
    pub storage_errors: u64,
    pub since: u64,
}

impl Default for ThrottleMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            admitted_requests: 0,
            rejected_requests: 0,
            storage_errors: 0,
            since: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Live counters for one policy. Updated without locking.
#[derive(Debug)]
struct PolicyCounters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    storage_errors: AtomicU64,
    since: AtomicU64,
}

impl PolicyCounters {
    fn new() -> Self {
        Self {
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
            since: AtomicU64::new(unix_now()),
        }
    }

    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Admitted => &self.admitted,
            Outcome::Rejected => &self.rejected,
            Outcome::StorageError => &self.storage_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ThrottleMetrics {
        let admitted_requests = self.admitted.load(Ordering::Relaxed);
        let rejected_requests = self.rejected.load(Ordering::Relaxed);
        let storage_errors = self.storage_errors.load(Ordering::Relaxed);

        ThrottleMetrics {
            total_requests: admitted_requests + rejected_requests + storage_errors,
            admitted_requests,
            rejected_requests,
            storage_errors,
            since: self.since.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.admitted.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.storage_errors.store(0, Ordering::Relaxed);
        self.since.store(unix_now(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub global: ThrottleMetrics,
    pub policies: HashMap<String, ThrottleMetrics>,
}

/// Per-policy counters for requests that reached the counter store.
/// Unthrottled requests are not counted.
///
/// Policies known up front get their counters at construction, so recording
/// only ever takes the shared read lock. A name seen for the first time
/// takes the write lock once to register it.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    policy_metrics: Arc<RwLock<HashMap<String, Arc<PolicyCounters>>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector with counters already in place for every registered policy.
    pub fn for_registry(registry: &PolicyRegistry) -> Self {
        let counters = registry
            .policies()
            .map(|policy| (policy.name().to_string(), Arc::new(PolicyCounters::new())))
            .collect();

        Self {
            policy_metrics: Arc::new(RwLock::new(counters)),
        }
    }

    pub async fn record(&self, policy: &str, outcome: Outcome) {
        if let Some(counters) = self.policy_metrics.read().await.get(policy) {
            counters.record(outcome);
            return;
        }

        self.policy_metrics
            .write()
            .await
            .entry(policy.to_string())
            .or_insert_with(|| Arc::new(PolicyCounters::new()))
            .record(outcome);
    }

    pub async fn get_policy_metrics(&self, policy: &str) -> Option<ThrottleMetrics> {
        let metrics = self.policy_metrics.read().await;
        metrics.get(policy).map(|counters| counters.snapshot())
    }

    pub async fn get_global_metrics(&self) -> ThrottleMetrics {
        let metrics = self.policy_metrics.read().await;
        let mut global = ThrottleMetrics::default();

        for policy_metrics in metrics.values().map(|counters| counters.snapshot()) {
            global.total_requests += policy_metrics.total_requests;
            global.admitted_requests += policy_metrics.admitted_requests;
            global.rejected_requests += policy_metrics.rejected_requests;
            global.storage_errors += policy_metrics.storage_errors;
            global.since = global.since.min(policy_metrics.since);
        }

        global
    }

    pub async fn report(&self) -> MetricsReport {
        let global = self.get_global_metrics().await;
        let policies = self
            .policy_metrics
            .read()
            .await
            .iter()
            .map(|(name, counters)| (name.clone(), counters.snapshot()))
            .collect();
        MetricsReport { global, policies }
    }

    /// Zero every counter. Registered policy names are kept.
    pub async fn reset(&self) {
        for counters in self.policy_metrics.read().await.values() {
            counters.reset();
        }
    }
}
