use crate::error::{ThrottlerError, ThrottlerResult};
use crate::identity::{CallerIdentity, IdentityDeriver};
use crate::key_generator::KeyGenerator;
use crate::metrics::{MetricsCollector, Outcome};
use crate::middleware::ThrottleLayer;
use crate::policy::PolicyRegistry;
use crate::response::QuotaStatus;
use crate::route::{ResolvedRoute, RoutePolicyResolver, RouteThrottle};
use crate::storage::CounterStore;
use axum::extract::Request;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Outcome of a request that was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No policy applied; the response carries no quota headers.
    Unthrottled,
    /// Counted and within quota.
    Throttled(QuotaStatus),
}

/// Per-request throttling: resolve policy, derive key, count, decide.
///
/// Cheap to clone; every clone shares the same store, registry and metrics.
#[derive(Clone)]
pub struct ThrottleGuard {
    resolver: RoutePolicyResolver,
    identity: IdentityDeriver,
    keys: KeyGenerator,
    store: Arc<dyn CounterStore>,
    metrics: MetricsCollector,
}

impl ThrottleGuard {
    pub fn new(registry: Arc<PolicyRegistry>, store: Arc<dyn CounterStore>) -> Self {
        let metrics = MetricsCollector::for_registry(&registry);
        Self {
            resolver: RoutePolicyResolver::new(registry),
            identity: IdentityDeriver::default(),
            keys: KeyGenerator::default(),
            store,
            metrics,
        }
    }

    pub fn with_identity_deriver(mut self, identity: IdentityDeriver) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        self.resolver.registry()
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Resolve a route declaration. Call at registration time.
    pub fn resolve(&self, route: &RouteThrottle) -> ThrottlerResult<ResolvedRoute> {
        self.resolver.resolve(route)
    }

    /// Build the tower layer for one route or route group.
    ///
    /// Fails with [`ThrottlerError::UnknownPolicy`] if the declaration names a
    /// policy the registry does not have.
    pub fn layer(&self, route: RouteThrottle) -> ThrottlerResult<ThrottleLayer> {
        let resolved = self.resolve(&route)?;
        debug!(route = ?route, resolved = ?resolved.policy, "Registered throttled route");
        Ok(ThrottleLayer::new(self.clone(), resolved))
    }

    pub fn caller<B>(&self, request: &Request<B>) -> CallerIdentity {
        self.identity.derive(request)
    }

    /// Count one hit for `caller` on `route` and decide.
    ///
    /// A hit is counted as soon as the store accepts it and is never given
    /// back, even if the request is later abandoned.
    pub async fn admit(&self, route: &ResolvedRoute, caller: &CallerIdentity) -> ThrottlerResult<Admission> {
        let Some(policy) = route.policy_for(caller.class) else {
            trace!(class = %caller.class, "Route not throttled for caller");
            return Ok(Admission::Unthrottled);
        };

        let key = self.keys.generate_key(policy, caller);
        let snapshot = match self.store.increment(&key, policy.window()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(
                    policy = %policy.name(),
                    key = %key,
                    error = %err,
                    "Throttle counter store failed"
                );
                self.metrics.record(policy.name(), Outcome::StorageError).await;
                return Err(err);
            }
        };

        if !policy.admits(snapshot.hits) {
            debug!(
                policy = %policy.name(),
                class = %caller.class,
                hits = snapshot.hits,
                limit = policy.limit(),
                retry_after = snapshot.expires_in_seconds,
                "Rate limit exceeded"
            );
            self.metrics.record(policy.name(), Outcome::Rejected).await;
            return Err(ThrottlerError::RateLimitExceeded {
                retry_after: snapshot.expires_in_seconds,
            });
        }

        self.metrics.record(policy.name(), Outcome::Admitted).await;
        Ok(Admission::Throttled(QuotaStatus::new(
            policy.limit(),
            policy.remaining(snapshot.hits),
            policy.window_seconds(),
        )))
    }
}
