//! Per-route throttle declarations and their resolution against the registry.
//!
//! A route (or a group of routes) declares at registration time whether it is
//! skipped and which policy it uses. Declarations are resolved once, when the
//! guard layer is built, so an unknown policy name fails startup rather than a
//! request.

use crate::error::ThrottlerResult;
use crate::identity::IdentityClass;
use crate::policy::{Policy, PolicyRegistry};
use std::sync::Arc;

/// Which policy a route declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRef {
    /// A bare throttle declaration: use the registry's default policy.
    Default,
    Named(String),
}

/// Static throttle metadata attached to a route or route group.
///
/// Every field is optional so that a handler's declaration can override its
/// group's field by field (see [`RouteThrottle::inherit`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteThrottle {
    skip: Option<bool>,
    policy: Option<PolicyRef>,
}

impl RouteThrottle {
    /// No declaration at all. Anonymous callers get the default policy,
    /// authenticated callers are not throttled.
    pub fn undeclared() -> Self {
        Self::default()
    }

    /// Throttle every caller with the default policy.
    pub fn throttled() -> Self {
        Self {
            skip: None,
            policy: Some(PolicyRef::Default),
        }
    }

    /// Throttle every caller with the named policy.
    pub fn policy(name: impl Into<String>) -> Self {
        Self {
            skip: None,
            policy: Some(PolicyRef::Named(name.into())),
        }
    }

    /// Never throttle this route.
    pub fn skip() -> Self {
        Self {
            skip: Some(true),
            policy: None,
        }
    }

    /// Explicitly re-enable throttling under a skipping group.
    pub fn unskip(mut self) -> Self {
        self.skip = Some(false);
        self
    }

    /// Fill fields this declaration leaves open from the enclosing group.
    pub fn inherit(self, group: &RouteThrottle) -> Self {
        Self {
            skip: self.skip.or(group.skip),
            policy: self.policy.or_else(|| group.policy.clone()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.unwrap_or(false)
    }

    pub fn policy_name(&self) -> Option<&str> {
        match &self.policy {
            Some(PolicyRef::Named(name)) => Some(name),
            _ => None,
        }
    }

    pub fn scope(&self) -> ThrottleScope {
        if self.policy.is_some() {
            ThrottleScope::AllCallers
        } else {
            ThrottleScope::AnonymousOnly
        }
    }
}

/// Which callers a resolved route applies its policy to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleScope {
    AllCallers,
    AnonymousOnly,
}

impl ThrottleScope {
    pub fn applies_to(&self, class: IdentityClass) -> bool {
        match self {
            ThrottleScope::AllCallers => true,
            ThrottleScope::AnonymousOnly => class == IdentityClass::Anonymous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePolicy {
    Skip,
    Enforce(Arc<Policy>),
}

/// A route declaration after resolution, cached next to the route's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub policy: EffectivePolicy,
    pub scope: ThrottleScope,
}

impl ResolvedRoute {
    /// Policy to enforce for a caller of `class`, or `None` to let it through.
    pub fn policy_for(&self, class: IdentityClass) -> Option<&Arc<Policy>> {
        match &self.policy {
            EffectivePolicy::Enforce(policy) if self.scope.applies_to(class) => Some(policy),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.policy == EffectivePolicy::Skip
    }
}

#[derive(Debug, Clone)]
pub struct RoutePolicyResolver {
    registry: Arc<PolicyRegistry>,
}

impl RoutePolicyResolver {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Skip wins, then an explicit policy name, then the default policy.
    pub fn effective_policy(&self, route: &RouteThrottle) -> ThrottlerResult<EffectivePolicy> {
        if route.is_skipped() {
            return Ok(EffectivePolicy::Skip);
        }
        self.registry
            .resolve(route.policy_name())
            .map(EffectivePolicy::Enforce)
    }

    pub fn resolve(&self, route: &RouteThrottle) -> ThrottlerResult<ResolvedRoute> {
        if let Some(name) = route.policy_name() {
            // Validate even when skipped so a typo cannot hide behind a skip.
            self.registry.resolve(Some(name))?;
        }

        Ok(ResolvedRoute {
            policy: self.effective_policy(route)?,
            scope: route.scope(),
        })
    }
}
