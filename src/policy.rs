//! Named rate-limit policies.
//!
//! The registry is built once from [`RateLimitConfig`] at startup and shared
//! read-only behind an `Arc`; nothing mutates it afterwards.

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::rate_limit_config::{PolicyConfig, RateLimitConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLICY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    name: String,
    window_seconds: u64,
    limit: u64,
}

impl Policy {
    pub fn new(name: impl Into<String>, window_seconds: u64, limit: u64) -> ThrottlerResult<Self> {
        let name = name.into();
        PolicyConfig::new(window_seconds, limit).check(&name)?;
        Ok(Self {
            name,
            window_seconds,
            limit,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether a bucket at `hits` is still within quota.
    pub fn admits(&self, hits: u64) -> bool {
        hits <= self.limit
    }

    pub fn remaining(&self, hits: u64) -> u64 {
        self.limit.saturating_sub(hits)
    }
}

#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    default: Arc<Policy>,
    named: HashMap<String, Arc<Policy>>,
}

impl PolicyRegistry {
    /// Registry holding only the default policy.
    pub fn new(default: Policy) -> Self {
        let default = Arc::new(default);
        let mut named = HashMap::new();
        named.insert(default.name().to_string(), default.clone());
        Self { default, named }
    }

    /// Add a named override. Re-registering a name is a configuration error.
    pub fn with_policy(mut self, policy: Policy) -> ThrottlerResult<Self> {
        if self.named.contains_key(policy.name()) {
            return Err(ThrottlerError::Configuration(format!(
                "Duplicate throttle policy '{}'",
                policy.name()
            )));
        }
        self.named.insert(policy.name().to_string(), Arc::new(policy));
        Ok(self)
    }

    pub fn from_config(config: &RateLimitConfig) -> ThrottlerResult<Self> {
        config.validate_all()?;

        let mut registry = Self::new(config.default.to_policy(DEFAULT_POLICY)?);
        let mut names: Vec<_> = config.overrides.keys().collect();
        names.sort();
        for name in names {
            registry = registry.with_policy(config.overrides[name].to_policy(name)?)?;
        }
        Ok(registry)
    }

    pub fn default_policy(&self) -> &Arc<Policy> {
        &self.default
    }

    /// `None` yields the default policy; an unknown name is an error.
    pub fn resolve(&self, name: Option<&str>) -> ThrottlerResult<Arc<Policy>> {
        match name {
            None => Ok(self.default.clone()),
            Some(name) => self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| ThrottlerError::UnknownPolicy(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    pub fn policies(&self) -> impl Iterator<Item = &Arc<Policy>> {
        self.named.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PolicyRegistry {
        PolicyRegistry::new(Policy::new(DEFAULT_POLICY, 60, 120).unwrap())
            .with_policy(Policy::new("strict", 60, 20).unwrap())
            .unwrap()
    }

    #[test]
    fn test_resolve_default_and_named() {
        let registry = registry();

        assert_eq!(registry.resolve(None).unwrap().limit(), 120);
        assert_eq!(registry.resolve(Some("strict")).unwrap().limit(), 20);
        assert_eq!(registry.resolve(Some(DEFAULT_POLICY)).unwrap().limit(), 120);
    }

    #[test]
    fn test_resolve_unknown_name() {
        let err = registry().resolve(Some("lenient")).unwrap_err();
        assert!(matches!(err, ThrottlerError::UnknownPolicy(name) if name == "lenient"));
    }

    #[test]
    fn test_duplicate_policy_rejected() {
        let err = registry()
            .with_policy(Policy::new("strict", 10, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, ThrottlerError::Configuration(_)));
    }

    #[test]
    fn test_invalid_policy_values() {
        assert!(Policy::new("zero-window", 0, 10).is_err());
        assert!(Policy::new("zero-limit", 60, 0).is_err());
        assert!(Policy::new("bad:name", 60, 10).is_err());
    }

    #[test]
    fn test_admission_boundary() {
        let policy = Policy::new("strict", 60, 20).unwrap();

        assert!(policy.admits(20));
        assert!(!policy.admits(21));
        assert_eq!(policy.remaining(20), 0);
        assert_eq!(policy.remaining(25), 0);
    }

    #[test]
    fn test_from_config() {
        let registry = PolicyRegistry::from_config(&RateLimitConfig::default()).unwrap();

        assert_eq!(registry.default_policy().window_seconds(), 60);
        assert_eq!(registry.default_policy().limit(), 120);
        assert!(registry.contains("strict"));
    }
}
