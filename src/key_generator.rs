//! Key generation for counter buckets.

use crate::identity::{CallerIdentity, IdentityClass};
use crate::policy::Policy;
use std::fmt;

pub const DEFAULT_KEY_PREFIX: &str = "throttler";

/// Composite bucket address: policy, identity class, caller identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub policy: String,
    pub class: IdentityClass,
    pub identifier: String,
}

impl ThrottleKey {
    pub fn new(policy: &Policy, identity: &CallerIdentity) -> Self {
        Self {
            policy: policy.name().to_string(),
            class: identity.class,
            identifier: identity.identifier.clone(),
        }
    }
}

impl fmt::Display for ThrottleKey {
    // Policy names cannot contain ':' and the class segment is fixed, so the
    // identifier may contain anything (IPv6 addresses included).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.policy, self.class, self.identifier)
    }
}

/// Turns throttle keys into storage keys under a fixed namespace.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    prefix: String,
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn generate_key(&self, policy: &Policy, identity: &CallerIdentity) -> String {
        self.storage_key(&ThrottleKey::new(policy, identity))
    }

    pub fn storage_key(&self, key: &ThrottleKey) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
