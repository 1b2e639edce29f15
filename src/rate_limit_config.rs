use crate::error::{ThrottlerError, ThrottlerResult};
use crate::policy::Policy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

static POLICY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("policy name pattern is valid"));

/// Policy set loaded at startup.
///
/// ```json
/// {
///   "default": { "window_seconds": 60, "limit": 120 },
///   "overrides": { "strict": { "window_seconds": 60, "limit": 20 } },
///   "sweep_interval": "5m"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub default: PolicyConfig,
    #[serde(default)]
    pub overrides: HashMap<String, PolicyConfig>,
    /// How often the in-memory store drops closed windows. Zero disables.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

/// One policy's window and quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PolicyConfig {
    #[serde(alias = "ttl", alias = "windowSeconds")]
    #[validate(range(min = 1, message = "window must be at least one second"))]
    pub window_seconds: u64,
    #[validate(range(min = 1, message = "limit must be at least one request"))]
    pub limit: u64,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut overrides = HashMap::new();
        overrides.insert("strict".to_string(), PolicyConfig::new(60, 20));

        Self {
            default: PolicyConfig::new(60, 120),
            overrides,
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl PolicyConfig {
    pub fn new(window_seconds: u64, limit: u64) -> Self {
        Self {
            window_seconds,
            limit,
        }
    }

    /// Validate the values along with the name they are registered under.
    pub fn check(&self, name: &str) -> ThrottlerResult<()> {
        if !POLICY_NAME.is_match(name) {
            return Err(ThrottlerError::Validation(format!(
                "Policy name '{}' may only contain letters, digits, '-' and '_'",
                name
            )));
        }
        self.validate()
            .map_err(|e| ThrottlerError::Validation(format!("policy '{}': {}", name, e)))
    }

    pub fn to_policy(&self, name: &str) -> ThrottlerResult<Policy> {
        Policy::new(name, self.window_seconds, self.limit)
    }
}

impl RateLimitConfig {
    /// Read a policy file. JSON only.
    pub fn from_file(path: impl AsRef<Path>) -> ThrottlerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ThrottlerError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ThrottlerResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| ThrottlerError::Configuration(format!("Invalid policy file: {}", e)))?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn with_override(mut self, name: impl Into<String>, policy: PolicyConfig) -> Self {
        self.overrides.insert(name.into(), policy);
        self
    }

    pub fn validate_all(&self) -> ThrottlerResult<()> {
        self.default.check(crate::policy::DEFAULT_POLICY)?;
        for (name, policy) in &self.overrides {
            if name == crate::policy::DEFAULT_POLICY {
                return Err(ThrottlerError::Configuration(
                    "'default' is reserved for the default policy".to_string(),
                ));
            }
            policy.check(name)?;
        }
        Ok(())
    }
}
