use crate::error::ThrottlerError;
use crate::policy::PolicyRegistry;
use crate::route::RouteThrottle;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), ThrottlerError> {
        if url.is_empty() {
            return Err(ThrottlerError::Validation("Redis URL cannot be empty".to_string()));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ThrottlerError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the counter key namespace
    pub fn validate_key_prefix(prefix: &str) -> Result<(), ThrottlerError> {
        if prefix.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ThrottlerError::Validation(
                "Key prefix cannot contain whitespace or control characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Checks a batch of route declarations against the registry up front,
    /// reporting every unknown policy name at once.
    pub fn validate_routes<'a>(
        registry: &PolicyRegistry,
        routes: impl IntoIterator<Item = &'a RouteThrottle>,
    ) -> Result<(), ThrottlerError> {
        let mut unknown: Vec<&str> = routes
            .into_iter()
            .filter_map(RouteThrottle::policy_name)
            .filter(|name| !registry.contains(name))
            .collect();

        if unknown.is_empty() {
            return Ok(());
        }

        unknown.sort_unstable();
        unknown.dedup();
        Err(ThrottlerError::UnknownPolicy(unknown.join(", ")))
    }
}
