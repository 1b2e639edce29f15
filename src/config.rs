use crate::config_validator::ConfigValidator;
use crate::error::ThrottlerResult;
use crate::key_generator::DEFAULT_KEY_PREFIX;
use crate::rate_limit_config::RateLimitConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Process configuration. Every flag can also come from the environment
/// (and from a `.env` file, loaded by `main`).
#[derive(Debug, Clone, Parser)]
#[command(name = "cloud-throttler", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; empty keeps counters in process memory
    #[arg(long, env = "REDIS_URL", default_value = "")]
    pub redis_url: String,

    /// Log level for this crate when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON policy file; built-in policies are used when absent
    #[arg(long, env = "THROTTLER_POLICIES")]
    pub policies: Option<PathBuf>,

    /// Namespace prepended to every counter key
    #[arg(long, env = "THROTTLER_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    /// Key anonymous callers on X-Forwarded-For / X-Real-IP
    #[arg(long, env = "TRUST_PROXY_HEADERS")]
    pub trust_proxy_headers: bool,
}

impl Config {
    /// Load configuration from command-line arguments and environment variables
    pub fn from_env() -> ThrottlerResult<Self> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        if let Some(url) = self.redis_url() {
            ConfigValidator::validate_redis_url(url)?;
        }
        ConfigValidator::validate_key_prefix(&self.key_prefix)?;
        Ok(())
    }

    pub fn redis_url(&self) -> Option<&str> {
        let url = self.redis_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn rate_limits(&self) -> ThrottlerResult<RateLimitConfig> {
        match &self.policies {
            Some(path) => RateLimitConfig::from_file(path),
            None => Ok(RateLimitConfig::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: String::new(),
            log_level: "info".to_string(),
            policies: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            trust_proxy_headers: false,
        }
    }
}
