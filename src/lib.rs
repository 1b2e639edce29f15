pub mod algorithms;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod key_generator;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod rate_limit_config;
pub mod response;
pub mod route;
pub mod server;
pub mod storage;
pub mod throttler;

pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use identity::{AuthenticatedUser, CallerIdentity, IdentityClass};
pub use policy::{Policy, PolicyRegistry};
pub use response::QuotaStatus;
pub use route::RouteThrottle;
pub use server::create_app;
pub use storage::{CounterStore, InMemoryCounterStore, RedisCounterStore};
pub use throttler::{Admission, ThrottleGuard};
