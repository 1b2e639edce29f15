use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::handlers::{health_check, metrics, readiness_check, AppState};
use crate::health::HealthChecker;
use crate::identity::IdentityDeriver;
use crate::key_generator::KeyGenerator;
use crate::middleware::logging_middleware;
use crate::policy::PolicyRegistry;
use crate::route::RouteThrottle;
use crate::storage::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use crate::throttler::ThrottleGuard;
use axum::routing::{get, MethodRouter};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    sweeper: Option<JoinHandle<()>>,
}

impl Server {
    /// Build the registry, counter store and guard from configuration.
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        let rate_limits = config.rate_limits()?;
        let registry = Arc::new(PolicyRegistry::from_config(&rate_limits)?);

        let mut sweeper = None;
        let store: Arc<dyn CounterStore> = match config.redis_url() {
            Some(url) => Arc::new(RedisCounterStore::connect(url).await?),
            None => {
                let store = InMemoryCounterStore::new();
                if !rate_limits.sweep_interval.is_zero() {
                    sweeper = Some(store.spawn_sweeper(rate_limits.sweep_interval));
                }
                Arc::new(store)
            }
        };

        tracing::info!(
            backend = store.backend(),
            default_limit = registry.default_policy().limit(),
            default_window = registry.default_policy().window_seconds(),
            policies = registry.policies().count(),
            "Throttle policies loaded"
        );

        let guard = ThrottleGuard::new(registry, store)
            .with_identity_deriver(IdentityDeriver::new(config.trust_proxy_headers))
            .with_key_generator(KeyGenerator::new(config.key_prefix.clone()));

        let api = api_router(&guard, api_routes())?;
        let app = create_app(&guard, api)?;

        Ok(Self {
            app,
            bind_addr: config.bind_addr,
            sweeper,
        })
    }

    pub async fn run(self) -> ThrottlerResult<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| ThrottlerError::Configuration(format!("Failed to bind {}: {}", self.bind_addr, e)))?;

        tracing::info!("Throttler server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        let served = axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ThrottlerError::Internal(format!("Server error: {}", e)));

        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }

        served
    }
}

/// A path, its handler and its throttle declaration.
pub type ApiRoute = (&'static str, MethodRouter, RouteThrottle);

/// Route declarations served by the binary.
pub fn api_routes() -> Vec<ApiRoute> {
    vec![("/api/ping", get(|| async { "pong" }), RouteThrottle::throttled())]
}

/// Build the API router, checking every declaration against the registry
/// first so all unknown policy names are reported together.
pub fn api_router(guard: &ThrottleGuard, routes: Vec<ApiRoute>) -> ThrottlerResult<Router> {
    ConfigValidator::validate_routes(guard.registry(), routes.iter().map(|(_, _, route)| route))?;

    routes.into_iter().try_fold(Router::new(), |api, (path, handler, route)| {
        Ok(api.route(path, handler.route_layer(guard.layer(route)?)))
    })
}

/// Mount the service endpoints next to `api` and wrap everything in the
/// shared tower stack. Service endpoints are never throttled.
pub fn create_app(guard: &ThrottleGuard, api: Router) -> ThrottlerResult<Router> {
    let state = AppState {
        health: HealthChecker::new(guard.clone()),
        metrics: guard.metrics().clone(),
    };

    let service = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route_layer(guard.layer(RouteThrottle::skip())?)
        .with_state(state);

    Ok(Router::new().merge(service).merge(api).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(middleware::from_fn(logging_middleware)),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
